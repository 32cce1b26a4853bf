mod settings;

pub use settings::{Discovery, Logger, Polling, Settings, Transport};
