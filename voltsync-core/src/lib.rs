pub mod configs;
pub mod errors;
pub mod services;

pub use errors::{CommandError, DiscoveryError, TransportError};
pub use services::*;
