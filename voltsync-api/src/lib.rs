pub mod device;
pub mod message;
pub mod method;
pub mod mode;
pub mod scaling;
pub mod status;

pub use device::DeviceIdentity;
pub use message::{CommandEnvelope, ErrorPayload, ResponseEnvelope};
pub use mode::{ManualSchedule, ModeConfig, OperatingMode, PassiveConfig};
