mod command_service;
mod discovery_service;
mod fleet_service;
mod polling_service;
mod transport;

pub use command_service::*;
pub use discovery_service::*;
pub use fleet_service::*;
pub use polling_service::*;
pub use transport::*;
