pub mod command;
pub mod config;
pub mod errors;
pub mod provisioning;
pub mod types;

pub use command::{ActuatorState, Command, CommandProtocol, DriveDirection, Effect, ServoChannel};
pub use config::LinkConfig;
pub use errors::{MarkLinkError, TransportError};
pub use provisioning::Provisioning;
pub use types::*;
