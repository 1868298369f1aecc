//! marklink-remote
//!
//! The robot side of the link: joins the provisioned network, dials the
//! station, streams camera frames and executes the command bytes it receives.
//!
//! # Architecture
//!
//! ```text
//! WifiInterface ─► associate ─► TcpConnector ─► ConnectionSupervisor
//!                                                    │
//!                         ┌──────────────────────────┤ RemoteEndpoint
//!                         ▼                          ▼
//! FrameSource ─► pump ─► frame queue        command queue ─► ActuatorExecutor ─► Actuators
//! ```

pub mod actuators;
pub mod camera;
pub mod endpoint;
pub mod wifi;

pub use actuators::{ActuatorError, ActuatorExecutor, Actuators, LoggingActuators};
pub use camera::{FrameSource, SyntheticCamera};
pub use endpoint::{EndpointStats, RemoteEndpoint};
pub use wifi::{associate, SimulatedWifi, WifiInterface};

/// Environment variable naming a file holding the provisioning JSON.
pub const PROVISIONING_ENV: &str = "MARKLINK_PROVISIONING";
