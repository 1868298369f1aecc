//! marklink-station
//!
//! The control-station side of the link: accepts the robot, turns its byte
//! stream back into JPEG frames and relays operator commands.
//!
//! # Architecture
//!
//! ```text
//! Robot ── TCP:1060 ──► TcpAcceptor ─► ConnectionSupervisor ─► StationListener
//!                                                                 │      ▲
//!                                      StationEvent stream ◄──────┘      │
//!                                      CommandSource ─► relay ─► command queue
//! ```

pub mod config;
pub mod controller;
pub mod listener;
pub mod net;
pub mod stats;

pub use config::StationConfig;
pub use controller::{relay, CommandSource, KeyBindings, KeyStates, LineSource};
pub use listener::StationListener;
pub use net::detect_local_ip;
pub use stats::FrameStats;
