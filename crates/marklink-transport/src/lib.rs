//! marklink-transport
//!
//! The TCP link shared by both roles.
//!
//! # Architecture
//!
//! ```text
//! Remote endpoint (robot)                     Station
//! ─────────────────────────                   ─────────────────────────────
//! FrameSource ─► chunker::send ── JPEG ────►  ConnectionReader → FrameReassembler
//! Actuators  ◄── CommandProtocol ◄── bytes ── ConnectionWriter ◄── command queue
//!      ▲                                              ▲
//!      └──── ConnectionSupervisor (dial) ─── TCP ─────┘ ConnectionSupervisor (accept)
//! ```
//!
//! Each role runs one [`ConnectionSupervisor`] which owns the connect/accept
//! retry loop and hands every established [`Connection`] to a role-specific
//! [`SessionDriver`].

pub mod chunker;
pub mod connection;
pub mod reassembler;
pub mod supervisor;
pub mod tcp;

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

pub use connection::{Connection, ConnectionReader, ConnectionWriter, LinkHealth};
pub use reassembler::FrameReassembler;
pub use supervisor::{ConnectionSupervisor, SessionDriver, SupervisorStatus};
pub use tcp::{TcpAcceptor, TcpConnector};

/// Default station port.
pub const DEFAULT_PORT: u16 = 1060;

// ── Stream abstraction ────────────────────────────────────────────────────────

/// Any bidirectional byte stream a [`Connector`] can produce.
pub trait LinkStream: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> LinkStream for T {}

pub type BoxedStream = Box<dyn LinkStream>;

/// Produces one connected stream per call: dials out on the remote endpoint,
/// accepts on the station.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> std::io::Result<(BoxedStream, SocketAddr)>;

    /// Human-readable target for log lines.
    fn describe(&self) -> String;
}
