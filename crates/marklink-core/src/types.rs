use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

// MARK: - NetworkEndpointConfig

/// Host/port pair a role binds to (station) or dials (remote endpoint).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkEndpointConfig {
    pub host: String,
    pub port: u16,
}

impl NetworkEndpointConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for NetworkEndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// MARK: - LinkState

/// Lifecycle of the single connection a supervisor owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl LinkState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Closing => write!(f, "CLOSING"),
        }
    }
}

// MARK: - CloseReason

/// Why a connection was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Zero-length read: the peer closed its end.
    PeerClosed,
    /// Reset / aborted / broken pipe reported by the OS.
    ConnectionReset,
    /// Too many consecutive transient I/O errors.
    ErrorBudget,
    /// A send was accepted with zero bytes written.
    TransmitFailed,
    /// A caller asked for the live connection to be dropped; the supervisor
    /// reconnects.
    Requested,
    /// Local shutdown requested.
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed the connection"),
            Self::ConnectionReset => write!(f, "connection reset"),
            Self::ErrorBudget => write!(f, "error budget exhausted"),
            Self::TransmitFailed => write!(f, "transmission failed"),
            Self::Requested => write!(f, "closed on request"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

// MARK: - StationEvent

/// Ordered event stream the station hands to its GUI / recorder.
#[derive(Debug, Clone, PartialEq)]
pub enum StationEvent {
    Connected { peer: SocketAddr },
    Disconnected { reason: CloseReason },
    Frame(bytes::Bytes),
}
