use std::net::SocketAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarkLinkError {
    #[error("Configuration invalid: {reason}")]
    ConfigurationInvalid { reason: String },

    #[error("Provisioning payload invalid: {reason}")]
    ProvisioningInvalid { reason: String },

    #[error("Failed to join network '{ssid}' after {attempts} attempts")]
    AssociationFailed { ssid: String, attempts: u32 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// The transport accepted none of a non-empty buffer.
    #[error("Transmission failed: 0 of {len} bytes accepted")]
    TransmissionFailed { len: usize },

    #[error("Error budget exhausted after {errors} consecutive I/O errors")]
    ErrorBudgetExhausted { errors: u32 },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}
