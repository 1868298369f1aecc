//! Wi-Fi and station address handed to the robot through a QR code.
//!
//! The QR payload is a flat JSON object:
//!
//! ```json
//! {"ssid": "lab", "password": "hunter22", "host": "192.168.1.20", "port": 1060}
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::MarkLinkError;
use crate::types::NetworkEndpointConfig;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provisioning {
    pub ssid: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

impl Provisioning {
    pub fn new(
        ssid: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
            host: host.into(),
            port,
        }
    }

    /// Parse a scanned QR payload.
    pub fn from_qr_payload(payload: &str) -> Result<Self, MarkLinkError> {
        let parsed: Self = serde_json::from_str(payload.trim())?;
        if parsed.ssid.is_empty() {
            return Err(MarkLinkError::ProvisioningInvalid {
                reason: "ssid is empty".into(),
            });
        }
        if parsed.host.is_empty() {
            return Err(MarkLinkError::ProvisioningInvalid {
                reason: "host is empty".into(),
            });
        }
        if parsed.port == 0 {
            return Err(MarkLinkError::ProvisioningInvalid {
                reason: "port must be non-zero".into(),
            });
        }
        Ok(parsed)
    }

    /// JSON text to encode into the QR code shown by the station.
    pub fn to_qr_payload(&self) -> Result<String, MarkLinkError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn endpoint(&self) -> NetworkEndpointConfig {
        NetworkEndpointConfig::new(self.host.clone(), self.port)
    }

    /// Password with every character replaced by `*`.
    pub fn masked_password(&self) -> String {
        "*".repeat(self.password.chars().count())
    }
}

impl std::fmt::Debug for Provisioning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioning")
            .field("ssid", &self.ssid)
            .field("password", &self.masked_password())
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}
