use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

use marklink_core::config::CONFIG_ENV;
use marklink_core::{Command, LinkConfig, MarkLinkError, Provisioning};
use serde::{Deserialize, Serialize};

use crate::controller::KeyBindings;

/// Environment variable overriding the listen port.
pub const PORT_ENV: &str = "MARKLINK_PORT";

/// Station settings. Shares its file with [`LinkConfig`]: the link fields sit
/// at the top level next to the station-only ones.
///
/// ```json
/// {
///   "port": 1060,
///   "ssid": "lab",
///   "password": "hunter22",
///   "readTimeoutMs": 100,
///   "keyBindings": { "KEY_SPACE": "trigger", "KEY_X": "stop" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    #[serde(flatten)]
    pub link: LinkConfig,
    pub port: u16,
    /// Network the robot should join; only used for the provisioning payload.
    pub ssid: String,
    pub password: String,
    /// Added to, or replacing entries of, the default key bindings.
    #[serde(alias = "keyBindings")]
    pub key_bindings: BTreeMap<String, Command>,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            port: marklink_transport::DEFAULT_PORT,
            ssid: "marklink".into(),
            password: String::new(),
            key_bindings: BTreeMap::new(),
        }
    }
}

impl StationConfig {
    pub fn from_json(json: &str) -> Result<Self, MarkLinkError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, MarkLinkError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// File named by `MARKLINK_CONFIG` (or defaults), then `MARKLINK_PORT`.
    pub fn from_env() -> Result<Self, MarkLinkError> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => {
                tracing::info!("Loading station config from {}", path);
                Self::load(path)?
            }
            _ => Self::default(),
        };

        if let Ok(raw) = std::env::var(PORT_ENV) {
            config.port = raw.trim().parse().map_err(|_| MarkLinkError::ConfigurationInvalid {
                reason: format!("{} is not a port number: {:?}", PORT_ENV, raw),
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MarkLinkError> {
        self.link.validate()?;
        if self.port == 0 {
            return Err(MarkLinkError::ConfigurationInvalid {
                reason: "port must be non-zero".into(),
            });
        }
        Ok(())
    }

    pub fn bindings(&self) -> KeyBindings {
        KeyBindings::default().with_overrides(self.key_bindings.clone())
    }

    /// Record to encode into the QR code shown to the robot.
    pub fn provisioning(&self, host: IpAddr) -> Provisioning {
        Provisioning::new(&self.ssid, &self.password, host.to_string(), self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_fields_share_the_top_level() {
        let json = r#"{
            "port": 4000,
            "readTimeoutMs": 40,
            "keepalive_interval_ms": 0,
            "keyBindings": { "KEY_X": "stop", "KEY_O": "keepalive" }
        }"#;
        let cfg = StationConfig::from_json(json).expect("valid station config");
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.link.read_timeout_ms, 40);
        assert!(cfg.link.keepalive_interval().is_none());
        assert_eq!(cfg.link.chunk_size, 2048);

        let bindings = cfg.bindings();
        assert_eq!(bindings.command_for("KEY_X"), Some(Command::Stop));
        assert_eq!(bindings.command_for("KEY_O"), Some(Command::Keepalive));
        assert_eq!(bindings.command_for("KEY_W"), Some(Command::Forward));
    }

    #[test]
    fn defaults_listen_on_1060() {
        let cfg = StationConfig::from_json("{}").unwrap();
        assert_eq!(cfg.port, 1060);
        assert_eq!(cfg.link, LinkConfig::default());
    }

    #[test]
    fn invalid_link_settings_are_rejected() {
        assert!(StationConfig::from_json(r#"{"chunkSize": 0}"#).is_err());
        assert!(StationConfig::from_json(r#"{"port": 0}"#).is_err());
    }

    #[test]
    fn provisioning_payload_names_this_station() {
        let cfg = StationConfig {
            ssid: "lab".into(),
            password: "pw".into(),
            ..StationConfig::default()
        };
        let payload = cfg
            .provisioning("192.168.1.20".parse().unwrap())
            .to_qr_payload()
            .unwrap();
        let parsed = Provisioning::from_qr_payload(&payload).unwrap();
        assert_eq!(parsed.host, "192.168.1.20");
        assert_eq!(parsed.port, 1060);
        assert_eq!(parsed.ssid, "lab");
    }
}
