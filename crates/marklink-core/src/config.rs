use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::MarkLinkError;

/// Environment variable naming a JSON file with a [`LinkConfig`].
pub const CONFIG_ENV: &str = "MARKLINK_CONFIG";

/// Link tuning shared by the station and the remote endpoint.
///
/// Every field has a default, so a config file only needs the values it
/// overrides. Field names accept both snake_case and camelCase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Largest single network write when sending a frame.
    #[serde(alias = "chunkSize")]
    pub chunk_size: usize,
    /// Socket read timeout; a timeout is "no data yet", not an error.
    #[serde(alias = "readTimeoutMs")]
    pub read_timeout_ms: u64,
    /// Size of the buffer handed to each socket read.
    #[serde(alias = "recvBufferSize")]
    pub recv_buffer_size: usize,
    /// Consecutive transient I/O errors tolerated before reconnecting.
    #[serde(alias = "errorThreshold")]
    pub error_threshold: u32,
    /// Pause between failed connect attempts.
    #[serde(alias = "retryDelayMs")]
    pub retry_delay_ms: u64,
    /// Idle time after which the station emits a keepalive byte. 0 disables.
    #[serde(alias = "keepaliveIntervalMs")]
    pub keepalive_interval_ms: u64,
    /// Camera capture pacing on the remote endpoint.
    #[serde(alias = "frameIntervalMs")]
    pub frame_interval_ms: u64,
    /// Speed argument passed with every drive command.
    #[serde(alias = "driveSpeed")]
    pub drive_speed: u8,
    /// Optional cap on a single in-progress frame.
    #[serde(alias = "maxFrameBytes")]
    pub max_frame_bytes: Option<usize>,
    /// Wi-Fi join attempts before giving up.
    #[serde(alias = "joinAttempts")]
    pub join_attempts: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2048,
            read_timeout_ms: 100,
            recv_buffer_size: 1024,
            error_threshold: 10,
            retry_delay_ms: 1000,
            keepalive_interval_ms: 1000,
            frame_interval_ms: 95,
            drive_speed: 0,
            max_frame_bytes: None,
            join_attempts: 3,
        }
    }
}

impl LinkConfig {
    /// Parse a JSON document and validate it.
    pub fn from_json(json: &str) -> Result<Self, MarkLinkError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MarkLinkError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Load from the file named by `MARKLINK_CONFIG`, or fall back to defaults.
    pub fn from_env() -> Result<Self, MarkLinkError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => {
                tracing::info!("Loading link config from {}", path);
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), MarkLinkError> {
        let invalid = |reason: &str| {
            Err(MarkLinkError::ConfigurationInvalid {
                reason: reason.to_owned(),
            })
        };
        if self.chunk_size == 0 {
            return invalid("chunk_size must be greater than zero");
        }
        if self.recv_buffer_size == 0 {
            return invalid("recv_buffer_size must be greater than zero");
        }
        if self.error_threshold == 0 {
            return invalid("error_threshold must be greater than zero");
        }
        if self.read_timeout_ms == 0 {
            return invalid("read_timeout_ms must be greater than zero");
        }
        if self.join_attempts == 0 {
            return invalid("join_attempts must be greater than zero");
        }
        if self.max_frame_bytes == Some(0) {
            return invalid("max_frame_bytes must be greater than zero when set");
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// `None` when keepalives are disabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_ms > 0).then(|| Duration::from_millis(self.keepalive_interval_ms))
    }
}
