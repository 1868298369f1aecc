//! Network association from a scanned provisioning record.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use async_trait::async_trait;
use marklink_core::{MarkLinkError, Provisioning};
use tracing::{info, warn};

#[async_trait]
pub trait WifiInterface: Send {
    /// Join `ssid`; returns the address assigned to this interface.
    async fn join(&mut self, ssid: &str, password: &str) -> std::io::Result<IpAddr>;
}

/// Join the provisioned network, giving up after `attempts` consecutive
/// failures with [`MarkLinkError::AssociationFailed`].
pub async fn associate<W: WifiInterface + ?Sized>(
    wifi: &mut W,
    provisioning: &Provisioning,
    attempts: u32,
    retry_delay: Duration,
) -> Result<IpAddr, MarkLinkError> {
    for attempt in 1..=attempts {
        info!(
            "Joining '{}' (password {}), attempt {}/{}",
            provisioning.ssid,
            provisioning.masked_password(),
            attempt,
            attempts
        );
        match wifi.join(&provisioning.ssid, &provisioning.password).await {
            Ok(ip) => {
                info!("Joined '{}' as {}", provisioning.ssid, ip);
                return Ok(ip);
            }
            Err(e) => {
                warn!("Join attempt {}/{} failed: {}", attempt, attempts, e);
                if attempt < attempts {
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }

    Err(MarkLinkError::AssociationFailed {
        ssid: provisioning.ssid.clone(),
        attempts,
    })
}

// ── SimulatedWifi ─────────────────────────────────────────────────────────────

/// Interface for hosts that are already on the network: fails the first
/// `failures` joins, then reports `address`.
#[derive(Debug, Clone)]
pub struct SimulatedWifi {
    address: IpAddr,
    failures: u32,
    joins: u32,
}

impl SimulatedWifi {
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            failures: 0,
            joins: 0,
        }
    }

    pub fn failing(mut self, failures: u32) -> Self {
        self.failures = failures;
        self
    }

    pub fn joins(&self) -> u32 {
        self.joins
    }
}

impl Default for SimulatedWifi {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

#[async_trait]
impl WifiInterface for SimulatedWifi {
    async fn join(&mut self, ssid: &str, _password: &str) -> std::io::Result<IpAddr> {
        self.joins += 1;
        if self.joins <= self.failures {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                format!("no beacon from '{}'", ssid),
            ));
        }
        Ok(self.address)
    }
}
