use std::net::SocketAddr;

use async_trait::async_trait;
use marklink_core::{NetworkEndpointConfig, TransportError};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::{BoxedStream, Connector};

// ── TcpConnector ──────────────────────────────────────────────────────────────

/// Dials the station at a provisioned host/port (remote endpoint role).
#[derive(Debug, Clone)]
pub struct TcpConnector {
    endpoint: NetworkEndpointConfig,
}

impl TcpConnector {
    pub fn new(endpoint: NetworkEndpointConfig) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &NetworkEndpointConfig {
        &self.endpoint
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> std::io::Result<(BoxedStream, SocketAddr)> {
        let stream = TcpStream::connect(self.endpoint.socket_addr()).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        debug!("Dialled {} ({})", self.endpoint, peer);
        Ok((Box::new(stream), peer))
    }

    fn describe(&self) -> String {
        format!("station at {}", self.endpoint)
    }
}

// ── TcpAcceptor ───────────────────────────────────────────────────────────────

/// Accepts one robot at a time on a bound listener (station role).
///
/// The supervisor only calls `accept` again after the current session ends.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local = listener.local_addr().unwrap_or(addr);
        info!("Station listening on {}", local);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl Connector for TcpAcceptor {
    async fn connect(&self) -> std::io::Result<(BoxedStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Box::new(stream), peer))
    }

    fn describe(&self) -> String {
        match self.listener.local_addr() {
            Ok(addr) => format!("robot on {}", addr),
            Err(_) => "robot".to_owned(),
        }
    }
}
