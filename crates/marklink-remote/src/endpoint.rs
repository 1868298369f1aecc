//! Robot-side session driver.
//!
//! # Flow (per connection)
//!
//! ```text
//! ConnectionReader ── bytes ──► command queue ──► ActuatorExecutor
//! frame queue ◄── camera pump
//!      │
//!      └──► ConnectionWriter::try_send (2048-byte chunks)
//! ```
//!
//! The receive and send loops run concurrently; either one closing the link
//! ends both.

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use marklink_core::{CloseReason, LinkConfig};
use marklink_transport::{ConnectionReader, ConnectionWriter, SessionDriver};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Per-connection counters, logged when the connection ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub commands_received: u64,
}

pub struct RemoteEndpoint {
    config: LinkConfig,
    commands: mpsc::UnboundedSender<u8>,
    frames: mpsc::UnboundedReceiver<Bytes>,
    session: EndpointStats,
    total: EndpointStats,
}

impl RemoteEndpoint {
    /// `commands` feeds the actuator executor; `frames` is filled by the
    /// camera pump.
    pub fn new(
        config: LinkConfig,
        commands: mpsc::UnboundedSender<u8>,
        frames: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        Self {
            config,
            commands,
            frames,
            session: EndpointStats::default(),
            total: EndpointStats::default(),
        }
    }

    /// Counters summed over every connection so far.
    pub fn total_stats(&self) -> EndpointStats {
        self.total
    }

    fn discard_stale_frames(&mut self) {
        let mut stale = 0usize;
        while self.frames.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("Discarded {} frames captured while disconnected", stale);
        }
    }
}

#[async_trait]
impl SessionDriver for RemoteEndpoint {
    async fn on_connected(&mut self, peer: SocketAddr) {
        info!("Streaming to station {}", peer);
        self.session = EndpointStats::default();
        self.discard_stale_frames();
    }

    async fn drive(
        &mut self,
        mut reader: ConnectionReader,
        mut writer: ConnectionWriter,
        shutdown: watch::Receiver<bool>,
    ) {
        let read_timeout = self.config.read_timeout();
        let Self {
            commands,
            frames,
            session,
            ..
        } = self;
        let mut commands_received = 0u64;

        // ── Receive loop: command bytes → actuator queue ─────────────────────
        let recv_loop = async {
            let mut shutdown = shutdown.clone();
            loop {
                let received = tokio::select! {
                    r = reader.try_receive(read_timeout) => r,
                    _ = shutdown.changed() => break,
                };
                match received {
                    Ok(Some(bytes)) => {
                        for &byte in bytes.iter() {
                            if commands.send(byte).is_err() {
                                warn!("Actuator executor gone; dropping command 0x{:02x}", byte);
                            }
                        }
                        commands_received += bytes.len() as u64;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        debug!("Receive loop ending: {}", e);
                        break;
                    }
                }
            }
        };

        // ── Send loop: frame queue → chunked writes ──────────────────────────
        let send_loop = async {
            let mut shutdown = shutdown.clone();
            let mut camera_done = false;
            loop {
                tokio::select! {
                    frame = frames.recv(), if !camera_done => {
                        let Some(frame) = frame else {
                            // Keep serving commands until the link ends.
                            info!("Camera stopped; no more frames to send");
                            camera_done = true;
                            continue;
                        };
                        match writer.try_send(&frame).await {
                            Ok(sent) => {
                                if sent > 0 {
                                    session.frames_sent += 1;
                                    session.bytes_sent += sent as u64;
                                }
                            }
                            Err(e) => {
                                warn!("Frame send failed: {}", e);
                                break;
                            }
                        }
                    }
                    _ = writer.closed() => break,
                    _ = shutdown.changed() => {
                        writer.shutdown(CloseReason::Shutdown).await;
                        break;
                    }
                }
            }
        };

        tokio::join!(recv_loop, send_loop);
        session.commands_received += commands_received;
    }

    async fn on_disconnected(&mut self, reason: CloseReason) {
        let s = self.session;
        info!(
            "Session ended ({}): frames={} bytes={} commands={}",
            reason, s.frames_sent, s.bytes_sent, s.commands_received
        );
        self.total.frames_sent += s.frames_sent;
        self.total.bytes_sent += s.bytes_sent;
        self.total.commands_received += s.commands_received;
    }
}
