//! Station-side session driver.
//!
//! # Flow (per connection)
//!
//! ```text
//! ConnectionReader ── chunks ──► FrameReassembler ──► StationEvent::Frame ──► events
//! command queue ──► ConnectionWriter::try_send
//!                   (0x00 keepalive after keepalive_interval of silence)
//! ```

use std::net::SocketAddr;

use async_trait::async_trait;
use marklink_core::{CloseReason, Command, LinkConfig, StationEvent};
use marklink_transport::{ConnectionReader, ConnectionWriter, FrameReassembler, SessionDriver};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub struct StationListener {
    config: LinkConfig,
    reassembler: FrameReassembler,
    events: mpsc::UnboundedSender<StationEvent>,
    commands: mpsc::UnboundedReceiver<u8>,
    keepalives_sent: u64,
}

impl StationListener {
    /// `events` carries connection changes and frames to the GUI/recorder;
    /// `commands` is filled by the command relay.
    pub fn new(
        config: LinkConfig,
        events: mpsc::UnboundedSender<StationEvent>,
        commands: mpsc::UnboundedReceiver<u8>,
    ) -> Self {
        let reassembler = FrameReassembler::with_max_frame_bytes(config.max_frame_bytes);
        Self {
            config,
            reassembler,
            events,
            commands,
            keepalives_sent: 0,
        }
    }

    pub fn keepalives_sent(&self) -> u64 {
        self.keepalives_sent
    }

    pub fn frames_reassembled(&self) -> u64 {
        self.reassembler.frames_emitted()
    }

    fn emit(&self, event: StationEvent) {
        if self.events.send(event).is_err() {
            debug!("Event consumer gone; dropping event");
        }
    }

    fn discard_stale_commands(&mut self) {
        let mut stale = 0usize;
        while self.commands.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("Discarded {} commands queued while disconnected", stale);
        }
    }
}

#[async_trait]
impl SessionDriver for StationListener {
    async fn on_connected(&mut self, peer: SocketAddr) {
        info!("Robot connected from {}", peer);
        self.reassembler.reset();
        self.discard_stale_commands();
        self.emit(StationEvent::Connected { peer });
    }

    async fn drive(
        &mut self,
        mut reader: ConnectionReader,
        mut writer: ConnectionWriter,
        shutdown: watch::Receiver<bool>,
    ) {
        let read_timeout = self.config.read_timeout();
        let keepalive = self.config.keepalive_interval();
        let Self {
            reassembler,
            events,
            commands,
            keepalives_sent,
            ..
        } = self;

        // ── Receive loop: chunks → reassembler → frame events ────────────────
        let recv_loop = async {
            let mut shutdown = shutdown.clone();
            loop {
                let received = tokio::select! {
                    r = reader.try_receive(read_timeout) => r,
                    _ = shutdown.changed() => break,
                };
                match received {
                    Ok(Some(chunk)) => {
                        for frame in reassembler.push(&chunk) {
                            if events.send(StationEvent::Frame(frame)).is_err() {
                                debug!("Event consumer gone; dropping frame");
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        debug!("Receive loop ending: {}", e);
                        break;
                    }
                }
            }
        };

        // ── Send loop: command queue → socket, keepalive when idle ───────────
        let send_loop = async {
            let mut shutdown = shutdown.clone();
            let mut relay_done = false;
            loop {
                let idle = async {
                    match keepalive {
                        Some(interval) => tokio::time::sleep(interval).await,
                        None => std::future::pending::<()>().await,
                    }
                };

                let batch = tokio::select! {
                    first = commands.recv(), if !relay_done => match first {
                        Some(byte) => {
                            let mut batch = vec![byte];
                            while let Ok(next) = commands.try_recv() {
                                batch.push(next);
                            }
                            batch
                        }
                        None => {
                            debug!("Command relay closed; sending keepalives only");
                            relay_done = true;
                            continue;
                        }
                    },
                    _ = idle => {
                        *keepalives_sent += 1;
                        vec![Command::Keepalive.as_byte()]
                    }
                    _ = writer.closed() => break,
                    _ = shutdown.changed() => {
                        writer.shutdown(CloseReason::Shutdown).await;
                        break;
                    }
                };

                if let Err(e) = writer.try_send(&batch).await {
                    warn!("Command send failed: {}", e);
                    break;
                }
            }
        };

        tokio::join!(recv_loop, send_loop);
    }

    async fn on_disconnected(&mut self, reason: CloseReason) {
        if self.reassembler.is_active() {
            debug!(
                "Dropping {} bytes of an unfinished frame",
                self.reassembler.buffered_len()
            );
        }
        self.reassembler.reset();
        self.emit(StationEvent::Disconnected { reason });
    }
}
