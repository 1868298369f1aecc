//! Reconnecting connection supervisor.
//!
//! # Lifecycle
//!
//! ```text
//! DISCONNECTED ─► CONNECTING ──(connect ok)──► CONNECTED ─► driver.drive(..)
//!      ▲             │  ▲                                        │
//!      │   (fail) ───┘  └── retry_delay ◄──                      │ close latched
//!      │                                                          ▼
//!      └──────────────────────────────────────────────────── CLOSING
//! ```
//!
//! Retries are unbounded; only the shutdown signal ends [`ConnectionSupervisor::run`].
//! [`ConnectionSupervisor::close`] drops the live connection without stopping
//! the loop.

use std::net::SocketAddr;

use async_trait::async_trait;
use marklink_core::{CloseReason, LinkConfig, LinkState};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{Connection, ConnectionReader, ConnectionWriter, Connector, LinkHealth};

// ── SessionDriver ─────────────────────────────────────────────────────────────

/// Role-specific work performed on each established connection.
#[async_trait]
pub trait SessionDriver: Send {
    /// Called once the socket is up, before the state becomes `CONNECTED`.
    async fn on_connected(&mut self, peer: SocketAddr);

    /// Run the receive and send loops until the connection closes or
    /// `shutdown` flips to `true`. The halves are dropped (closing the socket)
    /// when this returns.
    async fn drive(
        &mut self,
        reader: ConnectionReader,
        writer: ConnectionWriter,
        shutdown: watch::Receiver<bool>,
    );

    async fn on_disconnected(&mut self, reason: CloseReason);
}

// ── SupervisorStatus ──────────────────────────────────────────────────────────

/// Snapshot published on every state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SupervisorStatus {
    pub state: LinkState,
    /// Connect (or accept) attempts started so far.
    pub connect_attempts: u64,
    /// Connections that reached `CONNECTED`.
    pub sessions: u64,
    pub peer: Option<SocketAddr>,
    pub last_close: Option<CloseReason>,
}

// ── ConnectionSupervisor ──────────────────────────────────────────────────────

pub struct ConnectionSupervisor<C> {
    connector: C,
    config: LinkConfig,
    status: watch::Sender<SupervisorStatus>,
    /// Health of the connection currently being driven, if any.
    current: watch::Sender<Option<LinkHealth>>,
}

impl<C: Connector> ConnectionSupervisor<C> {
    pub fn new(connector: C, config: LinkConfig) -> Self {
        let (status, _) = watch::channel(SupervisorStatus::default());
        let (current, _) = watch::channel(None);
        Self {
            connector,
            config,
            status,
            current,
        }
    }

    /// Tear down the live connection; `run` moves through `CLOSING` and
    /// reconnects. Returns `false` when there is no live connection or it is
    /// already closing.
    pub fn close(&self) -> bool {
        match self.current.borrow().as_ref() {
            Some(health) => health.close(CloseReason::Requested),
            None => false,
        }
    }

    /// Observe state transitions and attempt counts.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> SupervisorStatus {
        *self.status.borrow()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Connect, drive, tear down, repeat, until `shutdown` is set to `true`
    /// (or its sender is dropped).
    pub async fn run<D: SessionDriver>(&self, driver: &mut D, mut shutdown: watch::Receiver<bool>) {
        let target = self.connector.describe();

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.status.send_modify(|s| {
                s.state = LinkState::Connecting;
                s.connect_attempts += 1;
                s.peer = None;
            });
            debug!("Connecting to {} (attempt {})", target, self.status().connect_attempts);

            let attempt = tokio::select! {
                result = self.connector.connect() => result,
                _ = shutdown.changed() => break,
            };

            let (stream, peer) = match attempt {
                Ok(connected) => connected,
                Err(e) => {
                    warn!("Connect to {} failed: {}", target, e);
                    let delay = self.config.retry_delay();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = shutdown.changed() => break,
                    }
                }
            };

            info!("Connected to {} ({})", target, peer);
            let connection = Connection::new(stream, peer, &self.config);
            let health = connection.health();
            self.current.send_replace(Some(health.clone()));
            driver.on_connected(peer).await;
            self.status.send_modify(|s| {
                s.state = LinkState::Connected;
                s.sessions += 1;
                s.peer = Some(peer);
            });

            let (reader, writer) = connection.split();
            driver.drive(reader, writer, shutdown.clone()).await;

            self.current.send_replace(None);
            self.status.send_modify(|s| s.state = LinkState::Closing);
            let reason = match health.close_reason() {
                Some(reason) => reason,
                None => {
                    health.close(CloseReason::Shutdown);
                    CloseReason::Shutdown
                }
            };
            info!("Disconnected from {}: {}", peer, reason);
            driver.on_disconnected(reason).await;
            self.status.send_modify(|s| {
                s.state = LinkState::Disconnected;
                s.peer = None;
                s.last_close = Some(reason);
            });
        }

        self.status.send_modify(|s| {
            s.state = LinkState::Disconnected;
            s.peer = None;
        });
        info!("Supervisor for {} stopped", target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
    use tokio::sync::mpsc;

    use crate::BoxedStream;

    /// Fails the first `failures` reads, then yields `payload` once, then
    /// stays silent.
    struct FlakyStream {
        failures: u32,
        payload: Option<&'static [u8]>,
    }

    impl AsyncRead for FlakyStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.failures > 0 {
                self.failures -= 1;
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "injected fault",
                )));
            }
            match self.payload.take() {
                Some(data) => {
                    buf.put_slice(data);
                    Poll::Ready(Ok(()))
                }
                // Read timeout in the connection wakes the caller.
                None => Poll::Pending,
            }
        }
    }

    impl AsyncWrite for FlakyStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// First connection fails `failures` reads; later ones are quiet.
    struct FlakyConnector {
        failures: u32,
        connects: AtomicUsize,
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        async fn connect(&self) -> std::io::Result<(BoxedStream, SocketAddr)> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst);
            let stream = FlakyStream {
                failures: if n == 0 { self.failures } else { 0 },
                payload: (n == 0).then_some(&b"\x01"[..]),
            };
            Ok((Box::new(stream), "127.0.0.1:40000".parse().unwrap()))
        }

        fn describe(&self) -> String {
            "flaky".into()
        }
    }

    /// Refuses the first `refusals` attempts, then hands out one stream whose
    /// peer has already hung up, then quiet streams.
    struct RefusingConnector {
        refusals: usize,
        attempts: AtomicUsize,
        held: std::sync::Mutex<Vec<tokio::io::DuplexStream>>,
    }

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self) -> std::io::Result<(BoxedStream, SocketAddr)> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.refusals {
                return Err(std::io::ErrorKind::ConnectionRefused.into());
            }
            let (near, far) = tokio::io::duplex(64);
            if n == self.refusals {
                drop(far);
            } else {
                self.held.lock().unwrap().push(far);
            }
            Ok((Box::new(near), "127.0.0.1:40001".parse().unwrap()))
        }

        fn describe(&self) -> String {
            "refusing".into()
        }
    }

    /// Reads until the link closes, forwarding every chunk.
    struct ReadLoop {
        chunks: mpsc::UnboundedSender<Bytes>,
        disconnects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SessionDriver for ReadLoop {
        async fn on_connected(&mut self, _peer: SocketAddr) {}

        async fn drive(
            &mut self,
            mut reader: ConnectionReader,
            _writer: ConnectionWriter,
            shutdown: watch::Receiver<bool>,
        ) {
            while !*shutdown.borrow() {
                match reader.try_receive(Duration::from_millis(20)).await {
                    Ok(Some(chunk)) => {
                        let _ = self.chunks.send(chunk);
                    }
                    Ok(None) => {}
                    Err(_) => return,
                }
            }
        }

        async fn on_disconnected(&mut self, _reason: CloseReason) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_config() -> LinkConfig {
        LinkConfig {
            retry_delay_ms: 0,
            ..LinkConfig::default()
        }
    }

    async fn wait_for(
        rx: &mut watch::Receiver<SupervisorStatus>,
        f: impl FnMut(&SupervisorStatus) -> bool,
    ) -> SupervisorStatus {
        let status = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(f))
            .await
            .expect("status within timeout")
            .expect("supervisor alive");
        *status
    }

    #[tokio::test]
    async fn ten_consecutive_errors_force_a_reconnect() {
        let supervisor = Arc::new(ConnectionSupervisor::new(
            FlakyConnector {
                failures: 10,
                connects: AtomicUsize::new(0),
            },
            test_config(),
        ));
        let mut status = supervisor.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (chunks_tx, mut chunks_rx) = mpsc::unbounded_channel();
        let disconnects = Arc::new(AtomicUsize::new(0));

        let sup = supervisor.clone();
        let dc = disconnects.clone();
        let task = tokio::spawn(async move {
            let mut driver = ReadLoop {
                chunks: chunks_tx,
                disconnects: dc,
            };
            sup.run(&mut driver, shutdown_rx).await;
        });

        let s = wait_for(&mut status, |s| s.sessions == 2 && s.state == LinkState::Connected).await;
        assert_eq!(s.last_close, Some(CloseReason::ErrorBudget));
        assert_eq!(s.connect_attempts, 2);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        // The payload behind the faults was never reached.
        assert!(chunks_rx.try_recv().is_err());

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(supervisor.status().state, LinkState::Disconnected);
    }

    #[tokio::test]
    async fn nine_consecutive_errors_keep_the_connection() {
        let supervisor = Arc::new(ConnectionSupervisor::new(
            FlakyConnector {
                failures: 9,
                connects: AtomicUsize::new(0),
            },
            test_config(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (chunks_tx, mut chunks_rx) = mpsc::unbounded_channel();
        let disconnects = Arc::new(AtomicUsize::new(0));

        let sup = supervisor.clone();
        let dc = disconnects.clone();
        let task = tokio::spawn(async move {
            let mut driver = ReadLoop {
                chunks: chunks_tx,
                disconnects: dc,
            };
            sup.run(&mut driver, shutdown_rx).await;
        });

        let chunk = tokio::time::timeout(Duration::from_secs(5), chunks_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chunk.as_ref(), b"\x01");

        let s = supervisor.status();
        assert_eq!(s.state, LinkState::Connected);
        assert_eq!(s.connect_attempts, 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 0);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.status().last_close, Some(CloseReason::Shutdown));
    }

    #[tokio::test]
    async fn refused_attempts_are_retried_and_graceful_close_reconnects() {
        let supervisor = Arc::new(ConnectionSupervisor::new(
            RefusingConnector {
                refusals: 3,
                attempts: AtomicUsize::new(0),
                held: std::sync::Mutex::new(Vec::new()),
            },
            test_config(),
        ));
        let mut status = supervisor.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (chunks_tx, _chunks_rx) = mpsc::unbounded_channel();

        let sup = supervisor.clone();
        let task = tokio::spawn(async move {
            let mut driver = ReadLoop {
                chunks: chunks_tx,
                disconnects: Arc::new(AtomicUsize::new(0)),
            };
            sup.run(&mut driver, shutdown_rx).await;
        });

        let s = wait_for(&mut status, |s| s.sessions == 2 && s.state == LinkState::Connected).await;
        assert_eq!(s.connect_attempts, 5);
        assert_eq!(s.last_close, Some(CloseReason::PeerClosed));

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn close_drops_the_live_connection_and_reconnects() {
        let supervisor = Arc::new(ConnectionSupervisor::new(
            RefusingConnector {
                refusals: 0,
                attempts: AtomicUsize::new(1),
                held: std::sync::Mutex::new(Vec::new()),
            },
            test_config(),
        ));
        assert!(!supervisor.close());

        let mut status = supervisor.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (chunks_tx, _chunks_rx) = mpsc::unbounded_channel();
        let disconnects = Arc::new(AtomicUsize::new(0));

        let sup = supervisor.clone();
        let dc = disconnects.clone();
        let task = tokio::spawn(async move {
            let mut driver = ReadLoop {
                chunks: chunks_tx,
                disconnects: dc,
            };
            sup.run(&mut driver, shutdown_rx).await;
        });

        wait_for(&mut status, |s| s.sessions == 1 && s.state == LinkState::Connected).await;
        assert!(supervisor.close());
        assert!(!supervisor.close());

        let s = wait_for(&mut status, |s| s.sessions == 2 && s.state == LinkState::Connected).await;
        assert_eq!(s.last_close, Some(CloseReason::Requested));
        assert_eq!(s.connect_attempts, 2);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
