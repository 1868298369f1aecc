//! One established link: reader and writer halves sharing an error budget.
//!
//! # Error budget
//!
//! ```text
//! transient I/O error ──► count += 1 ──► count ≥ threshold ──► close(ErrorBudget)
//! successful read/send ─► count = 0
//! zero-length read ─────────────────────────────────────────► close(PeerClosed)
//! reset / aborted / broken pipe ────────────────────────────► close(ConnectionReset)
//! send accepted 0 bytes ────────────────────────────────────► close(TransmitFailed)
//! ```
//!
//! The first close wins; later calls are ignored. Both halves observe the
//! close through [`LinkHealth`], so whichever loop trips it, the other stops.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use marklink_core::{CloseReason, LinkConfig, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{chunker, BoxedStream};

// ── LinkHealth ────────────────────────────────────────────────────────────────

/// Shared consecutive-error counter and close latch for one connection.
///
/// `LinkHealth` is `Clone`; every clone observes the same connection.
#[derive(Clone)]
pub struct LinkHealth {
    inner: Arc<HealthInner>,
}

struct HealthInner {
    errors: AtomicU32,
    threshold: u32,
    closed: watch::Sender<Option<CloseReason>>,
}

impl LinkHealth {
    pub fn new(threshold: u32) -> Self {
        let (closed, _) = watch::channel(None);
        Self {
            inner: Arc::new(HealthInner {
                errors: AtomicU32::new(0),
                threshold,
                closed,
            }),
        }
    }

    /// Latch the connection closed. Returns `false` if it already was.
    pub fn close(&self, reason: CloseReason) -> bool {
        let latched = self.inner.closed.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
        if latched {
            debug!("Link closing: {}", reason);
        }
        latched
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.inner.closed.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.close_reason().is_some()
    }

    /// Resolves once the connection has been closed, with the first reason.
    pub async fn closed(&self) -> CloseReason {
        let mut rx = self.inner.closed.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return CloseReason::Shutdown;
            }
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.inner.errors.load(Ordering::Relaxed)
    }

    pub fn threshold(&self) -> u32 {
        self.inner.threshold
    }

    fn record_success(&self) {
        self.inner.errors.store(0, Ordering::Relaxed);
    }

    /// Classify an I/O error; `Err` means the connection is now closed.
    fn record_error(&self, op: &str, err: &std::io::Error) -> Result<(), TransportError> {
        if is_disconnect(err.kind()) {
            info!("{} failed, peer gone: {}", op, err);
            self.close(CloseReason::ConnectionReset);
            return Err(TransportError::ConnectionClosed);
        }

        let errors = self.inner.errors.fetch_add(1, Ordering::Relaxed) + 1;
        warn!("{} error ({}/{}): {}", op, errors, self.inner.threshold, err);
        if errors >= self.inner.threshold {
            self.close(CloseReason::ErrorBudget);
            return Err(TransportError::ErrorBudgetExhausted { errors });
        }
        Ok(())
    }
}

impl std::fmt::Debug for LinkHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkHealth")
            .field("errors", &self.consecutive_errors())
            .field("threshold", &self.inner.threshold)
            .field("closed", &self.close_reason())
            .finish()
    }
}

fn is_disconnect(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        kind,
        ConnectionReset | ConnectionAborted | BrokenPipe | NotConnected | UnexpectedEof
    )
}

fn closed_error(health: &LinkHealth, reason: CloseReason) -> TransportError {
    match reason {
        CloseReason::ErrorBudget => TransportError::ErrorBudgetExhausted {
            errors: health.consecutive_errors(),
        },
        _ => TransportError::ConnectionClosed,
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

/// An established stream, not yet split into its two loops.
pub struct Connection {
    stream: BoxedStream,
    peer: SocketAddr,
    health: LinkHealth,
    chunk_size: usize,
    recv_buffer_size: usize,
}

impl Connection {
    pub fn new(stream: BoxedStream, peer: SocketAddr, config: &LinkConfig) -> Self {
        Self {
            stream,
            peer,
            health: LinkHealth::new(config.error_threshold),
            chunk_size: config.chunk_size,
            recv_buffer_size: config.recv_buffer_size,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn health(&self) -> LinkHealth {
        self.health.clone()
    }

    /// Split into independently driven receive and send halves.
    pub fn split(self) -> (ConnectionReader, ConnectionWriter) {
        let (read_half, write_half) = tokio::io::split(self.stream);
        let reader = ConnectionReader {
            reader: read_half,
            buf: vec![0u8; self.recv_buffer_size],
            peer: self.peer,
            health: self.health.clone(),
        };
        let writer = ConnectionWriter {
            writer: write_half,
            peer: self.peer,
            chunk_size: self.chunk_size,
            health: self.health,
        };
        (reader, writer)
    }
}

// ── ConnectionReader ──────────────────────────────────────────────────────────

pub struct ConnectionReader {
    reader: ReadHalf<BoxedStream>,
    buf: Vec<u8>,
    peer: SocketAddr,
    health: LinkHealth,
}

impl ConnectionReader {
    /// Read whatever is available within `timeout`.
    ///
    /// `Ok(None)` means no data yet: the read timed out, or a transient error
    /// was counted against the budget. After a counted error the call waits
    /// `timeout` before returning, so the budget spans `threshold × timeout`
    /// of sustained failure. `Err` means the connection is closed and the
    /// caller should stop its loop.
    pub async fn try_receive(&mut self, timeout: Duration) -> Result<Option<Bytes>, TransportError> {
        if let Some(reason) = self.health.close_reason() {
            return Err(closed_error(&self.health, reason));
        }

        match tokio::time::timeout(timeout, self.reader.read(&mut self.buf)).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok(0)) => {
                info!("Peer {} closed the connection", self.peer);
                self.health.close(CloseReason::PeerClosed);
                Err(TransportError::ConnectionClosed)
            }
            Ok(Ok(n)) => {
                self.health.record_success();
                Ok(Some(Bytes::copy_from_slice(&self.buf[..n])))
            }
            Ok(Err(e)) if matches!(e.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock) => {
                Ok(None)
            }
            Ok(Err(e)) => {
                self.health.record_error("Receive", &e)?;
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {}
                    _ = self.health.closed() => {}
                }
                Ok(None)
            }
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn health(&self) -> &LinkHealth {
        &self.health
    }
}

// ── ConnectionWriter ──────────────────────────────────────────────────────────

pub struct ConnectionWriter {
    writer: WriteHalf<BoxedStream>,
    peer: SocketAddr,
    chunk_size: usize,
    health: LinkHealth,
}

impl ConnectionWriter {
    /// Send `buf` in bounded chunks; returns the bytes the socket accepted.
    ///
    /// A transient error is counted and reported as `Ok(0)`. Zero bytes
    /// accepted for a non-empty buffer closes the connection with
    /// [`TransportError::TransmissionFailed`].
    pub async fn try_send(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        if let Some(reason) = self.health.close_reason() {
            return Err(closed_error(&self.health, reason));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        match chunker::send(&mut self.writer, buf, self.chunk_size).await {
            Ok(0) => {
                warn!("Transmission to {} failed: 0 of {} bytes accepted", self.peer, buf.len());
                self.health.close(CloseReason::TransmitFailed);
                Err(TransportError::TransmissionFailed { len: buf.len() })
            }
            Ok(sent) => {
                self.health.record_success();
                if sent < buf.len() {
                    debug!("Short send to {}: {}/{} bytes", self.peer, sent, buf.len());
                }
                Ok(sent)
            }
            Err(e) => {
                self.health.record_error("Send", &e)?;
                Ok(0)
            }
        }
    }

    /// Resolves once either half has closed the connection.
    pub async fn closed(&self) -> CloseReason {
        self.health.closed().await
    }

    /// Close the write side and latch the connection closed.
    pub async fn shutdown(&mut self, reason: CloseReason) {
        self.health.close(reason);
        if let Err(e) = self.writer.shutdown().await {
            debug!("Shutdown of {} write half: {}", self.peer, e);
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn health(&self) -> &LinkHealth {
        &self.health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

    const PEER: &str = "127.0.0.1:1060";

    fn connection(stream: impl crate::LinkStream + 'static, config: &LinkConfig) -> Connection {
        Connection::new(Box::new(stream), PEER.parse().unwrap(), config)
    }

    /// Fails every read with `kind`, accepts at most `accept` bytes per write.
    struct Faulty {
        kind: std::io::ErrorKind,
        accept: usize,
    }

    impl AsyncRead for Faulty {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::new(self.kind, "injected")))
        }
    }

    impl AsyncWrite for Faulty {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(self.accept.min(buf.len())))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn receives_data_and_times_out_quietly() {
        let (near, mut far) = tokio::io::duplex(64);
        let (mut reader, _writer) = connection(near, &LinkConfig::default()).split();

        assert!(reader.try_receive(Duration::from_millis(20)).await.unwrap().is_none());

        far.write_all(b"\x01\x02").await.unwrap();
        let got = reader.try_receive(Duration::from_millis(500)).await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"\x01\x02"[..]));
    }

    #[tokio::test]
    async fn zero_length_read_closes_without_counting() {
        let (near, far) = tokio::io::duplex(64);
        drop(far);
        let conn = connection(near, &LinkConfig::default());
        let health = conn.health();
        let (mut reader, _writer) = conn.split();

        let err = reader.try_receive(Duration::from_millis(500)).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
        assert_eq!(health.close_reason(), Some(CloseReason::PeerClosed));
        assert_eq!(health.consecutive_errors(), 0);
    }

    #[tokio::test]
    async fn reset_closes_immediately() {
        let faulty = Faulty {
            kind: std::io::ErrorKind::ConnectionReset,
            accept: usize::MAX,
        };
        let conn = connection(faulty, &LinkConfig::default());
        let health = conn.health();
        let (mut reader, _writer) = conn.split();

        assert!(reader.try_receive(Duration::from_millis(100)).await.is_err());
        assert_eq!(health.close_reason(), Some(CloseReason::ConnectionReset));
        assert_eq!(health.consecutive_errors(), 0);
    }

    #[tokio::test]
    async fn transient_errors_exhaust_the_budget() {
        let faulty = Faulty {
            kind: std::io::ErrorKind::Other,
            accept: usize::MAX,
        };
        let config = LinkConfig {
            error_threshold: 3,
            ..LinkConfig::default()
        };
        let conn = connection(faulty, &config);
        let health = conn.health();
        let (mut reader, _writer) = conn.split();

        for expected in 1..=2 {
            assert!(reader.try_receive(Duration::from_millis(100)).await.unwrap().is_none());
            assert_eq!(health.consecutive_errors(), expected);
            assert!(!health.is_closed());
        }
        let err = reader.try_receive(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, TransportError::ErrorBudgetExhausted { errors: 3 }));
        assert_eq!(health.close_reason(), Some(CloseReason::ErrorBudget));
    }

    /// Fails reads until `until`, then stays silent.
    struct Glitch {
        until: tokio::time::Instant,
    }

    impl AsyncRead for Glitch {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if tokio::time::Instant::now() < self.until {
                Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::Other, "glitch")))
            } else {
                Poll::Pending
            }
        }
    }

    impl AsyncWrite for Glitch {
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

    #[tokio::test]
    async fn short_read_glitch_does_not_exhaust_the_budget() {
        let config = LinkConfig::default();
        let glitch = Glitch {
            until: tokio::time::Instant::now() + Duration::from_millis(20),
        };
        let conn = connection(glitch, &config);
        let health = conn.health();
        let (mut reader, _writer) = conn.split();

        let started = tokio::time::Instant::now();
        assert!(reader.try_receive(config.read_timeout()).await.unwrap().is_none());
        assert!(started.elapsed() >= config.read_timeout());

        for _ in 0..5 {
            assert!(reader.try_receive(config.read_timeout()).await.unwrap().is_none());
        }
        assert!(!health.is_closed());
        assert_eq!(health.consecutive_errors(), 1);
    }

    #[tokio::test]
    async fn zero_byte_send_is_a_transmission_failure() {
        let faulty = Faulty {
            kind: std::io::ErrorKind::Other,
            accept: 0,
        };
        let conn = connection(faulty, &LinkConfig::default());
        let health = conn.health();
        let (_reader, mut writer) = conn.split();

        let err = writer.try_send(b"\xFF\xD8\xFF\xD9").await.unwrap_err();
        assert!(matches!(err, TransportError::TransmissionFailed { len: 4 }));
        assert_eq!(health.close_reason(), Some(CloseReason::TransmitFailed));
        assert!(writer.try_send(b"\x00").await.is_err());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_first_reason_wins() {
        let health = LinkHealth::new(10);
        assert!(health.close(CloseReason::PeerClosed));
        assert!(!health.close(CloseReason::Shutdown));
        assert_eq!(health.closed().await, CloseReason::PeerClosed);
    }

    #[tokio::test]
    async fn success_resets_the_error_count() {
        let health = LinkHealth::new(10);
        let err = std::io::Error::new(std::io::ErrorKind::Other, "blip");
        for _ in 0..9 {
            health.record_error("Receive", &err).unwrap();
        }
        assert_eq!(health.consecutive_errors(), 9);
        health.record_success();
        assert_eq!(health.consecutive_errors(), 0);
        for _ in 0..9 {
            health.record_error("Receive", &err).unwrap();
        }
        assert!(!health.is_closed());
    }
}
