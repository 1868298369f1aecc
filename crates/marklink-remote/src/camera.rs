//! Camera frame sources.
//!
//! A [`FrameSource`] yields complete JPEG buffers. The endpoint never looks
//! inside them; the station finds frame boundaries from the SOI/EOI markers.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use marklink_transport::SupervisorStatus;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, trace};

#[async_trait]
pub trait FrameSource: Send {
    /// Await the next encoded frame. `None` when the camera is gone.
    async fn next_frame(&mut self) -> Option<Bytes>;
}

// ── SyntheticCamera ───────────────────────────────────────────────────────────

/// Generates small JPEG-shaped test-pattern frames at a fixed pace.
///
/// Each frame is `SOI`, a JFIF `APP0` segment, a body carrying the frame
/// counter and a gradient, then `EOI`. The body never contains `0xFF`, so a
/// reassembler sees exactly one frame per buffer.
pub struct SyntheticCamera {
    ticker: Interval,
    body_len: usize,
    sequence: u32,
    limit: Option<u32>,
}

impl SyntheticCamera {
    pub fn new(frame_interval: Duration, body_len: usize) -> Self {
        let mut ticker = interval(frame_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ticker,
            body_len,
            sequence: 0,
            limit: None,
        }
    }

    /// Stop after `frames` frames.
    pub fn with_limit(mut self, frames: u32) -> Self {
        self.limit = Some(frames);
        self
    }

    pub fn frames_generated(&self) -> u32 {
        self.sequence
    }

    /// Build the frame for `sequence` without waiting.
    pub fn render(sequence: u32, body_len: usize) -> Bytes {
        const APP0: [u8; 18] = [
            0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00, 0x01,
            0x00, 0x01, 0x00, 0x00,
        ];

        let mut out = BytesMut::with_capacity(2 + APP0.len() + 4 + body_len + 2);
        out.put_slice(&[0xFF, 0xD8]);
        out.put_slice(&APP0);
        // Frame counter in 7-bit groups, so no byte is 0xFF.
        for shift in [21u32, 14, 7, 0] {
            out.put_u8(((sequence >> shift) & 0x7F) as u8);
        }
        for i in 0..body_len {
            out.put_u8(((i as u32 + sequence) % 0xFE) as u8);
        }
        out.put_slice(&[0xFF, 0xD9]);
        out.freeze()
    }
}

#[async_trait]
impl FrameSource for SyntheticCamera {
    async fn next_frame(&mut self) -> Option<Bytes> {
        if self.limit.is_some_and(|limit| self.sequence >= limit) {
            return None;
        }
        self.ticker.tick().await;
        let frame = Self::render(self.sequence, self.body_len);
        self.sequence = self.sequence.wrapping_add(1);
        Some(frame)
    }
}

// ── Capture pump ──────────────────────────────────────────────────────────────

/// Move frames from `source` into the outbound frame queue until the source
/// ends, the queue closes, or `shutdown` is set. Frames captured while `link`
/// is not `CONNECTED` are dropped. Returns the number of frames queued.
pub async fn pump<S: FrameSource>(
    mut source: S,
    frames: mpsc::UnboundedSender<Bytes>,
    link: watch::Receiver<SupervisorStatus>,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let mut queued = 0u64;
    let mut skipped = 0u64;
    loop {
        let frame = tokio::select! {
            frame = source.next_frame() => frame,
            _ = shutdown.changed() => break,
        };
        let Some(frame) = frame else {
            info!("Camera stream ended after {} frames", queued + skipped);
            break;
        };
        if !link.borrow().state.is_active() {
            trace!("Link down; dropping frame of {} bytes", frame.len());
            skipped += 1;
            continue;
        }
        if frames.send(frame).is_err() {
            debug!("Frame queue closed; stopping capture");
            break;
        }
        queued += 1;
    }
    if skipped > 0 {
        debug!("Dropped {} frames captured while disconnected", skipped);
    }
    queued
}
