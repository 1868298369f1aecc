//! JPEG frame reassembly from an unframed byte stream.
//!
//! The remote endpoint writes JPEG images back to back with no length
//! prefix. Image boundaries are recovered from the in-band markers:
//!
//! ```text
//! … noise … FF D8 <image bytes> FF D9  FF D8 <image bytes> FF D9 …
//!           └─ SOI ──────────── EOI ┘  └─ SOI ──────────── EOI ┘
//! ```
//!
//! Chunks arrive with arbitrary boundaries: a chunk may hold the tail of one
//! image and the head of the next, several whole images, or a marker split
//! across two reads. Every chunk is scanned to the end, so all of these
//! produce the same frames as a single contiguous read.

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

/// Start-of-image marker.
pub const SOI: [u8; 2] = [0xFF, 0xD8];
/// End-of-image marker.
pub const EOI: [u8; 2] = [0xFF, 0xD9];

const MARKER_PREFIX: u8 = 0xFF;
const SOI_CODE: u8 = 0xD8;
const EOI_CODE: u8 = 0xD9;

/// Stateful scanner turning raw chunks into complete JPEG buffers.
///
/// Bytes outside a `SOI … EOI` span are discarded. A `SOI` seen while a frame
/// is already in progress restarts the frame at that marker. Malformed input
/// never errors; it simply produces no frame.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    buffer: BytesMut,
    active: bool,
    /// The previous chunk ended in `0xFF` while no frame was active.
    pending_prefix: bool,
    max_frame_bytes: Option<usize>,
    frames_emitted: u64,
    frames_dropped: u64,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any in-progress frame once it grows past `limit` bytes.
    pub fn with_max_frame_bytes(limit: Option<usize>) -> Self {
        Self {
            max_frame_bytes: limit,
            ..Self::default()
        }
    }

    /// Feed one chunk; returns every frame it completed, in stream order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut frames = Vec::new();
        let mut pos = 0;

        while pos < chunk.len() {
            if self.active {
                pos = self.scan_active(chunk, pos, &mut frames);
            } else {
                pos = self.scan_idle(chunk, pos);
            }
        }

        frames
    }

    /// Forget the in-progress frame. Called whenever a new connection starts.
    pub fn reset(&mut self) {
        if self.active {
            debug!("Discarding {} buffered bytes of an incomplete frame", self.buffer.len());
        }
        self.buffer.clear();
        self.active = false;
        self.pending_prefix = false;
    }

    /// A start marker has been seen and the end marker has not.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    /// Frames abandoned because they exceeded the size cap.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    fn begin_frame(&mut self) {
        self.buffer.clear();
        self.buffer.extend_from_slice(&SOI);
        self.active = true;
        self.pending_prefix = false;
    }

    /// Look for the next SOI; returns the position after it (or the chunk end).
    fn scan_idle(&mut self, chunk: &[u8], pos: usize) -> usize {
        if pos == 0 && self.pending_prefix && chunk[0] == SOI_CODE {
            self.begin_frame();
            return 1;
        }

        match find_marker(&chunk[pos..], SOI_CODE) {
            Some(i) => {
                self.begin_frame();
                pos + i + 2
            }
            None => {
                self.pending_prefix = chunk.last() == Some(&MARKER_PREFIX);
                chunk.len()
            }
        }
    }

    /// Accumulate until EOI (emit) or SOI (restart); returns the new position.
    fn scan_active(&mut self, chunk: &[u8], pos: usize, frames: &mut Vec<Bytes>) -> usize {
        // Marker split across the previous chunk and this one. The first two
        // buffered bytes are the SOI itself, so only a later 0xFF counts.
        if pos == 0 && self.buffer.len() > SOI.len() && self.buffer.last() == Some(&MARKER_PREFIX) {
            match chunk[0] {
                EOI_CODE => {
                    self.buffer.extend_from_slice(&chunk[..1]);
                    self.finish_frame(frames);
                    return 1;
                }
                SOI_CODE => {
                    debug!("Start marker inside an active frame; restarting");
                    self.begin_frame();
                    return 1;
                }
                _ => {}
            }
        }

        let rest = &chunk[pos..];
        match find_any_marker(rest) {
            Some((i, EOI_CODE)) => {
                self.buffer.extend_from_slice(&rest[..i + 2]);
                self.finish_frame(frames);
                pos + i + 2
            }
            Some((i, _)) => {
                debug!("Start marker inside an active frame; restarting");
                self.begin_frame();
                pos + i + 2
            }
            None => {
                self.buffer.extend_from_slice(rest);
                self.enforce_cap();
                chunk.len()
            }
        }
    }

    fn finish_frame(&mut self, frames: &mut Vec<Bytes>) {
        self.active = false;
        if let Some(limit) = self.over_cap() {
            warn!(
                "Dropping complete frame of {} bytes (limit {})",
                self.buffer.len(),
                limit
            );
            self.frames_dropped += 1;
            self.buffer.clear();
            return;
        }
        self.frames_emitted += 1;
        frames.push(self.buffer.split().freeze());
    }

    fn enforce_cap(&mut self) {
        if let Some(limit) = self.over_cap() {
            warn!(
                "Dropping frame after {} bytes without an end marker (limit {})",
                self.buffer.len(),
                limit
            );
            self.frames_dropped += 1;
            self.buffer.clear();
            self.active = false;
        }
    }

    /// The configured limit, if the buffered frame exceeds it.
    fn over_cap(&self) -> Option<usize> {
        self.max_frame_bytes.filter(|&limit| self.buffer.len() > limit)
    }
}

/// Offset of the first `FF <code>` pair.
fn find_marker(haystack: &[u8], code: u8) -> Option<usize> {
    haystack
        .windows(2)
        .position(|w| w[0] == MARKER_PREFIX && w[1] == code)
}

/// Offset and code of the first `FF D8` or `FF D9` pair.
fn find_any_marker(haystack: &[u8]) -> Option<(usize, u8)> {
    haystack.windows(2).enumerate().find_map(|(i, w)| {
        (w[0] == MARKER_PREFIX && (w[1] == SOI_CODE || w[1] == EOI_CODE)).then_some((i, w[1]))
    })
}
