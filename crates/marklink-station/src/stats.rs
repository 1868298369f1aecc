use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Frame counters with a rolling one-second rate.
#[derive(Debug)]
pub struct FrameStats {
    window: Duration,
    recent: VecDeque<Instant>,
    pub frames: u64,
    pub bytes: u64,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::with_window(Duration::from_secs(1))
    }
}

impl FrameStats {
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            recent: VecDeque::new(),
            frames: 0,
            bytes: 0,
        }
    }

    pub fn record(&mut self, len: usize, now: Instant) {
        self.frames += 1;
        self.bytes += len as u64;
        self.recent.push_back(now);
        self.expire(now);
    }

    /// Frames per second over the window ending at `now`.
    pub fn fps(&mut self, now: Instant) -> f64 {
        self.expire(now);
        self.recent.len() as f64 / self.window.as_secs_f64()
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&oldest) = self.recent.front() {
            if now.duration_since(oldest) > self.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }
}
