//! Keyframe recovery scheduling.
//!
//! The host calls `video_tick` regularly; if no video frame has been
//! delivered for a while the source asks the sender for a keyframe via
//! RTCP PLI. Covers the case where the first RTP packets arrive before a
//! keyframe, without hammering the sender.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Minimum spacing between keyframe requests, and the frame-gap that
/// triggers them.
pub const KEYFRAME_REQUEST_INTERVAL: Duration = Duration::from_millis(500);

/// Frame-arrival and request instants, shared between the decode path and
/// the host tick thread.
pub struct PliState {
    epoch: Instant,
    /// Milliseconds since `epoch` of the last delivered video frame
    last_frame_ms: AtomicU64,
    /// Milliseconds since `epoch` of the last keyframe request
    last_pli_ms: AtomicU64,
}

impl Default for PliState {
    fn default() -> Self {
        Self::new()
    }
}

impl PliState {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_frame_ms: AtomicU64::new(0),
            last_pli_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Record a delivered video frame. Called from the decode path.
    pub fn mark_frame(&self) {
        self.last_frame_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    /// Whether a keyframe request is due. Updates the request instant when
    /// it returns true, so requests are spaced at least one interval apart.
    pub fn should_request_keyframe(&self) -> bool {
        self.should_request_at(self.now_ms())
    }

    fn should_request_at(&self, now_ms: u64) -> bool {
        let interval = KEYFRAME_REQUEST_INTERVAL.as_millis() as u64;

        if now_ms.saturating_sub(self.last_frame_ms.load(Ordering::Relaxed)) < interval {
            return false;
        }
        if now_ms.saturating_sub(self.last_pli_ms.load(Ordering::Relaxed)) < interval {
            return false;
        }

        self.last_pli_ms.store(now_ms, Ordering::Relaxed);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_request_shortly_after_a_frame() {
        let state = PliState::new();
        state.last_frame_ms.store(1000, Ordering::Relaxed);
        assert!(!state.should_request_at(1400));
    }

    #[test]
    fn test_request_after_frame_gap() {
        let state = PliState::new();
        state.last_frame_ms.store(1000, Ordering::Relaxed);
        assert!(state.should_request_at(1600));
    }

    #[test]
    fn test_requests_are_rate_capped() {
        let state = PliState::new();
        state.last_frame_ms.store(0, Ordering::Relaxed);

        let mut granted = Vec::new();
        for now in (600..3000).step_by(100) {
            if state.should_request_at(now) {
                granted.push(now);
            }
        }

        assert!(!granted.is_empty());
        for pair in granted.windows(2) {
            assert!(pair[1] - pair[0] >= 500);
        }
    }
}
