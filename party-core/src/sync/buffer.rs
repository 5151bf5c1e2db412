//! Buffering detection from player progress reports

/// Consider a player stalled if its position hasn't advanced in this long (ms)
pub const BUFFER_TIMEOUT_MS: u64 = 8000;

/// Minimum position change that counts as real progress (seconds)
pub const PROGRESS_EPSILON_SECONDS: f64 = 0.1;

/// Tracks when a player's reported position last really moved
#[derive(Debug, Clone)]
pub struct BufferDetector {
    timeout_ms: u64,
    epsilon: f64,
    /// Wall clock of the last real advancement
    last_progress_ms: u64,
    /// Position at the last real advancement
    last_video_time: f64,
    buffering: bool,
}

impl BufferDetector {
    pub fn new(now_ms: u64) -> Self {
        Self::with_limits(now_ms, BUFFER_TIMEOUT_MS, PROGRESS_EPSILON_SECONDS)
    }

    pub fn with_limits(now_ms: u64, timeout_ms: u64, epsilon: f64) -> Self {
        Self {
            timeout_ms,
            epsilon,
            last_progress_ms: now_ms,
            last_video_time: 0.0,
            buffering: false,
        }
    }

    /// Feed a position report. Changes smaller than epsilon are not progress.
    pub fn report_progress(&mut self, video_time: f64, now_ms: u64) {
        if (video_time - self.last_video_time).abs() > self.epsilon {
            self.last_progress_ms = now_ms;
            self.last_video_time = video_time;
            self.buffering = false;
        }
    }

    /// Whether the player is currently considered stalled
    pub fn check(&mut self, now_ms: u64) -> bool {
        if now_ms.saturating_sub(self.last_progress_ms) > self.timeout_ms {
            self.buffering = true;
        }
        self.buffering
    }

    /// Restart the timeout window without touching the last position.
    ///
    /// Used when progress is not expected (paused) so the pause itself isn't
    /// later mistaken for a stall.
    pub fn hold(&mut self, now_ms: u64) {
        self.last_progress_ms = now_ms;
        self.buffering = false;
    }

    pub fn reset(&mut self, now_ms: u64) {
        self.last_progress_ms = now_ms;
        self.last_video_time = 0.0;
        self.buffering = false;
    }
}
