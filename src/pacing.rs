//! Request pacing.
//!
//! Baseline mode spreads requests over the whole duration; burst mode packs
//! them into the first half and then idles until the full duration has passed.

use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use crate::models::{TestConfig, TestMode};

/// Delay between consecutive requests in milliseconds.
///
/// Integer arithmetic throughout; a result of 0 means back-to-back requests.
pub fn interval_ms(config: &TestConfig) -> u64 {
    let requests = u64::from(config.total_requests.max(1));
    let duration = u64::from(config.duration);
    match config.test_mode {
        TestMode::Baseline => duration * 1000 / requests,
        TestMode::Burst => (duration / 2) * 1000 / requests,
    }
}

/// Drives the timing of one session's requests
#[derive(Debug, Clone)]
pub struct Pacer {
    mode: TestMode,
    interval: Duration,
    duration: Duration,
    started: Instant,
}

impl Pacer {
    /// Start pacing now
    pub fn new(config: &TestConfig) -> Self {
        Self {
            mode: config.test_mode,
            interval: Duration::from_millis(interval_ms(config)),
            duration: Duration::from_secs(u64::from(config.duration)),
            started: Instant::now(),
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Wait one interval. Returns `false` if cancelled before it elapsed.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        if self.interval.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = sleep(self.interval) => true,
        }
    }

    /// Time left of the configured duration after the last burst request
    pub fn burst_tail(&self) -> Duration {
        match self.mode {
            TestMode::Burst => self.duration.saturating_sub(self.started.elapsed()),
            TestMode::Baseline => Duration::ZERO,
        }
    }

    /// Idle out the rest of a burst. Returns `false` if cancelled first.
    pub async fn finish(&self, cancel: &CancellationToken) -> bool {
        let tail = self.burst_tail();
        if tail.is_zero() {
            return true;
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = sleep(tail) => true,
        }
    }
}
