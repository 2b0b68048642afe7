//! Message count monitor
//!
//! Captures the number of message elements at creation and reports how far
//! the live count has moved since. The count cannot tell which message is
//! new, only that the transcript grew, so it is one signal among several.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::engine::Shared;
use crate::result::millis;

/// Count change observed at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountCheck {
    /// At least one message was added since the baseline
    pub verified: bool,
    pub initial_count: usize,
    pub count: usize,
    pub increase: i64,
}

impl CountCheck {
    pub fn new(initial_count: usize, count: usize) -> Self {
        let increase = signed_delta(initial_count, count);
        Self {
            verified: increase >= 1,
            initial_count,
            count,
            increase,
        }
    }
}

/// Outcome of [`CountMonitor::verify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountVerification {
    pub verified: bool,
    pub initial_count: usize,
    pub final_count: usize,
    pub actual_increase: i64,
    #[serde(default)]
    pub timed_out: bool,
    pub duration_ms: u64,
}

fn signed_delta(from: usize, to: usize) -> i64 {
    let from = i64::try_from(from).unwrap_or(i64::MAX);
    let to = i64::try_from(to).unwrap_or(i64::MAX);
    to - from
}

/// Baseline message count plus the means to poll against it
#[derive(Debug, Clone)]
pub struct CountMonitor {
    shared: Arc<Shared>,
    initial_count: usize,
}

impl CountMonitor {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let initial_count = shared.message_count();
        Self {
            shared,
            initial_count,
        }
    }

    pub fn initial_count(&self) -> usize {
        self.initial_count
    }

    /// Live count minus baseline; negative when messages were removed
    pub fn current_increase(&self) -> i64 {
        signed_delta(self.initial_count, self.shared.message_count())
    }

    pub fn check_now(&self) -> CountCheck {
        CountCheck::new(self.initial_count, self.shared.message_count())
    }

    /// Poll until the count grew by `expected_increase` (default 1)
    pub async fn verify(
        &self,
        expected_increase: Option<usize>,
        timeout: Option<Duration>,
    ) -> CountVerification {
        let config = &self.shared.config;
        let expected = i64::try_from(expected_increase.unwrap_or(1)).unwrap_or(i64::MAX);
        let timeout = config.timeout_or_default(timeout);
        let poll = config.poll_interval();
        let started = Instant::now();

        loop {
            let count = self.shared.message_count();
            let increase = signed_delta(self.initial_count, count);
            let elapsed = started.elapsed();

            if increase >= expected {
                self.shared
                    .log
                    .info(format!("Count increased: {} -> {}", self.initial_count, count));
                return CountVerification {
                    verified: true,
                    initial_count: self.initial_count,
                    final_count: count,
                    actual_increase: increase,
                    timed_out: false,
                    duration_ms: millis(elapsed),
                };
            }

            if elapsed >= timeout {
                self.shared.log.warn(format!(
                    "Count change timeout: {} -> {}",
                    self.initial_count, count
                ));
                return CountVerification {
                    verified: false,
                    initial_count: self.initial_count,
                    final_count: count,
                    actual_increase: increase,
                    timed_out: true,
                    duration_ms: millis(elapsed),
                };
            }

            tokio::time::sleep(poll.min(timeout - elapsed)).await;
        }
    }
}
