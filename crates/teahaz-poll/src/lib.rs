//! Poll scheduling and message tracking for Teahaz chatrooms.
//!
//! A chatroom learns about new messages by asking the server, once per
//! interval, for everything newer than its last checkpoint. This crate holds
//! the two pieces of that loop that don't touch the network:
//!
//! - [`PollScheduler`]: decides *when* to poll (interval, first-poll jitter,
//!   metrics).
//! - [`MessageTracker`]: decides *what is new* (checkpoint, seen-id dedup,
//!   send-time ordering, local history).
//!
//! # Integration
//!
//! The scheduler is designed to sit inside a chatroom's poll task next to a
//! stop signal:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = stop_rx.changed() => break,
//!         _ = scheduler.wait_for_poll() => {
//!             let since = tracker.advance(now());
//!             let batch = fetch_since(since).await;
//!             for msg in tracker.accept(batch) { notify(msg) }
//!             scheduler.schedule_next();
//!         }
//!     }
//! }
//! ```

mod tracker;

pub use tracker::{Accepted, MessageTracker};

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a chatroom's poll loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Time between two polls. Default: 1 s.
    pub interval: Duration,
    /// Random delay (0..max) before the *first* poll, so chatrooms opened
    /// together do not hit the server in lockstep. Default: 50 ms.
    pub initial_jitter: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            initial_jitter: Duration::from_millis(50),
        }
    }
}

impl PollConfig {
    /// Shortest interval the scheduler accepts.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

    /// A config with the given interval and default jitter.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`PollScheduler::new`]:
    /// - `interval` raised to at least [`Self::MIN_INTERVAL`].
    /// - `initial_jitter` capped to `interval`.
    pub fn validated(mut self) -> Self {
        if self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_ms = self.interval.as_millis() as u64,
                min_ms = Self::MIN_INTERVAL.as_millis() as u64,
                "poll interval below minimum, clamping"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        if self.initial_jitter > self.interval {
            self.initial_jitter = self.interval;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Counters kept by the scheduler. The poll task reports outcomes through
/// [`PollScheduler::record_failure`], [`PollScheduler::record_skip`] and
/// [`PollScheduler::record_batch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollMetrics {
    pub total_polls: u64,
    /// Polls whose fetch failed and counted as an empty batch.
    pub failed_polls: u64,
    /// Polls that made no request (no active channel).
    pub skipped_polls: u64,
    pub messages_accepted: u64,
    pub duplicates_dropped: u64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-interval poll scheduler. One per chatroom poll task.
pub struct PollScheduler {
    config: PollConfig,
    poll_count: u64,
    /// When the next poll is due (Tokio instant for `sleep_until`).
    next_poll: Instant,
    metrics: PollMetrics,
}

impl PollScheduler {
    /// Create a scheduler. The first poll is due after a random jitter
    /// in `0..initial_jitter`, not after a full interval.
    pub fn new(config: PollConfig) -> Self {
        let config = config.validated();

        let jitter = if config.initial_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max_us = config.initial_jitter.as_micros() as u64;
            Duration::from_micros(rand::rng().random_range(0..max_us))
        };

        debug!(
            interval_ms = config.interval.as_millis() as u64,
            jitter_us = jitter.as_micros() as u64,
            "poll scheduler created"
        );

        Self {
            next_poll: Instant::now() + jitter,
            config,
            poll_count: 0,
            metrics: PollMetrics::default(),
        }
    }

    /// Create a scheduler with the given interval and default jitter.
    pub fn with_interval(interval: Duration) -> Self {
        Self::new(PollConfig::with_interval(interval))
    }

    /// Wait until the next poll is due.
    ///
    /// Until [`schedule_next`](Self::schedule_next) is called, the poll
    /// after this one is due one interval from the moment this one fired.
    pub async fn wait_for_poll(&mut self) {
        let next = self.next_poll;
        time::sleep_until(next).await;

        let now = Instant::now();
        let late_by = now.saturating_duration_since(next);
        self.poll_count += 1;
        self.metrics.total_polls += 1;
        self.next_poll = now + self.config.interval;

        if late_by > self.config.interval {
            warn!(
                poll = self.poll_count,
                late_ms = late_by.as_millis() as u64,
                "poll fired more than one interval late"
            );
        }
        trace!(poll = self.poll_count, "poll fired");
    }

    /// Makes the next poll due one interval from now. Called when a poll
    /// finishes, so a slow fetch is always followed by a full pause.
    pub fn schedule_next(&mut self) {
        self.next_poll = Instant::now() + self.config.interval;
    }

    /// Count a poll whose fetch failed.
    pub fn record_failure(&mut self) {
        self.metrics.failed_polls += 1;
    }

    /// Count a poll that made no request.
    pub fn record_skip(&mut self) {
        self.metrics.skipped_polls += 1;
    }

    /// Count the outcome of a successful fetch.
    pub fn record_batch(&mut self, accepted: usize, duplicates: usize) {
        self.metrics.messages_accepted += accepted as u64;
        self.metrics.duplicates_dropped += duplicates as u64;
    }

    pub fn poll_count(&self) -> u64 {
        self.poll_count
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    pub fn metrics(&self) -> &PollMetrics {
        &self.metrics
    }
}
