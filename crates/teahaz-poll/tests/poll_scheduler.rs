//! Integration tests for the poll scheduler.
//!
//! Uses paused Tokio time so `sleep_until` resolves as soon as the runtime
//! has nothing else to do, and `Instant` differences are exact.

use std::time::Duration;

use teahaz_poll::{PollConfig, PollScheduler};
use tokio::time::Instant;

// =========================================================================
// Helpers
// =========================================================================

fn no_jitter(interval_ms: u64) -> PollConfig {
    PollConfig {
        interval: Duration::from_millis(interval_ms),
        initial_jitter: Duration::ZERO,
    }
}

// =========================================================================
// PollConfig
// =========================================================================

#[test]
fn test_default_config_polls_every_second() {
    let cfg = PollConfig::default();
    assert_eq!(cfg.interval, Duration::from_secs(1));
    assert_eq!(cfg.initial_jitter, Duration::from_millis(50));
}

#[test]
fn test_validated_clamps_tiny_interval() {
    let cfg = PollConfig::with_interval(Duration::from_millis(1)).validated();
    assert_eq!(cfg.interval, PollConfig::MIN_INTERVAL);
    assert!(cfg.initial_jitter <= cfg.interval);
}

#[test]
fn test_config_loads_from_json_with_defaults() {
    let cfg: PollConfig =
        serde_json::from_str(r#"{ "interval": { "secs": 2, "nanos": 0 } }"#).unwrap();
    assert_eq!(cfg.interval, Duration::from_secs(2));
    assert_eq!(cfg.initial_jitter, PollConfig::default().initial_jitter);
}

// =========================================================================
// Poll firing
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_first_poll_fires_without_waiting_an_interval() {
    let mut s = PollScheduler::new(no_jitter(500));
    let start = Instant::now();

    s.wait_for_poll().await;

    assert_eq!(s.poll_count(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_first_poll_respects_jitter_bound() {
    let mut s = PollScheduler::new(PollConfig {
        interval: Duration::from_millis(500),
        initial_jitter: Duration::from_millis(50),
    });
    let start = Instant::now();

    s.wait_for_poll().await;

    assert!(start.elapsed() < Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn test_polls_are_one_interval_apart() {
    let mut s = PollScheduler::new(no_jitter(200));
    s.wait_for_poll().await;
    let start = Instant::now();

    s.wait_for_poll().await;
    s.wait_for_poll().await;

    assert_eq!(start.elapsed(), Duration::from_millis(400));
    assert_eq!(s.poll_count(), 3);
    assert_eq!(s.metrics().total_polls, 3);
}

#[tokio::test(start_paused = true)]
async fn test_schedule_next_after_slow_poll_waits_full_interval() {
    let mut s = PollScheduler::new(no_jitter(100));
    s.wait_for_poll().await;

    // The poll body takes far longer than one interval.
    tokio::time::sleep(Duration::from_millis(350)).await;
    s.schedule_next();
    let start = Instant::now();
    s.wait_for_poll().await;

    assert_eq!(start.elapsed(), Duration::from_millis(100));
    assert_eq!(s.poll_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_without_schedule_next_late_poll_fires_at_once() {
    let mut s = PollScheduler::new(no_jitter(100));
    s.wait_for_poll().await;

    tokio::time::sleep(Duration::from_millis(350)).await;
    let start = Instant::now();
    s.wait_for_poll().await;

    assert_eq!(start.elapsed(), Duration::ZERO);
}

// =========================================================================
// Metrics
// =========================================================================

#[test]
fn test_metrics_accumulate_outcomes() {
    let mut s = PollScheduler::with_interval(Duration::from_secs(1));

    s.record_skip();
    s.record_failure();
    s.record_batch(3, 1);
    s.record_batch(2, 0);

    let m = s.metrics();
    assert_eq!(m.skipped_polls, 1);
    assert_eq!(m.failed_polls, 1);
    assert_eq!(m.messages_accepted, 5);
    assert_eq!(m.duplicates_dropped, 1);
    assert_eq!(s.interval(), Duration::from_secs(1));
}
