use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{TimeZone, Utc};

use crate::{
    EvictionIntervalMs, ManualTimeSource, RateLimit, RateLimiter, RateLimiterOptions,
};

type TestLimiter = RateLimiter<Arc<ManualTimeSource>>;

fn limiter(eviction_interval_ms: u64) -> (Arc<ManualTimeSource>, Arc<TestLimiter>) {
    let clock = Arc::new(ManualTimeSource::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    ));

    let rl = RateLimiter::with_time_source(
        RateLimiterOptions {
            per_identifier_limit: RateLimit::try_from(10u64).unwrap(),
            account_limit: RateLimit::try_from(100u64).unwrap(),
            eviction_interval_ms: EvictionIntervalMs::try_from(eviction_interval_ms).unwrap(),
        },
        Arc::clone(&clock),
    );

    (clock, Arc::new(rl))
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    loop {
        if done() {
            return true;
        }
        if start.elapsed() > deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn eviction_loop_removes_stale_state() {
    let (clock, rl) = limiter(20);

    assert!(rl.check_and_record("key1"));
    assert!(rl.check_and_record("key2"));
    assert!(rl.check_and_record("key3"));
    assert_eq!(rl.tracked_identifiers(), 3);
    assert_eq!(rl.retained_windows(), 1);

    clock.advance(Duration::from_secs(60 * 60 + 1));
    rl.run_eviction_loop();
    assert!(rl.is_eviction_loop_running());

    assert!(
        wait_until(Duration::from_secs(2), || rl.tracked_identifiers() == 0),
        "expected eviction loop to remove idle counters"
    );
    assert_eq!(rl.retained_windows(), 0);

    rl.stop_eviction_loop();
    assert!(!rl.is_eviction_loop_running());
}

#[test]
fn eviction_loop_keeps_active_entries() {
    let (clock, rl) = limiter(20);

    assert!(rl.check_and_record("key1"));
    rl.run_eviction_loop();

    // keep key1 refreshed while the clock moves well past the horizon
    for _ in 0..10 {
        clock.advance(Duration::from_secs(10 * 60));
        assert!(rl.check_and_record("key1"));
        std::thread::sleep(Duration::from_millis(30));
    }

    assert_eq!(rl.tracked_identifiers(), 1);
    rl.stop_eviction_loop();
}

#[test]
fn stop_eviction_loop_prevents_future_eviction() {
    let (clock, rl) = limiter(100);

    assert!(rl.check_and_record("key1"));

    // the first pass is one interval away, stop before it
    rl.run_eviction_loop();
    clock.advance(Duration::from_secs(2 * 60 * 60));

    // idempotent stop
    rl.stop_eviction_loop();
    rl.stop_eviction_loop();
    assert!(!rl.is_eviction_loop_running());

    std::thread::sleep(Duration::from_millis(250));
    assert_eq!(rl.tracked_identifiers(), 1);
}

#[test]
fn run_eviction_loop_is_idempotent() {
    let (clock, rl) = limiter(60_000);

    assert!(rl.check_and_record("key1"));
    clock.advance(Duration::from_secs(2 * 60 * 60));

    // already running with a one-minute interval; the short one is ignored
    rl.run_eviction_loop();
    rl.run_eviction_loop_with_interval(Duration::from_millis(10));

    std::thread::sleep(Duration::from_millis(120));
    assert_eq!(rl.tracked_identifiers(), 1);
    assert_eq!(rl.eviction_loop_interval(), Some(Duration::from_secs(60)));

    rl.stop_eviction_loop();
}

#[test]
fn zero_interval_is_raised_to_one_millisecond() {
    let (clock, rl) = limiter(60_000);

    assert!(rl.check_and_record("key1"));
    clock.advance(Duration::from_secs(2 * 60 * 60));

    rl.run_eviction_loop_with_interval(Duration::ZERO);
    assert_eq!(rl.eviction_loop_interval(), Some(Duration::from_millis(1)));

    assert!(
        wait_until(Duration::from_secs(2), || rl.tracked_identifiers() == 0),
        "expected eviction at the minimum interval"
    );

    rl.stop_eviction_loop();
    assert_eq!(rl.eviction_loop_interval(), None);
}

#[test]
fn stop_then_restart_eviction_loop_works() {
    let (clock, rl) = limiter(100);

    assert!(rl.check_and_record("key1"));
    rl.run_eviction_loop();
    rl.stop_eviction_loop();

    clock.advance(Duration::from_secs(2 * 60 * 60));
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(rl.tracked_identifiers(), 1);

    rl.run_eviction_loop_with_interval(Duration::from_millis(20));
    assert!(
        wait_until(Duration::from_secs(2), || rl.tracked_identifiers() == 0),
        "expected restarted loop to evict"
    );

    rl.stop_eviction_loop();
}

#[test]
fn dropping_limiter_ends_eviction_loop() {
    let (_clock, rl) = limiter(20);
    rl.run_eviction_loop();

    let weak = Arc::downgrade(&rl);
    drop(rl);

    // a pass in flight may briefly hold the last strong reference
    assert!(wait_until(Duration::from_secs(2), || weak
        .upgrade()
        .is_none()));
}
