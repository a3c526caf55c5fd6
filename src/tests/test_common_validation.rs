use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::{
    AdmissionDecision, CounterDecision, EvictionIntervalMs, LimitScope, RateLimit, TiergateError,
    WindowTick,
};

#[test]
fn rate_limit_try_from_validates_positive() {
    let rl = RateLimit::try_from(1u64).unwrap();
    assert_eq!(*rl, 1);

    assert_eq!(
        RateLimit::try_from(0u64).unwrap_err(),
        TiergateError::InvalidRateLimit("Rate limit must be greater than 0".to_string())
    );

    assert_eq!(*RateLimit::max(), u32::MAX);
}

#[test]
fn rate_limit_try_from_rejects_values_beyond_counter_width() {
    assert!(RateLimit::try_from(u64::from(u32::MAX)).is_ok());

    let err = RateLimit::try_from(u64::from(u32::MAX) + 1).unwrap_err();
    assert!(matches!(err, TiergateError::InvalidRateLimit(_)));
    assert!(err.to_string().starts_with("invalid rate limit:"));
}

#[test]
fn eviction_interval_ms_try_from_validates_nonzero() {
    let i = EvictionIntervalMs::try_from(250u64).unwrap();
    assert_eq!(*i, 250);
    assert_eq!(Duration::from(i), Duration::from_millis(250));

    assert_eq!(
        EvictionIntervalMs::try_from(0u64).unwrap_err(),
        TiergateError::InvalidEvictionInterval(
            "Eviction interval must be greater than 0".to_string()
        )
    );

    assert_eq!(*EvictionIntervalMs::default(), 60_000);
}

#[test]
fn window_tick_floors_to_whole_seconds() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let later_in_same_second = start + chrono::TimeDelta::milliseconds(999);
    let next_second = start + chrono::TimeDelta::milliseconds(1_000);

    let tick = WindowTick::from_timestamp(start);
    assert_eq!(tick.get(), start.timestamp() as u64);
    assert_eq!(WindowTick::from_timestamp(later_in_same_second), tick);
    assert_eq!(WindowTick::from_timestamp(next_second).get(), tick.get() + 1);

    assert_eq!(tick.window_start(), start);
    assert_eq!(WindowTick::from_timestamp(later_in_same_second).window_start(), start);
}

#[test]
fn window_tick_before_epoch_is_zero() {
    let before_epoch = DateTime::from_timestamp(-5, 0).unwrap();
    assert_eq!(WindowTick::from_timestamp(before_epoch).get(), 0);
}

#[test]
fn decisions_expose_their_outcome() {
    let tick = WindowTick::from(7);

    assert_eq!(CounterDecision::Applied(tick).tick(), Some(tick));
    assert_eq!(CounterDecision::Rejected.tick(), None);

    assert!(AdmissionDecision::Admitted { tick }.is_admitted());
    assert!(
        !AdmissionDecision::Rejected {
            scope: LimitScope::Account
        }
        .is_admitted()
    );
}
