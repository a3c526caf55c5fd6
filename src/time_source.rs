//! Clock abstraction consumed by the counters and the eviction loop.
//!
//! Everything time-dependent in this crate reads the clock through
//! [`TimeSource`], so admission and eviction can be driven deterministically in
//! tests with [`ManualTimeSource`].

use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};

use crate::{WindowTick, common::from_timestamp_millis};

/// A source of wall-clock time and of the current one-second window.
pub trait TimeSource: Send + Sync {
    /// Current wall-clock instant.
    fn now(&self) -> DateTime<Utc>;

    /// Window containing [`TimeSource::now`].
    ///
    /// Must be non-decreasing across calls under normal operation.
    #[inline]
    fn current_window_tick(&self) -> WindowTick {
        WindowTick::from_timestamp(self.now())
    }
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    #[inline]
    fn current_window_tick(&self) -> WindowTick {
        (**self).current_window_tick()
    }
}

/// System wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Intended for tests and load tools. Share it as `Arc<ManualTimeSource>` to keep a
/// handle after handing it to a [`RateLimiter`](crate::RateLimiter).
#[derive(Debug)]
pub struct ManualTimeSource {
    now_ms: AtomicI64,
}

impl ManualTimeSource {
    /// Create a clock frozen at `start` (millisecond precision).
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now_ms: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Move the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        self.now_ms.store(now.timestamp_millis(), Ordering::Release);
    }

    /// Move the clock forward by `by`. Saturates at the latest representable instant.
    pub fn advance(&self, by: Duration) {
        let by_ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        let _ = self
            .now_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |ms| {
                Some(ms.saturating_add(by_ms))
            });
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::default())
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> DateTime<Utc> {
        from_timestamp_millis(self.now_ms.load(Ordering::Acquire))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
