//! Top-level entrypoint: two-tier admission over one-second windows.
//!
//! A [`RateLimiter`] enforces two ceilings at once: a limit per identifier (for
//! example a phone number) and a limit for the whole account. Each is a
//! [`WindowCounter`]; the limiter checks them in order and rolls back the first
//! when the second denies.

use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use dashmap::{DashMap, mapref::one::Ref};

use crate::{
    AccountCount, AdmissionDecision, CounterDecision, EvictionIntervalMs, IdentifierCounts,
    LimitScope, RETENTION_HORIZON, RateLimit, SystemTimeSource, TimeSource, WindowCounter,
    eviction::{EvictionLoop, EvictionReport},
    history::AdmissionHistory,
};

/// Configuration for [`RateLimiter`].
#[derive(Clone, Debug)]
pub struct RateLimiterOptions {
    /// Events admitted per identifier per one-second window.
    pub per_identifier_limit: RateLimit,
    /// Events admitted across all identifiers per one-second window.
    pub account_limit: RateLimit,
    /// Interval of the background eviction loop started by
    /// [`RateLimiter::run_eviction_loop`].
    pub eviction_interval_ms: EvictionIntervalMs,
}

/// Per-identifier and account-wide admission control.
///
/// # Algorithm
///
/// For `check(identifier)`:
///
/// 1. Increment the identifier's counter under `per_identifier_limit`.
///    If full, deny ([`LimitScope::Identifier`]).
/// 2. Increment the account counter under `account_limit`.
///    If full, decrement the identifier's counter and deny
///    ([`LimitScope::Account`]).
/// 3. Record the event in the history under the tick from step 1 and admit.
///
/// # Semantics & Limitations
///
/// **Compensation, not a transaction:**
/// - Steps 1 and 2 are separate CAS sequences; another caller may briefly see
///   the identifier counter incremented by a request the account later denies
/// - An admitted request always passed both CAS sequences, so neither ceiling
///   is ever exceeded
/// - The rollback in step 2 is skipped if the window rolled over in between;
///   the stale count then belongs to an old window and is ignored
///
/// **Fixed windows:**
/// - Windows are whole seconds of the [`TimeSource`]'s wall clock
/// - Up to twice a limit can pass across a window boundary
///
/// **Memory:**
/// - One counter per identifier seen, plus one history bucket per second with
///   admitted events
/// - Both are dropped by [`RateLimiter::evict`] once idle for
///   [`RETENTION_HORIZON`]; run it periodically with
///   [`RateLimiter::run_eviction_loop`]
///
/// # Examples
///
/// ```
/// use tiergate::{EvictionIntervalMs, RateLimit, RateLimiter, RateLimiterOptions};
///
/// let limiter = RateLimiter::new(RateLimiterOptions {
///     per_identifier_limit: RateLimit::try_from(1u64).unwrap(),
///     account_limit: RateLimit::try_from(100u64).unwrap(),
///     eviction_interval_ms: EvictionIntervalMs::default(),
/// });
///
/// assert!(limiter.check_and_record("+15550100"));
/// assert_eq!(limiter.account_counts().len(), 1);
/// ```
pub struct RateLimiter<T: TimeSource = SystemTimeSource> {
    per_identifier_limit: RateLimit,
    account_limit: RateLimit,
    eviction_interval: Duration,
    counters: DashMap<String, WindowCounter>,
    account: WindowCounter,
    history: AdmissionHistory,
    time_source: T,
    pub(crate) eviction_loop: Mutex<Option<EvictionLoop>>,
}

impl RateLimiter {
    /// Create a [`RateLimiter`] driven by the system clock.
    pub fn new(options: RateLimiterOptions) -> Self {
        Self::with_time_source(options, SystemTimeSource)
    }
}

impl<T: TimeSource> RateLimiter<T> {
    /// Create a [`RateLimiter`] driven by `time_source`.
    pub fn with_time_source(options: RateLimiterOptions, time_source: T) -> Self {
        Self {
            per_identifier_limit: options.per_identifier_limit,
            account_limit: options.account_limit,
            eviction_interval: options.eviction_interval_ms.into(),
            counters: DashMap::new(),
            account: WindowCounter::new(),
            history: AdmissionHistory::new(),
            time_source,
            eviction_loop: Mutex::new(None),
        }
    } // end constructor

    /// Run the admission protocol for one event of `identifier`.
    ///
    /// Never blocks on other callers beyond the registry shard lookup. On
    /// [`AdmissionDecision::Admitted`] both counters were incremented and the
    /// event is in the history; on [`AdmissionDecision::Rejected`] neither
    /// counter is left incremented (see the type-level notes on rollover).
    pub fn check(&self, identifier: &str) -> AdmissionDecision {
        // Holding the registry guard keeps eviction from removing the counter
        // between the increment and a possible rollback.
        let counter = self.counter(identifier);

        let CounterDecision::Applied(tick) =
            counter.try_increment(self.per_identifier_limit, &self.time_source)
        else {
            return AdmissionDecision::Rejected {
                scope: LimitScope::Identifier,
            };
        };

        if let CounterDecision::Rejected = self
            .account
            .try_increment(self.account_limit, &self.time_source)
        {
            if let CounterDecision::Rejected = counter.try_decrement(&self.time_source) {
                tracing::debug!(
                    identifier,
                    tick = tick.get(),
                    "window rolled over before rollback; identifier count left in old window"
                );
            }

            return AdmissionDecision::Rejected {
                scope: LimitScope::Account,
            };
        }

        drop(counter);
        self.history.record(tick, identifier);

        AdmissionDecision::Admitted { tick }
    } // end method check

    /// `true` if an event for `identifier` is admitted under both limits.
    ///
    /// Shorthand for [`RateLimiter::check`] followed by
    /// [`AdmissionDecision::is_admitted`].
    pub fn check_and_record(&self, identifier: &str) -> bool {
        self.check(identifier).is_admitted()
    }

    /// Admitted events per retained window, summed over identifiers, oldest first.
    pub fn account_counts(&self) -> Vec<AccountCount> {
        self.history.account_counts()
    }

    /// Admitted events per retained window and identifier, oldest first.
    pub fn per_identifier_counts(&self) -> Vec<IdentifierCounts> {
        self.history.per_identifier_counts()
    }

    /// Remove identifier counters idle for longer than [`RETENTION_HORIZON`] and
    /// history buckets whose window started before it.
    ///
    /// Each counter is tested and removed under its registry shard's write lock,
    /// so a counter refreshed by an in-flight request is never removed. The
    /// account counter is never evicted.
    pub fn evict(&self) -> EvictionReport {
        let horizon_ms = i64::try_from(RETENTION_HORIZON.as_millis()).unwrap_or(i64::MAX);
        let cutoff_ms = self
            .time_source
            .now()
            .timestamp_millis()
            .saturating_sub(horizon_ms);

        let mut removed_counters = 0;
        self.counters.retain(|_, counter| {
            let keep = !counter.is_idle_since(cutoff_ms);
            if !keep {
                removed_counters += 1;
            }
            keep
        });

        let removed_buckets = self.history.evict_before(cutoff_ms);

        EvictionReport {
            removed_counters,
            removed_buckets,
        }
    } // end method evict

    /// Number of identifiers that currently have a counter.
    pub fn tracked_identifiers(&self) -> usize {
        self.counters.len()
    }

    /// Number of windows currently retained in the history.
    pub fn retained_windows(&self) -> usize {
        self.history.len()
    }

    /// The clock this limiter reads.
    pub fn time_source(&self) -> &T {
        &self.time_source
    }

    pub(crate) fn eviction_interval(&self) -> Duration {
        self.eviction_interval
    }

    pub(crate) fn counters(&self) -> &DashMap<String, WindowCounter> {
        &self.counters
    }

    pub(crate) fn account(&self) -> &WindowCounter {
        &self.account
    }

    fn counter(&self, identifier: &str) -> Ref<'_, String, WindowCounter> {
        if let Some(counter) = self.counters.get(identifier) {
            return counter;
        }

        self.counters
            .entry(identifier.to_string())
            .or_default()
            .downgrade()
    }
} // end of impl

impl<T: TimeSource> Drop for RateLimiter<T> {
    fn drop(&mut self) {
        let eviction_loop = self
            .eviction_loop
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(eviction_loop) = eviction_loop {
            eviction_loop.stop();
        }
    }
}
