use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::{
    CounterDecision, RateLimit, TimeSource, WindowTick, common::from_timestamp_millis,
};

const NEVER_ACCESSED: i64 = i64::MIN;

/// Lock-free one-second window counter for a single key.
///
/// The window tick and the count are packed into one `AtomicU64`
/// (`[32-bit tick][32-bit count]`) so every mutation is a single
/// compare-and-swap and readers never observe a tick from one window paired
/// with a count from another.
///
/// # Window rollover
///
/// When [`TimeSource::current_window_tick`] moves past the stored tick, the
/// effective count is 0. The first writer to notice advances the word to
/// `(current, 0)` with one CAS; concurrent writers that lose that CAS re-read
/// the word instead of resetting it a second time.
///
/// # Limitations
///
/// Ticks are stored in 32 bits, which covers Unix seconds up to the year 2106.
/// Later ticks saturate.
#[derive(Debug)]
pub struct WindowCounter {
    state: AtomicU64,
    last_accessed_ms: AtomicI64,
}

impl Default for WindowCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowCounter {
    /// A counter at tick 0 with no admitted events.
    pub fn new() -> Self {
        Self {
            state: AtomicU64::new(0),
            last_accessed_ms: AtomicI64::new(NEVER_ACCESSED),
        }
    }

    #[inline]
    const fn pack(tick: u32, count: u32) -> u64 {
        ((tick as u64) << 32) | (count as u64)
    }

    #[inline]
    const fn unpack(state: u64) -> (u32, u32) {
        ((state >> 32) as u32, state as u32)
    }

    #[inline]
    fn packed_tick(tick: WindowTick) -> u32 {
        u32::try_from(tick.get()).unwrap_or(u32::MAX)
    }

    /// Admit one event if the current window still has room under `limit`.
    ///
    /// Returns [`CounterDecision::Applied`] with the tick the event was counted
    /// in, or [`CounterDecision::Rejected`] without touching the counter when
    /// the window is full.
    ///
    /// Optimistic retry loop: under contention it may retry, never blocks.
    pub fn try_increment<T>(&self, limit: RateLimit, time: &T) -> CounterDecision
    where
        T: TimeSource + ?Sized,
    {
        let current = Self::packed_tick(time.current_window_tick());

        loop {
            let state = self.state.load(Ordering::Acquire);
            let (tick, count) = Self::unpack(state);

            if current > tick {
                // Losers re-read the winner's reset instead of resetting again.
                let _ = self.state.compare_exchange(
                    state,
                    Self::pack(current, 0),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                continue;
            }

            // A stored tick newer than `current` means another caller read the
            // clock later; count under that window.
            if count >= *limit {
                return CounterDecision::Rejected;
            }

            if self
                .state
                .compare_exchange_weak(
                    state,
                    Self::pack(tick, count + 1),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.touch(time.now());
                return CounterDecision::Applied(WindowTick::from(u64::from(tick)));
            }
        }
    } // end method try_increment

    /// Undo one earlier [`WindowCounter::try_increment`] made in the current window.
    ///
    /// A no-op returning [`CounterDecision::Rejected`] when the window has rolled
    /// over since (the count now belongs to a different window) or when the
    /// count is already 0.
    pub fn try_decrement<T>(&self, time: &T) -> CounterDecision
    where
        T: TimeSource + ?Sized,
    {
        let current = Self::packed_tick(time.current_window_tick());

        loop {
            let state = self.state.load(Ordering::Acquire);
            let (tick, count) = Self::unpack(state);

            if tick != current || count == 0 {
                return CounterDecision::Rejected;
            }

            if self
                .state
                .compare_exchange_weak(
                    state,
                    Self::pack(tick, count - 1),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.touch(time.now());
                return CounterDecision::Applied(WindowTick::from(u64::from(tick)));
            }
        }
    } // end method try_decrement

    /// Stored tick and count, without regard to the current time.
    pub fn snapshot(&self) -> (WindowTick, u32) {
        let (tick, count) = Self::unpack(self.state.load(Ordering::Acquire));
        (WindowTick::from(u64::from(tick)), count)
    }

    /// Effective count for `tick`: the stored count if it belongs to `tick`, else 0.
    pub fn count_in(&self, tick: WindowTick) -> u32 {
        let (stored, count) = Self::unpack(self.state.load(Ordering::Acquire));

        if stored == Self::packed_tick(tick) {
            count
        } else {
            0
        }
    }

    /// Instant of the last successful mutation, if there has been one.
    pub fn last_accessed(&self) -> Option<DateTime<Utc>> {
        match self.last_accessed_ms.load(Ordering::Acquire) {
            NEVER_ACCESSED => None,
            ms => from_timestamp_millis(ms),
        }
    }

    /// `true` when the counter has not been mutated since `cutoff_ms`.
    pub(crate) fn is_idle_since(&self, cutoff_ms: i64) -> bool {
        self.last_accessed_ms.load(Ordering::Acquire) < cutoff_ms
    }

    #[inline]
    fn touch(&self, now: DateTime<Utc>) {
        self.last_accessed_ms.fetch_max(now.timestamp_millis(), Ordering::AcqRel);
    }
}
