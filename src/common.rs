use std::{ops::Deref, time::Duration};

use chrono::{DateTime, Utc};

use crate::TiergateError;

/// How long idle identifier counters and history buckets are retained.
pub const RETENTION_HORIZON: Duration = Duration::from_secs(60 * 60);

/// A validated per-window admission ceiling.
///
/// Must be greater than 0 and fit the 32-bit count field of a
/// [`WindowCounter`](crate::WindowCounter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RateLimit(u32);

impl RateLimit {
    /// The largest limit a counter can enforce.
    pub fn max() -> Self {
        Self(u32::MAX)
    }
}

impl Deref for RateLimit {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for RateLimit {
    type Error = TiergateError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            return Err(TiergateError::InvalidRateLimit(
                "Rate limit must be greater than 0".to_string(),
            ));
        }

        u32::try_from(value).map(Self).map_err(|_| {
            TiergateError::InvalidRateLimit(format!(
                "Rate limit must not exceed {}",
                u32::MAX
            ))
        })
    }
}

/// How often the background eviction loop sweeps stale state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EvictionIntervalMs(u64);

impl Default for EvictionIntervalMs {
    /// Returns an eviction interval of one minute.
    fn default() -> Self {
        Self(60_000)
    }
}

impl Deref for EvictionIntervalMs {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for EvictionIntervalMs {
    type Error = TiergateError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(TiergateError::InvalidEvictionInterval(
                "Eviction interval must be greater than 0".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

impl From<EvictionIntervalMs> for Duration {
    fn from(value: EvictionIntervalMs) -> Self {
        Duration::from_millis(value.0)
    }
}

/// Instant `ms` milliseconds after the Unix epoch, if representable.
pub(crate) fn from_timestamp_millis(ms: i64) -> Option<DateTime<Utc>> {
    let nanos = u32::try_from(ms.rem_euclid(1_000) * 1_000_000).ok()?;
    DateTime::from_timestamp(ms.div_euclid(1_000), nanos)
}

/// Identifier of a one-second admission window: whole seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct WindowTick(u64);

impl WindowTick {
    /// Tick containing `timestamp`. Instants before the epoch map to tick 0.
    pub fn from_timestamp(timestamp: DateTime<Utc>) -> Self {
        Self(u64::try_from(timestamp.timestamp()).unwrap_or(0))
    }

    /// Instant at which this window starts.
    pub fn window_start(self) -> DateTime<Utc> {
        i64::try_from(self.0)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Raw tick value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for WindowTick {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Outcome of a single [`WindowCounter`](crate::WindowCounter) mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterDecision {
    /// The mutation happened in the contained window.
    Applied(WindowTick),
    /// Nothing was mutated.
    Rejected,
}

impl CounterDecision {
    /// Tick the mutation was applied under, if any.
    pub fn tick(self) -> Option<WindowTick> {
        match self {
            Self::Applied(tick) => Some(tick),
            Self::Rejected => None,
        }
    }
}

/// Which of the two ceilings denied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitScope {
    /// The identifier's own per-window limit.
    Identifier,
    /// The account-wide per-window limit.
    Account,
}

/// Result of the two-tier admission protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Both counters admitted the event; it was recorded under `tick`.
    Admitted {
        /// Window the event was counted in.
        tick: WindowTick,
    },
    /// One of the ceilings was reached; no counter was left incremented.
    Rejected {
        /// Ceiling that denied the event.
        scope: LimitScope,
    },
}

impl AdmissionDecision {
    /// `true` for [`AdmissionDecision::Admitted`].
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}
