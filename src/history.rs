use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::WindowTick;

/// Admitted events across all identifiers during one window.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize),
    serde(rename_all = "camelCase")
)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AccountCount {
    /// Start of the one-second window.
    pub window_start: DateTime<Utc>,
    /// Sum of every identifier's admitted events in the window.
    pub count: u64,
}

/// Admitted events of one identifier during one window.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize),
    serde(rename_all = "camelCase")
)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct IdentifierCount {
    /// The identifier events were admitted for.
    pub identifier: String,
    /// Admitted events.
    pub count: u64,
}

/// Per-identifier breakdown of one window.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize),
    serde(rename_all = "camelCase")
)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct IdentifierCounts {
    /// Start of the one-second window.
    pub window_start: DateTime<Utc>,
    /// Identifiers with at least one admitted event, sorted by identifier.
    pub identifiers: Vec<IdentifierCount>,
}

/// Rolling record of admitted events, bucketed by window.
///
/// Observational only: admission never reads it. Buckets are created by the
/// first admitted event of a window and removed only by eviction.
#[derive(Debug, Default)]
pub(crate) struct AdmissionHistory {
    buckets: DashMap<WindowTick, DashMap<String, u64>>,
}

impl AdmissionHistory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Count one admitted event for `identifier` in `tick`.
    pub(crate) fn record(&self, tick: WindowTick, identifier: &str) {
        if let Some(bucket) = self.buckets.get(&tick) {
            Self::bump(&bucket, identifier);
            return;
        }

        let bucket = self.buckets.entry(tick).or_default().downgrade();
        Self::bump(&bucket, identifier);
    } // end method record

    fn bump(bucket: &DashMap<String, u64>, identifier: &str) {
        if let Some(mut count) = bucket.get_mut(identifier) {
            *count += 1;
            return;
        }

        *bucket.entry(identifier.to_string()).or_insert(0) += 1;
    }

    /// Copy of every bucket, oldest first, identifiers sorted within a bucket.
    fn snapshot(&self) -> Vec<(WindowTick, Vec<(String, u64)>)> {
        let mut buckets: Vec<_> = self
            .buckets
            .iter()
            .map(|bucket| {
                let mut counts: Vec<(String, u64)> = bucket
                    .value()
                    .iter()
                    .map(|entry| (entry.key().clone(), *entry.value()))
                    .collect();
                counts.sort_unstable_by(|a, b| a.0.cmp(&b.0));

                (*bucket.key(), counts)
            })
            .collect();

        buckets.sort_unstable_by_key(|(tick, _)| *tick);
        buckets
    }

    pub(crate) fn account_counts(&self) -> Vec<AccountCount> {
        self.snapshot()
            .into_iter()
            .map(|(tick, counts)| AccountCount {
                window_start: tick.window_start(),
                count: counts.iter().map(|(_, count)| count).sum(),
            })
            .collect()
    }

    pub(crate) fn per_identifier_counts(&self) -> Vec<IdentifierCounts> {
        self.snapshot()
            .into_iter()
            .map(|(tick, counts)| IdentifierCounts {
                window_start: tick.window_start(),
                identifiers: counts
                    .into_iter()
                    .map(|(identifier, count)| IdentifierCount { identifier, count })
                    .collect(),
            })
            .collect()
    }

    /// Drop buckets whose window started before `cutoff_ms`. Returns how many were removed.
    pub(crate) fn evict_before(&self, cutoff_ms: i64) -> usize {
        let mut removed = 0;

        self.buckets.retain(|tick, _| {
            let window_start_ms = i64::try_from(tick.get())
                .unwrap_or(i64::MAX)
                .saturating_mul(1_000);

            let keep = window_start_ms >= cutoff_ms;
            if !keep {
                removed += 1;
            }
            keep
        });

        removed
    } // end method evict_before

    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }
}
