//! Background eviction of idle identifier counters and old history buckets.

use std::{
    sync::{
        Arc, PoisonError,
        mpsc::{self, RecvTimeoutError},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{RateLimiter, TimeSource};

/// What a single [`RateLimiter::evict`] pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Identifier counters removed from the registry.
    pub removed_counters: usize,
    /// History buckets removed.
    pub removed_buckets: usize,
}

const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub(crate) struct EvictionLoop {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
    interval: Duration,
}

impl EvictionLoop {
    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    /// Wake the thread and wait for it to finish, unless called from that thread.
    pub(crate) fn stop(self) {
        let Self { stop, handle, .. } = self;
        drop(stop);

        if handle.thread().id() != thread::current().id() {
            let _ = handle.join();
        }
    }
}

impl<T: TimeSource + 'static> RateLimiter<T> {
    /// Start the background eviction loop at the configured
    /// [`eviction_interval_ms`](crate::RateLimiterOptions::eviction_interval_ms).
    ///
    /// See [`RateLimiter::run_eviction_loop_with_interval`].
    pub fn run_eviction_loop(self: &Arc<Self>) {
        self.run_eviction_loop_with_interval(self.eviction_interval());
    }

    /// Start a background thread calling [`RateLimiter::evict`] every `interval`.
    ///
    /// The first pass runs one `interval` after the call. Intervals below one
    /// millisecond are raised to one millisecond. A no-op while a loop is
    /// already running, even with a different `interval`. The thread holds only a
    /// weak reference and exits once the limiter is dropped or
    /// [`RateLimiter::stop_eviction_loop`] is called.
    pub fn run_eviction_loop_with_interval(self: &Arc<Self>, interval: Duration) {
        let interval = interval.max(MIN_INTERVAL);
        let mut slot = self
            .eviction_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if slot.is_some() {
            return;
        }

        let (stop, stopped) = mpsc::channel::<()>();
        let limiter = Arc::downgrade(self);

        let spawned = thread::Builder::new()
            .name("tiergate-eviction".to_string())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let Some(limiter) = limiter.upgrade() else {
                        break;
                    };

                    let report = limiter.evict();
                    if report != EvictionReport::default() {
                        tracing::debug!(
                            removed_counters = report.removed_counters,
                            removed_buckets = report.removed_buckets,
                            "evicted idle rate limiter state"
                        );
                    }
                }

                tracing::debug!("eviction loop stopped");
            });

        match spawned {
            Ok(handle) => {
                tracing::debug!(
                    interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
                    "eviction loop started"
                );
                *slot = Some(EvictionLoop {
                    stop,
                    handle,
                    interval,
                });
            }
            Err(err) => {
                tracing::error!(error = ?err, "Failed to spawn eviction thread");
            }
        }
    } // end method run_eviction_loop_with_interval
}

impl<T: TimeSource> RateLimiter<T> {
    /// Stop the background eviction loop. Idempotent.
    ///
    /// Returns after the thread has exited; a pass already in progress completes.
    pub fn stop_eviction_loop(&self) {
        let Some(eviction_loop) = self
            .eviction_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        eviction_loop.stop();
    }

    /// `true` while a background eviction loop is running.
    pub fn is_eviction_loop_running(&self) -> bool {
        self.eviction_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Interval of the running eviction loop, if any.
    pub(crate) fn eviction_loop_interval(&self) -> Option<Duration> {
        self.eviction_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(EvictionLoop::interval)
    }
}
