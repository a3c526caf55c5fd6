#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod rate_limiter;
pub use rate_limiter::*;

mod window_counter;
pub use window_counter::*;

mod time_source;
pub use time_source::*;

mod history;
pub use history::{AccountCount, IdentifierCount, IdentifierCounts};

mod eviction;
pub use eviction::EvictionReport;

mod error;
pub use error::*;

mod common;
pub use common::{
    AdmissionDecision, CounterDecision, EvictionIntervalMs, LimitScope, RETENTION_HORIZON,
    RateLimit, WindowTick,
};

#[cfg(test)]
mod tests;
