/// Error type for this crate.
///
/// Admission itself never fails; these errors only surface while building
/// [`RateLimiterOptions`](crate::RateLimiterOptions) from raw values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TiergateError {
    /// A rate limit was zero or too large to be counted.
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    /// An eviction interval was zero.
    #[error("invalid eviction interval: {0}")]
    InvalidEvictionInterval(String),
}
