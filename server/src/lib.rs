//! HTTP front end for a [`tiergate::RateLimiter`].

pub mod app;
pub mod config;
pub mod error;
pub mod logging;

pub use app::{ApiDoc, AppState, CheckResponse, OPENAPI_PATH, SharedLimiter, build_router};
pub use config::{Cli, ConfigError, Settings};
pub use error::{ApiError, ErrorResponse};
