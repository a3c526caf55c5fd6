//! Service settings: a TOML file with defaults for every field, overridden by
//! command-line flags.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use clap::Parser;
use serde::Deserialize;
use tiergate::{EvictionIntervalMs, RateLimit, RateLimiterOptions, TiergateError};

/// Errors raised while loading or validating [`Settings`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid bind address {0:?}")]
    Bind(String),
    #[error(transparent)]
    Limits(#[from] TiergateError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub server: ServerSettings,
    pub rate_limits: RateLimitSettings,
    pub cors: CorsSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    pub bind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitSettings {
    pub per_identifier: u64,
    pub account: u64,
    pub eviction_interval_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsSettings {
    /// Origins allowed to call the API from a browser. Empty allows none.
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// Directory of the daily rolling log file. Created if missing.
    pub dir: PathBuf,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            per_identifier: 5,
            account: 100,
            eviction_interval_ms: *EvictionIntervalMs::default(),
        }
    }
}

/// Command-line flags. Any flag given wins over the config file.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "tiergate-server", about = "HTTP admission control service")]
pub struct Cli {
    /// TOML config file.
    #[arg(long, env = "TIERGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:8080.
    #[arg(long)]
    pub bind: Option<String>,

    /// Events admitted per identifier per second.
    #[arg(long)]
    pub per_identifier_limit: Option<u64>,

    /// Events admitted across all identifiers per second.
    #[arg(long)]
    pub account_limit: Option<u64>,

    /// Interval of the background eviction sweep.
    #[arg(long)]
    pub eviction_interval_ms: Option<u64>,

    /// Directory for the daily rolling log file.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl Settings {
    /// Parse settings from TOML text. Missing sections and fields take defaults.
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults, then the config file if one is named, then the flags.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut settings = match &cli.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                Self::from_toml(&text, path)?
            }
            None => Self::default(),
        };

        settings.apply(cli);
        settings.limiter_options()?;
        settings.bind_addr()?;

        Ok(settings)
    } // end method load

    fn apply(&mut self, cli: &Cli) {
        if let Some(bind) = &cli.bind {
            self.server.bind = bind.clone();
        }
        if let Some(limit) = cli.per_identifier_limit {
            self.rate_limits.per_identifier = limit;
        }
        if let Some(limit) = cli.account_limit {
            self.rate_limits.account = limit;
        }
        if let Some(ms) = cli.eviction_interval_ms {
            self.rate_limits.eviction_interval_ms = ms;
        }
        if let Some(dir) = &cli.log_dir {
            self.logging.dir = dir.clone();
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .parse()
            .map_err(|_| ConfigError::Bind(self.server.bind.clone()))
    }

    pub fn limiter_options(&self) -> Result<RateLimiterOptions, ConfigError> {
        Ok(RateLimiterOptions {
            per_identifier_limit: RateLimit::try_from(self.rate_limits.per_identifier)?,
            account_limit: RateLimit::try_from(self.rate_limits.account)?,
            eviction_interval_ms: EvictionIntervalMs::try_from(
                self.rate_limits.eviction_interval_ms,
            )?,
        })
    }
}
