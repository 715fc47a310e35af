//! Server configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `TOLLGATE__SECTION__FIELD` environment variables, e.g.
//! `TOLLGATE__LIMITER__RATE=50` or `TOLLGATE__SERVER__BIND=0.0.0.0:9000`.

use crate::middleware::FailureMode;
use crate::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tollgate_limiter::LimiterConfig;
use tollgate_storage::StorageConfig;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Top-level configuration for `tollgate-server`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Limit applied to rate limited routes
    #[serde(default = "default_limiter")]
    pub limiter: LimiterConfig,

    /// Where limiter state lives
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            limiter: default_limiter(),
            storage: StorageConfig::default(),
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Key clients by this header instead of their IP address
    #[serde(default)]
    pub api_key_header: Option<String>,

    /// Units each limited request consumes
    #[serde(default = "default_cost")]
    pub cost: u32,

    /// Behaviour when the limiter's storage fails
    #[serde(default)]
    pub failure_mode: FailureMode,

    /// Serve Prometheus metrics on `/metrics`
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_key_header: None,
            cost: default_cost(),
            failure_mode: FailureMode::default(),
            metrics: true,
        }
    }
}

impl AppConfig {
    /// Load defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<AppConfig>()?;

        config.limiter.validate()?;
        Ok(config)
    }
}

fn default_limiter() -> LimiterConfig {
    LimiterConfig::new(100, Duration::from_secs(60))
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_cost() -> u32 {
    1
}

fn default_true() -> bool {
    true
}
