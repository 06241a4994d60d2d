// src/utils/config.rs
//! Gateway configuration
//!
//! Layered as: compiled defaults, then an optional file named by
//! `GATEWAY_CONFIG`, then `PROXY_*` environment variables.

use crate::utils::errors::{GatewayError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming an optional config file
pub const CONFIG_FILE_ENV: &str = "GATEWAY_CONFIG";

/// Prefix for environment overrides (`PROXY_PORT`, `PROXY_DB_PATH`, ...)
pub const ENV_PREFIX: &str = "PROXY";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listening port
    pub port: u16,

    /// Listening address (all interfaces by default)
    pub bind_addr: IpAddr,

    /// Relay chunk size in bytes
    pub buffer_size: usize,

    /// Outbound connect timeout
    pub connect_timeout_secs: u64,

    /// OS listen backlog
    pub listen_backlog: u32,

    /// Set IP_TRANSPARENT on the listening socket
    pub transparent: bool,

    /// SQLite database path
    pub db_path: PathBuf,

    pub log_format: LogFormat,

    /// Prometheus scrape endpoint; disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            buffer_size: 8 * 1024,
            connect_timeout_secs: 10,
            listen_backlog: 100,
            transparent: true,
            db_path: PathBuf::from("/app/data/traffic.db"),
            log_format: LogFormat::Pretty,
            metrics_addr: None,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_ENV).ok();
        Self::load_with(Environment::with_prefix(ENV_PREFIX), file.as_deref())
    }

    /// Load configuration from an explicit environment source and optional file
    pub fn load_with(env: Environment, file: Option<&str>) -> Result<Self> {
        let defaults = Config::try_from(&GatewayConfig::default())?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = file {
            builder = builder.add_source(File::with_name(path));
        }

        let config: GatewayConfig = builder
            .add_source(env.prefix_separator("_").try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the relay cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(GatewayError::Config("buffer_size must be non-zero".to_string()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(GatewayError::Config(
                "connect_timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.listen_backlog == 0 {
            return Err(GatewayError::Config("listen_backlog must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
