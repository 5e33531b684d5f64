use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::session::StoreOptions;

/// Prefix for environment overrides, e.g. `TOPICBOARD_SERVER__PORT=8000`.
pub const ENV_PREFIX: &str = "TOPICBOARD";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Directory holding one JSON document per session
    #[arg(long, env = "DATA_DIR")]
    pub data_dir: Option<String>,

    /// Document backend: "file" or "memory"
    #[arg(long, env = "STORE_PROVIDER")]
    pub store_provider: Option<String>,

    /// Discard persisted sessions at startup
    #[arg(long, env = "RESET_ON_START")]
    pub reset_on_start: Option<bool>,

    /// Enable rate limiting
    #[arg(long, env = "RATE_LIMIT_ENABLED")]
    pub rate_limit_enabled: Option<bool>,

    /// Disable timeout middleware
    #[arg(long, env = "TIMEOUT_DISABLED")]
    pub timeout_disabled: Option<bool>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub updates: UpdatesConfig,
    pub resilience: ResilienceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub provider: String,
    pub data_dir: String,
    pub reset_on_start: bool,
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpdatesConfig {
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResilienceConfig {
    pub rate_limit_enabled: bool,
    pub requests_per_second: f32,
    pub burst_size: f32,
    pub timeout_disabled: bool,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub json: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    /// Priority: CLI flag (or its env var) > `TOPICBOARD_*` env > config file > defaults.
    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("store.provider", "file")?
            .set_default("store.data_dir", "sessions")?
            .set_default("store.reset_on_start", true)?
            .set_default("store.lock_timeout_ms", 5000)?
            .set_default("updates.capacity", 256)?
            .set_default("resilience.rate_limit_enabled", false)?
            .set_default("resilience.requests_per_second", 50.0)?
            .set_default("resilience.burst_size", 100.0)?
            .set_default("resilience.timeout_disabled", false)?
            .set_default("resilience.request_timeout_secs", 30)?
            .set_default("logging.json", false)?;

        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            // ./config.{yaml,toml,json} if present
            None => builder.add_source(File::with_name("config").required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(dir) = cli.data_dir {
            builder = builder.set_override("store.data_dir", dir)?;
        }
        if let Some(provider) = cli.store_provider {
            builder = builder.set_override("store.provider", provider)?;
        }
        if let Some(reset) = cli.reset_on_start {
            builder = builder.set_override("store.reset_on_start", reset)?;
        }
        if let Some(rl) = cli.rate_limit_enabled {
            builder = builder.set_override("resilience.rate_limit_enabled", rl)?;
        }
        if let Some(td) = cli.timeout_disabled {
            builder = builder.set_override("resilience.timeout_disabled", td)?;
        }
        if let Some(json) = cli.log_json {
            builder = builder.set_override("logging.json", json)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }

    #[must_use]
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            lock_timeout: Duration::from_millis(self.store.lock_timeout_ms),
            feed_capacity: self.updates.capacity,
            reset_on_start: self.store.reset_on_start,
        }
    }

    /// Per-request timeout, or `None` when the timeout middleware is disabled.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (!self.resilience.timeout_disabled)
            .then(|| Duration::from_secs(self.resilience.request_timeout_secs))
    }
}
