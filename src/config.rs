use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::avs::AvsConfig;
use crate::edp::EdpConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub edp: EdpConfig,
    #[serde(default)]
    pub avs: AvsConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one JSON record per operation
    #[serde(default = "default_storage_dir")]
    pub dir: String,
}

fn default_storage_dir() -> String {
    ".broker/operations".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Operations processed concurrently by `serve`
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Interval in seconds between scans for in-progress operations (default: 30)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    30
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether `serve` logs to a file instead of stderr
    #[serde(default)]
    pub to_file: bool,

    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    ".broker/logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: false,
            dir: default_log_dir(),
        }
    }
}

impl Config {
    /// Project-local config file, picked up from the working directory
    pub fn local_config_path() -> PathBuf {
        PathBuf::from("broker-lifecycle.toml")
    }

    /// Per-user config file, if the platform has a config directory
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("broker-lifecycle").join("config.toml"))
    }

    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // Embedded defaults so the broker runs without any config file
        let defaults = Config::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        let local_config = Self::local_config_path();
        if local_config.exists() {
            builder = builder.add_source(config::File::from(local_config));
        }

        if let Some(user_config) = Self::user_config_path() {
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config));
            }
        }

        // Explicit config file (CLI override)
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::from(Path::new(path)));
        }

        // Environment variables, e.g. BROKER__EDP__REQUIRED=true
        builder = builder.add_source(
            config::Environment::with_prefix("BROKER")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.executor.poll_interval_secs == 0 {
            bail!("executor.poll_interval_secs must be at least 1");
        }
        Ok(())
    }

    /// Render the effective configuration
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config to TOML")
    }

    /// Get absolute path to the operation storage directory
    pub fn storage_path(&self) -> PathBuf {
        absolute(&self.storage.dir)
    }

    /// Get absolute path to logs directory
    pub fn logs_path(&self) -> PathBuf {
        absolute(&self.logging.dir)
    }
}

fn absolute(path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    }
}
