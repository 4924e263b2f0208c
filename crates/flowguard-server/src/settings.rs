//! Application settings
//!
//! Settings are layered: the YAML file (`conf/application.yml` unless
//! `--config` is given), then `FLOWGUARD_`-prefixed environment variables
//! using `__` between nested keys (e.g. `FLOWGUARD_NACOS__GROUP`), then CLI
//! overrides.

use std::path::PathBuf;

use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use flowguard_cache::CacheSettings;
use flowguard_common::{IdError, IdGenerator};
use flowguard_rules::{NacosSettings, StoreSettings};
use serde::Deserialize;

use crate::startup::LoggingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";
pub const ENV_PREFIX: &str = "FLOWGUARD";

#[derive(Debug, Parser)]
#[command(name = "flowguard-server", version, about = "Flowguard rule persistence service")]
pub struct Cli {
    /// Settings file; defaults to conf/application.yml when present
    #[arg(short = 'c', long = "config", env = "FLOWGUARD_CONFIG_FILE")]
    pub config: Option<PathBuf>,
    /// Log level, overrides logging.level
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub nacos: NacosSettings,
    /// Shared cache for locks and queues; in-process backends when absent
    pub redis: Option<CacheSettings>,
    pub store: StoreSettings,
    pub id: IdSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => File::from(path.as_path()).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let mut builder = Config::builder().add_source(file).add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("nacos.server_addrs")
                .with_list_parse_key("redis.cluster_addresses")
                .with_list_parse_key("redis.sentinel_addresses")
                .try_parsing(true),
        );

        if let Some(level) = &cli.log_level {
            builder = builder.set_override("logging.level", level.as_str())?;
        }

        builder.build()?.try_deserialize()
    }
}

/// Snowflake discriminators; derived from the host when unset
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IdSettings {
    pub worker_id: Option<u64>,
    pub datacenter_id: Option<u64>,
}

impl IdSettings {
    pub fn generator(&self) -> Result<IdGenerator, IdError> {
        match (self.worker_id, self.datacenter_id) {
            (None, None) => Ok(IdGenerator::from_environment()),
            (worker_id, datacenter_id) => {
                let derived = IdGenerator::from_environment();
                IdGenerator::new(
                    worker_id.unwrap_or(derived.worker_id()),
                    datacenter_id.unwrap_or(derived.datacenter_id()),
                )
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// Log directory; `~/flowguard/logs` when unset
    pub dir: Option<String>,
    pub console: bool,
    /// Write rolling log files
    pub file: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            console: true,
            file: false,
        }
    }
}

impl LoggingSettings {
    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(self.dir.clone(), self.console, self.file, &self.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.nacos.group, "SENTINEL_GROUP");
        assert!(settings.redis.is_none());
        assert_eq!(settings.store.lock_wait_ms, 10000);
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.file);
    }

    #[test]
    fn test_id_settings_explicit() {
        let ids = IdSettings {
            worker_id: Some(3),
            datacenter_id: Some(7),
        };
        let generator = ids.generator().unwrap();
        assert_eq!(generator.worker_id(), 3);
        assert_eq!(generator.datacenter_id(), 7);
    }

    #[test]
    fn test_id_settings_out_of_range() {
        let ids = IdSettings {
            worker_id: Some(32),
            datacenter_id: None,
        };
        assert!(ids.generator().is_err());
    }

    #[test]
    fn test_id_settings_derived() {
        let generator = IdSettings::default().generator().unwrap();
        assert!(generator.worker_id() <= 31);
        assert!(generator.datacenter_id() <= 31);
    }

    #[test]
    fn test_cli_parse() {
        let cli = Cli::parse_from([
            "flowguard-server",
            "--config",
            "/etc/flowguard.yml",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/flowguard.yml")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }
}
