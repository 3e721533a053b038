//! Configuration loading from TOML files and environment variables.
//!
//! The scheduler and logging sections are typed. The `plugins` and
//! `eventhandler` sections stay raw tables: every component decodes only its
//! own sub-table, so a broken section disables that component instead of
//! failing the whole file.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// One sub-table per probe, keyed by probe name.
    #[serde(default)]
    pub plugins: toml::Table,
    /// One sub-table per event handler family.
    #[serde(default)]
    pub eventhandler: toml::Table,
}

/// Cycle scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between the starts of two cycles.
    #[serde(default = "default_interval_seconds")]
    pub interval: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: default_interval_seconds(),
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Data directory for the event journal.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl LoggingConfig {
    /// Returns the journal directory path.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

// Default value functions
fn default_interval_seconds() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".kam"))
        .unwrap_or_else(|| PathBuf::from(".kam"))
}

impl Config {
    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse config file")
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml(&content)
    }

    /// Load configuration with environment variable overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = config_path {
            Self::from_file(path)?
        } else {
            let default_paths = [
                PathBuf::from("/etc/kam/kam.toml"),
                dirs::config_dir()
                    .map(|d| d.join("kam/config.toml"))
                    .unwrap_or_default(),
            ];

            let mut loaded = None;
            for path in &default_paths {
                if path.is_file() {
                    loaded = Some(Self::from_file(path)?);
                    break;
                }
            }
            loaded.unwrap_or_default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.logging.data_dir = expand_tilde(&config.logging.data_dir);

        Ok(config)
    }

    /// Apply `KAM_*` overrides, reading variables through `lookup`.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("KAM_SCHEDULER_INTERVAL") {
            if let Ok(v) = val.parse() {
                self.scheduler.interval = v;
            }
        }
        if let Some(val) = lookup("KAM_INACTIVE_TIMEOUT") {
            if let Ok(v) = val.parse::<i64>() {
                self.set_inactive_timeout(v);
            }
        }
        if let Some(val) = lookup("KAM_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = lookup("KAM_DATA_DIR") {
            self.logging.data_dir = PathBuf::from(val);
        }
    }

    /// Set `eventhandler.inactivetimeout.inactive_timeout`, creating tables as needed.
    fn set_inactive_timeout(&mut self, seconds: i64) {
        let section = self
            .eventhandler
            .entry("inactivetimeout")
            .or_insert(toml::Value::Table(toml::Table::new()));
        if let toml::Value::Table(table) = section {
            table.insert("inactive_timeout".to_string(), toml::Value::Integer(seconds));
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.interval == 0 {
            anyhow::bail!("Scheduler interval must be greater than 0");
        }
        Ok(())
    }
}

/// Decode the sub-table `key` of `parent` into a component's own config type.
pub fn decode_section<T: DeserializeOwned>(parent: &toml::Table, key: &str) -> Result<T, ConfigError> {
    let value = parent
        .get(key)
        .ok_or_else(|| ConfigError::MissingSection(key.to_string()))?;

    value.clone().try_into().map_err(|source| ConfigError::Invalid {
        section: key.to_string(),
        source,
    })
}

/// Expand ~ to home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackerConfig;
    use std::collections::HashMap;
    use std::io::Write;

    const FULL: &str = r#"
[scheduler]
interval = 5

[logging]
level = "debug"
format = "json"

[plugins.cpu]
enabled = true
per_cpu_threshold = 90.0

[eventhandler.inactivetimeout]
die_on_inactive = true
inactive_timeout = 600

[eventhandler.inactivetimeout.command]
command = "echo"
parameters = ["Computer", "is idle"]
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml(FULL).unwrap();
        assert_eq!(config.scheduler.interval(), Duration::from_secs(5));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.plugins.contains_key("cpu"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.scheduler.interval, 60);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.plugins.is_empty());
        assert!(config.eventhandler.is_empty());
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let config = Config::from_toml("[scheduler]\ninterval = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.scheduler.interval, 5);
    }

    #[test]
    fn test_missing_file_is_fatal() {
        assert!(Config::load(Some(Path::new("/nonexistent/kam.toml"))).is_err());
    }

    #[test]
    fn test_set_inactive_timeout_creates_section() {
        let mut config = Config::default();
        config.set_inactive_timeout(42);

        #[derive(Deserialize)]
        struct Timeout {
            inactive_timeout: i64,
        }
        let section: Timeout = decode_section(&config.eventhandler, "inactivetimeout").unwrap();
        assert_eq!(section.inactive_timeout, 42);
    }

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_replace_file_values() {
        let mut config = Config::from_toml(FULL).unwrap();
        config.apply_env_overrides(env(&[
            ("KAM_SCHEDULER_INTERVAL", "7"),
            ("KAM_INACTIVE_TIMEOUT", "90"),
            ("KAM_LOG_LEVEL", "trace"),
            ("KAM_DATA_DIR", "/var/lib/kam"),
        ]));

        assert_eq!(config.scheduler.interval, 7);
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.logging.data_dir, PathBuf::from("/var/lib/kam"));

        let tracker = TrackerConfig::from_eventhandler(&config.eventhandler);
        assert_eq!(tracker.inactive_timeout, 90);
        // Sibling keys of the section survive the override.
        assert!(tracker.die_on_inactive);
        assert!(config.eventhandler["inactivetimeout"].get("command").is_some());
    }

    #[test]
    fn test_unset_or_unparsable_env_keeps_file_values() {
        let mut config = Config::from_toml(FULL).unwrap();
        config.apply_env_overrides(env(&[
            ("KAM_SCHEDULER_INTERVAL", "soon"),
            ("KAM_INACTIVE_TIMEOUT", "never"),
        ]));

        assert_eq!(config.scheduler.interval, 5);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            TrackerConfig::from_eventhandler(&config.eventhandler).inactive_timeout,
            600
        );
    }

    #[test]
    fn test_negative_env_timeout_falls_back_to_default() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[("KAM_INACTIVE_TIMEOUT", "-5")]));

        assert_eq!(
            TrackerConfig::from_eventhandler(&config.eventhandler),
            TrackerConfig::default()
        );
    }

    #[test]
    fn test_decode_section_errors() {
        let table: toml::Table = "[a]\nx = \"text\"\n".parse().unwrap();

        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Numeric {
            x: u32,
        }
        assert!(matches!(
            decode_section::<Numeric>(&table, "missing"),
            Err(ConfigError::MissingSection(_))
        ));
        assert!(matches!(
            decode_section::<Numeric>(&table, "a"),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
