//! Engine configuration loaded from the environment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::dispatcher::DispatcherSettings;
use crate::errors::ConfigError;
use crate::observability::LogFormat;

/// Root of run directories.
pub const WORK_ROOT_VAR: &str = "CHAINFLOW_WORK_ROOT";
/// Directory holding `<APP_ENV>_config.json`.
pub const TOOL_CONFIG_DIR_VAR: &str = "CHAINFLOW_TOOL_CONFIG_DIR";
/// Selects the tool config file.
pub const APP_ENV_VAR: &str = "APP_ENV";
/// Lease length in seconds.
pub const LEASE_SECONDS_VAR: &str = "CHAINFLOW_LEASE_SECONDS";
/// Heartbeat interval in seconds.
pub const HEARTBEAT_SECONDS_VAR: &str = "CHAINFLOW_HEARTBEAT_SECONDS";
/// Reclaims allowed before a stuck step is failed.
pub const MAX_RECLAIMS_VAR: &str = "CHAINFLOW_MAX_RECLAIMS";
/// `pretty` or `json`.
pub const LOG_FORMAT_VAR: &str = "CHAINFLOW_LOG_FORMAT";

/// Process-wide engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root under which run directories are created.
    pub work_root: PathBuf,
    /// Directory of tool configuration files, if any.
    pub tool_config_dir: Option<PathBuf>,
    /// Environment name selecting the tool configuration file.
    pub app_env: String,
    /// Lease length in seconds.
    pub lease_seconds: u64,
    /// Heartbeat interval in seconds.
    pub heartbeat_seconds: u64,
    /// Reclaims allowed per step.
    pub max_reclaims: u32,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from("./runs"),
            tool_config_dir: None,
            app_env: "development".to_string(),
            lease_seconds: 300,
            heartbeat_seconds: 60,
            max_reclaims: 3,
            log_format: LogFormat::Pretty,
        }
    }
}

impl EngineConfig {
    /// Loads `.env` if present, then reads the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unparsable or inconsistent values.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`; unset keys keep defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unparsable or inconsistent values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            work_root: get(WORK_ROOT_VAR).map_or(defaults.work_root, PathBuf::from),
            tool_config_dir: get(TOOL_CONFIG_DIR_VAR).map(PathBuf::from),
            app_env: get(APP_ENV_VAR).unwrap_or(defaults.app_env),
            lease_seconds: parse(LEASE_SECONDS_VAR, get(LEASE_SECONDS_VAR))?
                .unwrap_or(defaults.lease_seconds),
            heartbeat_seconds: parse(HEARTBEAT_SECONDS_VAR, get(HEARTBEAT_SECONDS_VAR))?
                .unwrap_or(defaults.heartbeat_seconds),
            max_reclaims: parse(MAX_RECLAIMS_VAR, get(MAX_RECLAIMS_VAR))?
                .unwrap_or(defaults.max_reclaims),
            log_format: parse(LOG_FORMAT_VAR, get(LOG_FORMAT_VAR))?.unwrap_or(defaults.log_format),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that the values are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Inconsistent`] when the heartbeat is not
    /// shorter than the lease or either is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lease_seconds == 0 || self.heartbeat_seconds == 0 {
            return Err(ConfigError::Inconsistent(
                "lease and heartbeat must be at least one second".into(),
            ));
        }
        if self.heartbeat_seconds >= self.lease_seconds {
            return Err(ConfigError::Inconsistent(format!(
                "heartbeat ({}s) must be shorter than the lease ({}s)",
                self.heartbeat_seconds, self.lease_seconds
            )));
        }
        Ok(())
    }

    /// Lease timing for the dispatcher.
    #[must_use]
    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            lease: Duration::from_secs(self.lease_seconds),
            heartbeat_interval: Duration::from_secs(self.heartbeat_seconds),
        }
    }

    /// How often the watchdog sweeps: half a lease.
    #[must_use]
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs((self.lease_seconds / 2).max(1))
    }
}

fn parse<T: FromStr>(key: &str, value: Option<String>) -> Result<Option<T>, ConfigError> {
    value
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.dispatcher_settings(), DispatcherSettings::default());
    }

    #[test]
    fn test_reads_values() {
        let config = EngineConfig::from_lookup(lookup(&[
            (WORK_ROOT_VAR, "/scratch/runs"),
            (APP_ENV_VAR, "production"),
            (LEASE_SECONDS_VAR, "120"),
            (HEARTBEAT_SECONDS_VAR, "10"),
            (LOG_FORMAT_VAR, "json"),
        ]))
        .unwrap();

        assert_eq!(config.work_root, PathBuf::from("/scratch/runs"));
        assert_eq!(config.app_env, "production");
        assert_eq!(config.lease_seconds, 120);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.watchdog_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_rejects_unparsable_value() {
        let err = EngineConfig::from_lookup(lookup(&[(MAX_RECLAIMS_VAR, "many")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: MAX_RECLAIMS_VAR.into(),
                value: "many".into()
            }
        );
    }

    #[test]
    fn test_heartbeat_must_be_shorter_than_lease() {
        let err = EngineConfig::from_lookup(lookup(&[
            (LEASE_SECONDS_VAR, "30"),
            (HEARTBEAT_SECONDS_VAR, "30"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));
    }
}
