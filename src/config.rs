//! Configuration loading.
//!
//! Settings come from, in order of precedence:
//! 1. command-line flags (applied by `cli`)
//! 2. the `TASKDECK_TIMEOUT` environment variable
//! 3. `--config <path>` or `<config_dir>/taskdeck/config.json`
//! 4. the action catalog's built-in cadence
//!
//! ```json
//! {
//!   "default_timeout": "2m",
//!   "actions": {
//!     "retrain-model": { "increment": 5, "tick_interval": "1s" }
//!   }
//! }
//! ```

use crate::actions::ActionKind;
use crate::model::DriverSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const TIMEOUT_ENV: &str = "TASKDECK_TIMEOUT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Per-action override; unset fields keep the catalog value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverOverride {
    pub increment: Option<u8>,
    #[serde(with = "humantime_serde")]
    pub tick_interval: Option<Duration>,
}

/// On-disk configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// Deadline after which a running task fails with a timeout. None disables it.
    #[serde(with = "humantime_serde")]
    pub default_timeout: Option<Duration>,
    pub actions: BTreeMap<ActionKind, DriverOverride>,
}

impl ConfigFile {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load with standard priority: explicit path (must exist), default location, defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit_path {
            tracing::info!("Loading config from: {:?}", path);
            return Self::from_file(path);
        }

        if let Some(path) = default_config_path() {
            if path.exists() {
                tracing::info!("Loading config from: {:?}", path);
                return Self::from_file(&path);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }
}

/// `<config_dir>/taskdeck/config.json`, when the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("taskdeck").join("config.json"))
}

/// Effective runtime settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub timeout: Option<Duration>,
    drivers: BTreeMap<ActionKind, DriverSettings>,
}

impl Settings {
    /// Resolve a config file against the catalog and validate the result.
    pub fn from_config(file: &ConfigFile) -> Result<Self, ConfigError> {
        let mut settings = Settings {
            timeout: file.default_timeout,
            drivers: BTreeMap::new(),
        };
        for (kind, over) in &file.actions {
            let mut driver = kind.driver();
            if let Some(increment) = over.increment {
                driver.increment = increment;
            }
            if let Some(interval) = over.tick_interval {
                driver.tick_interval = interval;
            }
            settings.set_driver(*kind, driver)?;
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `TASKDECK_TIMEOUT` if set.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(raw) = std::env::var(TIMEOUT_ENV) {
            self.timeout = Some(parse_timeout(&raw)?);
        }
        Ok(())
    }

    /// Driver cadence for `kind`: configured override, else the catalog default.
    pub fn driver_for(&self, kind: ActionKind) -> DriverSettings {
        self.drivers
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.driver())
    }

    pub fn set_driver(
        &mut self,
        kind: ActionKind,
        driver: DriverSettings,
    ) -> Result<(), ConfigError> {
        validate_driver(kind, &driver)?;
        self.drivers.insert(kind, driver);
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid(
                "default_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn validate_driver(kind: ActionKind, driver: &DriverSettings) -> Result<(), ConfigError> {
    if !(1..=100).contains(&driver.increment) {
        return Err(ConfigError::Invalid(format!(
            "{}: increment must be between 1 and 100, got {}",
            kind.slug(),
            driver.increment
        )));
    }
    if driver.tick_interval.is_zero() {
        return Err(ConfigError::Invalid(format!(
            "{}: tick_interval must be greater than zero",
            kind.slug()
        )));
    }
    Ok(())
}

fn parse_timeout(raw: &str) -> Result<Duration, ConfigError> {
    let d = humantime::parse_duration(raw.trim())
        .map_err(|e| ConfigError::Invalid(format!("{TIMEOUT_ENV}={raw:?}: {e}")))?;
    if d.is_zero() {
        return Err(ConfigError::Invalid(format!(
            "{TIMEOUT_ENV} must be greater than zero"
        )));
    }
    Ok(d)
}
