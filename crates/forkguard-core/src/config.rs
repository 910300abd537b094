use std::{collections::HashMap, fmt::Display, str::FromStr};

use thiserror::Error;

use crate::{lineage::DEFAULT_MAX_LINEAGE_STEPS, store};

/// Configuration section of the detector inside the configuration file.
pub const DETECTOR_CONFIG: &str = "detector";

/// Per module configuration
#[derive(Debug, Clone, Default)]
pub struct ModuleConfig {
    inner: HashMap<String, String>,
}

#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("{value} is not a valid value for field {field}: {err}")]
    InvalidValue {
        field: String,
        value: String,
        err: String,
    },
}

impl ModuleConfig {
    /// Inserts a new configuration value.
    pub fn insert(&mut self, key: String, value: String) -> Option<String> {
        self.inner.insert(key, value)
    }

    /// Returns an option of raw configuration value.
    pub fn get_raw(&self, config_name: &str) -> Option<&str> {
        self.inner.get(config_name).map(String::as_str)
    }

    /// Returns an optional typed configuration value.
    pub fn optional<T>(&self, config_name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        self.inner
            .get(config_name)
            .map(|value| parse(value, config_name))
            .transpose()
    }

    /// Returns a typed configuration value, or the given default when missing.
    pub fn with_default<T>(&self, config_name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        Ok(self.optional(config_name)?.unwrap_or(default))
    }
}

fn parse<T>(value: &str, config_name: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    <T as FromStr>::Err: Display,
{
    T::from_str(value.trim()).map_err(|err| ConfigError::InvalidValue {
        field: config_name.to_string(),
        value: value.to_string(),
        err: err.to_string(),
    })
}

/// Tunables of the detector. They are read once at startup and never change
/// while the detector is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorConfig {
    /// Generations between a new process and the ancestor it is compared to.
    pub ancestor_depth: usize,
    /// Two creations closer than this are considered a burst.
    pub min_interval_ns: u64,
    /// Hard limit on parent hops, whatever `ancestor_depth` says.
    pub max_lineage_steps: usize,
    pub store_capacity: usize,
    pub store_shards: usize,
    /// Decision events buffered before new ones get dropped.
    pub telemetry_capacity: usize,
    /// When false, kill decisions are reported but no process is terminated.
    pub enforce: bool,
}

pub const DEFAULT_ANCESTOR_DEPTH: usize = 3;
pub const DEFAULT_MIN_INTERVAL_NS: u64 = 1_000_000_000;
pub const DEFAULT_TELEMETRY_CAPACITY: usize = 1024;

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            ancestor_depth: DEFAULT_ANCESTOR_DEPTH,
            min_interval_ns: DEFAULT_MIN_INTERVAL_NS,
            max_lineage_steps: DEFAULT_MAX_LINEAGE_STEPS,
            store_capacity: store::DEFAULT_CAPACITY,
            store_shards: store::DEFAULT_SHARDS,
            telemetry_capacity: DEFAULT_TELEMETRY_CAPACITY,
            enforce: true,
        }
    }
}

impl DetectorConfig {
    /// Number of parent hops actually performed by the lineage walk.
    pub fn effective_depth(&self) -> usize {
        self.ancestor_depth.min(self.max_lineage_steps)
    }
}

impl TryFrom<&ModuleConfig> for DetectorConfig {
    type Error = ConfigError;

    fn try_from(config: &ModuleConfig) -> Result<Self, Self::Error> {
        let default = DetectorConfig::default();
        let config = Self {
            ancestor_depth: non_zero(
                config,
                "ancestor_depth",
                config.with_default("ancestor_depth", default.ancestor_depth)?,
            )?,
            min_interval_ns: config.with_default("min_interval_ns", default.min_interval_ns)?,
            max_lineage_steps: non_zero(
                config,
                "max_lineage_steps",
                config.with_default("max_lineage_steps", default.max_lineage_steps)?,
            )?,
            store_capacity: non_zero(
                config,
                "store_capacity",
                config.with_default("store_capacity", default.store_capacity)?,
            )?,
            store_shards: non_zero(
                config,
                "store_shards",
                config.with_default("store_shards", default.store_shards)?,
            )?,
            telemetry_capacity: non_zero(
                config,
                "telemetry_capacity",
                config.with_default("telemetry_capacity", default.telemetry_capacity)?,
            )?,
            enforce: config.with_default("enforce", default.enforce)?,
        };

        if config.ancestor_depth > config.max_lineage_steps {
            log::warn!(
                "ancestor_depth ({}) exceeds max_lineage_steps ({}), only {} generations will be compared",
                config.ancestor_depth,
                config.max_lineage_steps,
                config.max_lineage_steps
            );
        }

        Ok(config)
    }
}

fn non_zero(config: &ModuleConfig, field: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: config.get_raw(field).unwrap_or("0").to_string(),
            err: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
