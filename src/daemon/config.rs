use std::{collections::HashMap, path::PathBuf};

use anyhow::{Context, Result, bail};
use forkguard_core::ModuleConfig;

const DEFAULT_CONFIG_FILE: &str = "/etc/forkguard/forkguard.ini";

/// Configuration of the detector and of every module.
///
/// It is backed by an `INI` file, with one section per module, parsed once
/// at startup.
#[derive(Debug, Clone, Default)]
pub struct ForkguardConfig {
    configs: HashMap<String, ModuleConfig>,
}

impl ForkguardConfig {
    /// Construct a new [`ForkguardConfig`] using the default file.
    ///
    /// A missing default file means every setting keeps its default value.
    pub fn new() -> Result<Self> {
        let config_file = PathBuf::from(DEFAULT_CONFIG_FILE);
        if !config_file.exists() {
            log::info!("{DEFAULT_CONFIG_FILE} not found, using default configuration");
            return Ok(Self::default());
        }
        Self::from_config_file(config_file)
    }

    /// Construct a new [`ForkguardConfig`] using a custom file.
    pub fn with_custom_file(config_file: &str) -> Result<Self> {
        let config_file = PathBuf::from(config_file);
        if !config_file.exists() {
            bail!("Configuration file {} not found", config_file.display());
        }
        Self::from_config_file(config_file)
    }

    fn from_config_file(config_file: PathBuf) -> Result<Self> {
        let mut configs: HashMap<String, ModuleConfig> = HashMap::new();

        let conf = ini::Ini::load_from_file(&config_file)
            .with_context(|| format!("Error loading configuration from {config_file:?}"))?;

        for (section, prop) in &conf {
            if let Some(section) = section {
                let mod_config = configs.entry(section.to_string()).or_default();
                for (key, value) in prop.iter() {
                    log::debug!("{}.{}={}", section, key, value);
                    mod_config.insert(key.to_string(), value.to_string());
                }
            }
        }

        Ok(Self { configs })
    }

    /// Get a module configuration, empty when the section is missing.
    pub fn get_module_config(&self, module: &str) -> ModuleConfig {
        self.configs.get(module).cloned().unwrap_or_default()
    }
}
