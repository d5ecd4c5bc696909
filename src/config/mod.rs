//! Configuration management for Kiln

pub mod schema;

pub use schema::{CheckConfig, Config};

use crate::error::{KilnError, KilnResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Name of the project-local configuration file
pub const LOCAL_CONFIG_FILE: &str = ".kiln.toml";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kiln")
            .join("config.toml")
    }

    /// Get the default cache directory
    pub fn default_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from(".kiln"))
            .join("kiln")
    }

    /// Cache directory for `project_dir`: the configured one (relative paths
    /// are taken from the project root) or the default
    pub fn cache_dir(config: &Config, project_dir: &Path) -> PathBuf {
        match &config.cache.dir {
            Some(dir) => project_dir.join(dir),
            None => Self::default_cache_dir(),
        }
    }

    /// Find the project-local config in `dir`, if present
    pub fn find_local_config(dir: &Path) -> Option<PathBuf> {
        let path = dir.join(LOCAL_CONFIG_FILE);
        path.is_file().then_some(path)
    }

    /// Load the global configuration, using defaults when the file is missing
    pub async fn load(&self) -> KilnResult<Config> {
        self.load_merged(None).await
    }

    /// Load defaults, then the global file, then the local file on top.
    ///
    /// Tables merge key by key; any other value in a later layer replaces
    /// the earlier one.
    pub async fn load_merged(&self, local: Option<&Path>) -> KilnResult<Config> {
        let mut merged = toml::Value::try_from(Config::default())?;

        if self.config_path.exists() {
            let global = Self::read_value(&self.config_path).await?;
            merge_values(&mut merged, global);
        } else {
            debug!("Config file not found, using defaults");
        }

        if let Some(path) = local {
            let local = Self::read_value(path).await?;
            merge_values(&mut merged, local);
        }

        let origin = local.unwrap_or(&self.config_path);
        merged.try_into().map_err(|e: toml::de::Error| KilnError::ConfigInvalid {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })
    }

    async fn read_value(path: &Path) -> KilnResult<toml::Value> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| KilnError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| KilnError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Write `config` to the global config file
    pub async fn save(&self, config: &Config) -> KilnResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KilnError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            KilnError::io(format!("writing config to {}", self.config_path.display()), e)
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
