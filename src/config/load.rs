// Configuration loading functionality
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::config::types::{AppConfig, ConfigError};

pub const CONFIG_ENV_VAR: &str = "HOTPLUGD_CONFIG";
const SYSTEM_CONFIG_PATH: &str = "/etc/hotplugd/config.toml";

/// Candidate configuration files, most specific first.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut config_paths: Vec<PathBuf> = Vec::new();

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        config_paths.push(PathBuf::from(path));
    }

    // User-specific path
    if let Some(config_dir) = dirs::config_dir() {
        config_paths.push(config_dir.join("hotplugd/config.toml"));
    } else {
        debug!("Could not determine the user config directory, skipping user config");
    }

    config_paths.push(PathBuf::from(SYSTEM_CONFIG_PATH));
    config_paths
}

/// The first existing configuration file, if any
pub fn find_config_file() -> Option<PathBuf> {
    config_search_paths().into_iter().find(|path| path.exists())
}

// The primary function to load application configuration.
// Falls back to default settings if no file is found or if parsing fails.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    for path in config_search_paths() {
        if !path.exists() {
            continue;
        }

        match load_config_from_path(&path) {
            Ok(config) => {
                debug!("Loaded configuration from {}", path.display());
                return Ok(config);
            }
            Err(e) => warn!("Ignoring config file {}: {e}", path.display()),
        }
    }

    debug!("No usable configuration file found, using defaults");
    Ok(AppConfig::default())
}

/// Load and parse one configuration file
pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }

    let contents = fs::read_to_string(path)?;
    Ok(toml::from_str::<AppConfig>(&contents)?)
}
