// Configuration loading functionality
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::types::{AppConfig, ConfigError};

pub const CONFIG_ENV_VAR: &str = "RMC_CONFIG";

/// Candidate configuration files, highest priority first
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut config_paths: Vec<PathBuf> = Vec::new();

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        config_paths.push(PathBuf::from(path));
    }

    // User-specific path
    if let Some(config_dir) = dirs::config_dir() {
        config_paths.push(config_dir.join("ryzen-master-commander/config.toml"));
    } else {
        warn!("Could not determine config directory. User-specific config will not be loaded.");
    }

    // System-wide path
    config_paths.push(PathBuf::from("/etc/ryzen-master-commander/config.toml"));

    config_paths
}

/// First configuration file that exists on disk
pub fn find_config_path() -> Option<PathBuf> {
    config_search_paths().into_iter().find(|p| p.exists())
}

// The primary function to load application configuration.
// It tries the env override, then user-specific and system-wide TOML files.
// Falls back to default settings if no file is found or if parsing fails.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    for path in config_search_paths() {
        if !path.exists() {
            continue;
        }

        debug!("Attempting to load config from: {}", path.display());
        match load_config_from_path(&path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                return Ok(config);
            }
            Err(e) => {
                warn!("Skipping config file {}: {e}", path.display());
            }
        }
    }

    debug!("No configuration file found or all failed to parse. Using default configuration.");
    Ok(AppConfig::default())
}

/// Load and validate a single configuration file
pub fn load_config_from_path(path: &Path) -> Result<AppConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&contents)?;

    if config.tools.use_escalation && config.tools.escalation.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "tools.escalation must name a program when use_escalation is enabled".to_string(),
        ));
    }

    let interval = config.monitor.poll_interval_sec;
    if interval != config.monitor.effective_poll_interval() {
        warn!(
            "poll_interval_sec = {interval} is outside 1-30s, using {}s",
            config.monitor.effective_poll_interval()
        );
    }

    Ok(config)
}
