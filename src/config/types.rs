// Configuration types and structures for ryzen-master-commander
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const MIN_POLL_INTERVAL_SEC: u64 = 1;
pub const MAX_POLL_INTERVAL_SEC: u64 = 30;

#[derive(Deserialize, Serialize, Debug, Default, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub profiles: ProfilesConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub nbfc: NbfcConfigDirs,
}

// Error type for config loading
#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(toml::de::Error),
    ValidationError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        Self::TomlError(err)
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(e) => write!(f, "I/O error: {e}"),
            Self::TomlError(e) => write!(f, "TOML parsing error: {e}"),
            Self::ValidationError(s) => write!(f, "Configuration validation error: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_sec")]
    pub poll_interval_sec: u64,
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    #[serde(default)]
    pub stats_file_path: Option<String>,
}

impl MonitorConfig {
    /// Poll interval clamped to the supported 1-30 second range
    pub fn effective_poll_interval(&self) -> u64 {
        clamp_poll_interval(self.poll_interval_sec)
    }
}

pub const fn clamp_poll_interval(secs: u64) -> u64 {
    if secs < MIN_POLL_INTERVAL_SEC {
        MIN_POLL_INTERVAL_SEC
    } else if secs > MAX_POLL_INTERVAL_SEC {
        MAX_POLL_INTERVAL_SEC
    } else {
        secs
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_sec: default_poll_interval_sec(),
            log_level: default_log_level(),
            stats_file_path: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ProfilesConfig {
    /// Explicit TDP profile directory; skips discovery when set
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// External executables and the privilege escalation wrapper
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ToolsConfig {
    #[serde(default = "default_use_escalation")]
    pub use_escalation: bool,
    #[serde(default = "default_escalation")]
    pub escalation: String,
    #[serde(default = "default_nbfc")]
    pub nbfc: String,
    #[serde(default = "default_ryzenadj")]
    pub ryzenadj: String,
    #[serde(default = "default_sensors")]
    pub sensors: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            use_escalation: default_use_escalation(),
            escalation: default_escalation(),
            nbfc: default_nbfc(),
            ryzenadj: default_ryzenadj(),
            sensors: default_sensors(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NbfcConfigDirs {
    #[serde(default = "default_nbfc_config_dirs")]
    pub config_dirs: Vec<PathBuf>,
}

impl NbfcConfigDirs {
    /// Directory custom fan profiles are written to
    pub fn primary_dir(&self) -> PathBuf {
        self.config_dirs
            .first()
            .cloned()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_NBFC_CONFIG_DIRS[0]))
    }
}

impl Default for NbfcConfigDirs {
    fn default() -> Self {
        Self {
            config_dirs: default_nbfc_config_dirs(),
        }
    }
}

pub const DEFAULT_NBFC_CONFIG_DIRS: [&str; 2] = ["/usr/share/nbfc/configs", "/etc/nbfc/configs"];

const fn default_poll_interval_sec() -> u64 {
    5
}

const fn default_log_level() -> LogLevel {
    LogLevel::Info
}

const fn default_use_escalation() -> bool {
    true
}

fn default_escalation() -> String {
    "pkexec".to_string()
}

fn default_nbfc() -> String {
    "nbfc".to_string()
}

fn default_ryzenadj() -> String {
    "ryzenadj".to_string()
}

fn default_sensors() -> String {
    "sensors".to_string()
}

fn default_nbfc_config_dirs() -> Vec<PathBuf> {
    DEFAULT_NBFC_CONFIG_DIRS.iter().map(PathBuf::from).collect()
}
