use crate::config::ToolsConfig;
use crate::core::{PerformanceMode, TdpProfile};
use crate::util::error::ProfileError;
use crate::util::process::elevated_copy;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    io::Write,
    path::{Path, PathBuf},
};

pub type Result<T, E = ProfileError> = std::result::Result<T, E>;

const DEV_PROFILE_DIR: &str = "./tdp_profiles";
const SYSTEM_PROFILE_DIR: &str = "/usr/share/ryzen-master-commander/tdp_profiles";

// Characters NBFC and most file managers choke on
const INVALID_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// On-disk layout of a TDP profile (`<name>.json`)
#[derive(Serialize, Deserialize, Debug, Clone)]
struct ProfileFile {
    #[serde(default)]
    name: String,
    #[serde(rename = "fast-limit")]
    fast_limit: u32,
    #[serde(rename = "slow-limit")]
    slow_limit: u32,
    #[serde(rename = "slow-time", default)]
    slow_time: u32,
    #[serde(rename = "tctl-temp", default)]
    tctl_temp: u32,
    #[serde(rename = "apu-skin-temp", default)]
    apu_skin_temp: u32,
    #[serde(rename = "max-performance", default)]
    max_performance: bool,
    #[serde(rename = "power-saving", default)]
    power_saving: bool,
}

// 0 is what the settings form writes for an empty advanced field
const fn unset_if_zero(value: u32) -> Option<u32> {
    if value == 0 { None } else { Some(value) }
}

impl ProfileFile {
    fn into_profile(self, file_stem: &str) -> TdpProfile {
        let name = if self.name.trim().is_empty() {
            warn!("Profile '{file_stem}' missing required 'name' field, using file name");
            file_stem.to_string()
        } else {
            self.name
        };

        if self.max_performance && self.power_saving {
            warn!("Profile '{name}' sets both max-performance and power-saving, using power-saving");
        }

        TdpProfile {
            name,
            fast_limit_watts: self.fast_limit,
            slow_limit_watts: self.slow_limit,
            slow_time_seconds: unset_if_zero(self.slow_time),
            tctl_temp_celsius: unset_if_zero(self.tctl_temp),
            apu_skin_temp_celsius: unset_if_zero(self.apu_skin_temp),
            mode: PerformanceMode::from_flags(self.max_performance, self.power_saving),
        }
    }
}

impl From<&TdpProfile> for ProfileFile {
    fn from(profile: &TdpProfile) -> Self {
        Self {
            name: profile.name.clone(),
            fast_limit: profile.fast_limit_watts,
            slow_limit: profile.slow_limit_watts,
            slow_time: profile.slow_time_seconds.unwrap_or(0),
            tctl_temp: profile.tctl_temp_celsius.unwrap_or(0),
            apu_skin_temp: profile.apu_skin_temp_celsius.unwrap_or(0),
            max_performance: profile.mode.is_max_performance(),
            power_saving: profile.mode.is_power_saving(),
        }
    }
}

/// A profile file that could not be loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedProfile {
    pub path: PathBuf,
    pub reason: String,
}

/// Check that a profile name is usable as a file name
pub fn validate_profile_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed != name || name.contains(INVALID_NAME_CHARS) {
        return Err(ProfileError::InvalidName(name.to_string()));
    }
    if name == "." || name == ".." {
        return Err(ProfileError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Validate a profile before it is written
pub fn validate_profile(profile: &TdpProfile) -> Result<()> {
    validate_profile_name(&profile.name)?;

    if profile.fast_limit_watts == 0 || profile.slow_limit_watts == 0 {
        return Err(ProfileError::InvalidValue(format!(
            "fast-limit and slow-limit must be greater than 0 (got {} / {})",
            profile.fast_limit_watts, profile.slow_limit_watts
        )));
    }

    Ok(())
}

/// Default places to look for TDP profiles, in priority order:
/// development checkout, system-wide install, per-user data directory
pub fn candidate_directories() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from(DEV_PROFILE_DIR), PathBuf::from(SYSTEM_PROFILE_DIR)];
    if let Some(data_dir) = dirs::data_dir() {
        dirs.push(data_dir.join("ryzen-master-commander/tdp_profiles"));
    }
    dirs
}

fn contains_json(dir: &Path) -> bool {
    fs::read_dir(dir).is_ok_and(|entries| {
        entries
            .flatten()
            .any(|e| e.path().extension().is_some_and(|ext| ext == "json"))
    })
}

/// Pick the profile directory.
///
/// An explicitly configured directory always wins. Otherwise the first
/// candidate that exists and holds at least one `.json` file is used, and
/// failing that the first candidate.
pub fn resolve_profile_directory(configured: Option<&Path>, candidates: &[PathBuf]) -> PathBuf {
    if let Some(dir) = configured {
        info!("Using configured profile directory: {}", dir.display());
        return dir.to_path_buf();
    }

    if let Some(dir) = candidates.iter().find(|d| d.is_dir() && contains_json(d)) {
        info!("Using profiles from: {}", dir.display());
        return dir.clone();
    }

    let fallback = candidates
        .first()
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEV_PROFILE_DIR));
    info!(
        "No profile directory with profiles found, falling back to: {}",
        fallback.display()
    );
    fallback
}

/// TDP profiles of one directory plus an in-memory cache of them
pub struct ProfileStore {
    directory: PathBuf,
    tools: ToolsConfig,
    cache: Vec<TdpProfile>,
    skipped: Vec<SkippedProfile>,
}

impl ProfileStore {
    /// Open a directory and load it eagerly. A failed initial load is
    /// logged and leaves the cache empty.
    pub fn open(directory: PathBuf, tools: ToolsConfig) -> Self {
        let mut store = Self {
            directory,
            tools,
            cache: Vec::new(),
            skipped: Vec::new(),
        };
        if let Err(e) = store.load_profiles() {
            warn!(
                "Could not load profiles from {}: {e}",
                store.directory.display()
            );
        }
        store
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Cached profiles, sorted by name
    pub fn profiles(&self) -> &[TdpProfile] {
        &self.cache
    }

    /// Files skipped by the last load
    pub fn skipped(&self) -> &[SkippedProfile] {
        &self.skipped
    }

    pub fn find(&self, name: &str) -> Option<&TdpProfile> {
        self.cache.iter().find(|p| p.name == name)
    }

    /// Re-read every `*.json` profile and refresh the cache.
    ///
    /// Malformed files are skipped, logged, and listed in [`Self::skipped`].
    /// The directory is created if it does not exist yet.
    pub fn load_profiles(&mut self) -> Result<Vec<TdpProfile>> {
        if !self.directory.exists() {
            fs::create_dir_all(&self.directory)?;
            info!("Created profiles directory: {}", self.directory.display());
        }

        let mut profiles = Vec::new();
        let mut skipped = Vec::new();

        for entry in fs::read_dir(&self.directory)?.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") || !path.is_file() {
                continue;
            }

            match read_profile(&path) {
                Ok(profile) => {
                    debug!("Successfully loaded profile: {}", profile.name);
                    profiles.push(profile);
                }
                Err(e) => {
                    warn!("Error loading profile '{}': {e}", path.display());
                    skipped.push(SkippedProfile {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        info!(
            "Loaded {} profiles total from {}",
            profiles.len(),
            self.directory.display()
        );

        self.cache.clone_from(&profiles);
        self.skipped = skipped;
        Ok(profiles)
    }

    /// Write `<name>.json` and reload the cache.
    ///
    /// If the directory is not writable by the current user the file is
    /// staged in a temporary file and copied in with elevated rights.
    pub fn save_profile(&mut self, profile: &TdpProfile) -> Result<PathBuf> {
        validate_profile(profile)?;

        let path = self.directory.join(format!("{}.json", profile.name));
        let contents = serde_json::to_string_pretty(&ProfileFile::from(profile))?;

        match write_profile_file(&self.directory, &path, &contents) {
            Ok(()) => info!("Saved profile to {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                info!("Permission denied, trying with elevated privileges...");
                self.save_elevated(&path, &contents)?;
            }
            Err(e) => return Err(e.into()),
        }

        self.load_profiles()?;
        Ok(path)
    }

    fn save_elevated(&self, path: &Path, contents: &str) -> Result<()> {
        if !self.tools.use_escalation {
            return Err(ProfileError::PermissionDenied(format!(
                "{} is not writable and privilege escalation is disabled",
                path.display()
            )));
        }

        let mut staged = tempfile::Builder::new()
            .prefix("rmc-profile-")
            .suffix(".json")
            .tempfile()?;
        staged.write_all(contents.as_bytes())?;
        staged.flush()?;

        // The staged file is removed when `staged` drops
        elevated_copy(&self.tools, staged.path(), path)?;
        info!("Successfully saved profile with elevated privileges");
        Ok(())
    }
}

fn write_profile_file(dir: &Path, path: &Path, contents: &str) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(path, contents)
}

fn read_profile(path: &Path) -> Result<TdpProfile> {
    let contents = fs::read_to_string(path)?;
    let file: ProfileFile = serde_json::from_str(&contents)?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(file.into_profile(&stem))
}
