use crate::availability;
use crate::config::{self, AppConfig};
use crate::monitor::Collector;
use crate::nbfc;
use crate::profiles::{self, ProfileStore};
use crate::util::error::AppError;
use crate::util::process::SystemRunner;
use chrono::Local;

/// Prints comprehensive debug information about the system
pub fn run_debug(config: &AppConfig) -> Result<(), AppError> {
    println!("=== RYZEN MASTER COMMANDER DEBUG INFORMATION ===");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Timestamp: {}", Local::now().to_rfc3339());

    println!("\n--- CONFIGURATION ---");
    match config::find_config_path() {
        Some(path) => println!("Config File: {}", path.display()),
        None => println!("Config File: None (using defaults)"),
    }
    println!("Current Configuration: {config:#?}");

    println!("\n--- TOOL AVAILABILITY ---");
    let report = availability::detect(&SystemRunner, &config.tools);
    println!("ryzenadj: {}", report.ryzenadj);
    println!("nbfc: {}", report.nbfc);
    println!("NBFC service running: {}", report.nbfc_running);
    println!("sensors: {}", report.sensors);
    println!("{}: {}", config.tools.escalation, report.escalation);
    println!("{}", report.message(&config.tools));

    println!("\n--- CURRENT READINGS ---");
    let snapshot = Collector::new(config.tools.clone()).collect();
    println!("Temperature: {}", snapshot.temperature_display());
    println!("Fan Speed: {}", snapshot.fan_speed_display());
    println!("Power: {}", snapshot.power_display());
    println!("Fan Profile: {}", snapshot.profile_display());

    println!("\n--- TDP PROFILES ---");
    let candidates = profiles::candidate_directories();
    for candidate in &candidates {
        println!(
            "Candidate: {} (exists: {})",
            candidate.display(),
            candidate.is_dir()
        );
    }
    let directory =
        profiles::resolve_profile_directory(config.profiles.directory.as_deref(), &candidates);
    let store = ProfileStore::open(directory, config.tools.clone());
    println!("Profile Directory: {}", store.directory().display());
    println!("Profiles Loaded: {}", store.profiles().len());
    for profile in store.profiles() {
        println!(
            "  {}: fast {} W, slow {} W, mode {:?}",
            profile.name, profile.fast_limit_watts, profile.slow_limit_watts, profile.mode
        );
    }
    if !store.skipped().is_empty() {
        println!("Skipped Files:");
        for skipped in store.skipped() {
            println!("  {}: {}", skipped.path.display(), skipped.reason);
        }
    }

    println!("\n--- NBFC CONFIGS ---");
    for dir in &config.nbfc.config_dirs {
        println!("Config Directory: {} (exists: {})", dir.display(), dir.is_dir());
    }
    let configs = nbfc::available_configs(&config.nbfc.config_dirs);
    println!("Available Configs: {}", configs.len());
    for name in &configs {
        println!("  {name}");
    }

    Ok(())
}
