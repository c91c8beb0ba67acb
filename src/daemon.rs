use crate::config::watcher::ConfigWatcher;
use crate::config::{AppConfig, LogLevel, clamp_poll_interval, find_config_path};
use crate::core::Snapshot;
use crate::monitor::Collector;
use crate::util::error::AppError;
use chrono::{DateTime, Local};
use log::{LevelFilter, debug, error, info, warn};
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

// Granularity of the shutdown check while waiting for the next poll
const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// Poll the collector until Ctrl-C, printing one line per reading
pub fn run_monitor(
    mut config: AppConfig,
    verbose: bool,
    interval_override: Option<u64>,
) -> Result<(), AppError> {
    let effective_log_level = if verbose {
        LogLevel::Debug
    } else {
        config.monitor.log_level
    };

    let level_filter = match effective_log_level {
        LogLevel::Error => LevelFilter::Error,
        LogLevel::Warning => LevelFilter::Warn,
        LogLevel::Info => LevelFilter::Info,
        LogLevel::Debug => LevelFilter::Debug,
    };

    // Adjust the filter without re-initializing the logger
    log::set_max_level(level_filter);

    info!("Starting readings monitor...");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        info!("Received shutdown signal, exiting...");
        r.store(false, Ordering::SeqCst);
    })
    .map_err(|e| AppError::Generic(format!("Error setting Ctrl-C handler: {e}")))?;

    let mut poll_interval = poll_interval_for(&config, interval_override);
    info!("Monitor initialized with poll interval: {poll_interval}s");

    if let Some(stats_path) = &config.monitor.stats_file_path {
        info!("Stats will be written to: {stats_path}");
    }

    let mut config_watcher = match find_config_path() {
        Some(path) => match ConfigWatcher::new(&path) {
            Ok(watcher) => {
                info!("Watching config file: {}", watcher.config_path().display());
                Some(watcher)
            }
            Err(e) => {
                warn!("Failed to initialize config file watcher: {e}");
                None
            }
        },
        None => {
            debug!("No config file found to watch for changes.");
            None
        }
    };

    let mut collector = Collector::new(config.tools.clone());

    while running.load(Ordering::SeqCst) {
        let start_time = Instant::now();

        if let Some(watcher) = &mut config_watcher {
            match watcher.check_for_changes() {
                Some(Ok(new_config)) => {
                    info!("Config file changed, updating configuration");
                    config = new_config;
                    collector = Collector::new(config.tools.clone());
                    poll_interval = poll_interval_for(&config, interval_override);
                }
                Some(Err(e)) => {
                    error!("Error loading new configuration: {e}");
                }
                None => {}
            }
        }

        let snapshot = collector.collect();
        let now = Local::now();
        println!("{}", format_monitor_line(&snapshot, &now));

        if let Some(stats_path) = &config.monitor.stats_file_path {
            if let Err(e) = write_stats_file(stats_path, &snapshot, &now) {
                error!("Failed to write stats file: {e}");
            }
        }

        let poll_duration = Duration::from_secs(poll_interval);
        let elapsed = start_time.elapsed();
        if elapsed < poll_duration {
            debug!(
                "Sleeping for {}s until next reading",
                (poll_duration - elapsed).as_secs()
            );
            while running.load(Ordering::SeqCst) && start_time.elapsed() < poll_duration {
                std::thread::sleep(SLEEP_SLICE.min(poll_duration.saturating_sub(start_time.elapsed())));
            }
        }
    }

    info!("Monitor stopped");
    Ok(())
}

fn poll_interval_for(config: &AppConfig, interval_override: Option<u64>) -> u64 {
    interval_override.map_or_else(
        || config.monitor.effective_poll_interval(),
        clamp_poll_interval,
    )
}

fn format_monitor_line(snapshot: &Snapshot, timestamp: &DateTime<Local>) -> String {
    format!(
        "[{}] temp {} | fan {} | power {} | profile {}",
        timestamp.format("%H:%M:%S"),
        snapshot.temperature_display(),
        snapshot.fan_speed_display(),
        snapshot.power_display(),
        snapshot.profile_display()
    )
}

/// Write the latest reading as `key=value` lines for other tools to read
fn write_stats_file(
    path: &str,
    snapshot: &Snapshot,
    timestamp: &DateTime<Local>,
) -> Result<(), std::io::Error> {
    let mut file = File::create(path)?;

    writeln!(file, "timestamp={}", timestamp.to_rfc3339())?;

    if let Some(temp) = snapshot.temperature_celsius {
        writeln!(file, "cpu_temp={temp:.1}")?;
    }
    if let Some(speed) = snapshot.fan_speed_percent {
        writeln!(file, "fan_speed={speed:.1}")?;
    }
    if let Some(power) = snapshot.power_watts {
        writeln!(file, "power_watts={power:.2}")?;
    }
    if let Some(name) = &snapshot.active_profile_name {
        writeln!(file, "fan_profile={name}")?;
    }

    Ok(())
}
