mod applicator;
mod availability;
mod cli;
mod config;
mod core;
mod daemon;
mod monitor;
mod nbfc;
mod parse;
mod profiles;
mod util;

use crate::applicator::Applicator;
use crate::config::AppConfig;
use crate::core::{CommandResult, FanCurve, PerformanceMode, TdpProfile};
use crate::monitor::Collector;
use crate::profiles::ProfileStore;
use crate::util::error::{AppError, NbfcError, ProfileError};
use crate::util::process::SystemRunner;
use clap::Parser;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

// Wait this long before reporting operations still pending
const PROGRESS_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Display current temperature, fan speed, power and fan profile
    Info,
    /// Print readings periodically until interrupted
    Monitor {
        #[clap(long)]
        verbose: bool,
        /// Seconds between readings (1-30)
        #[clap(long)]
        interval: Option<u64>,
    },
    /// Manage saved TDP profiles
    Profiles {
        #[clap(subcommand)]
        command: ProfilesCommand,
    },
    /// Apply a saved TDP profile by name
    ApplyProfile { name: String },
    /// Apply TDP limits without saving them
    SetTdp {
        #[clap(flatten)]
        limits: TdpArgs,
    },
    /// Control the fan through NBFC
    Fan {
        #[clap(subcommand)]
        command: FanCommand,
    },
    /// Print diagnostic information
    Debug,
}

#[derive(Parser, Debug)]
enum ProfilesCommand {
    /// List saved profiles
    List,
    /// Save (or overwrite) a profile
    Save {
        #[clap(long)]
        name: String,
        #[clap(flatten)]
        limits: TdpArgs,
    },
}

#[derive(clap::Args, Debug)]
struct TdpArgs {
    /// Fast (boost) power limit in watts
    #[clap(long)]
    fast_limit: u32,
    /// Sustained power limit in watts
    #[clap(long)]
    slow_limit: u32,
    /// Slow limit time window in seconds
    #[clap(long)]
    slow_time: Option<u32>,
    /// Tctl temperature limit in °C
    #[clap(long)]
    tctl_temp: Option<u32>,
    /// APU skin temperature limit in °C
    #[clap(long)]
    apu_skin_temp: Option<u32>,
    #[clap(long, value_enum, default_value_t = PerformanceMode::Normal)]
    mode: PerformanceMode,
}

impl TdpArgs {
    fn into_profile(self, name: String) -> TdpProfile {
        TdpProfile {
            slow_time_seconds: self.slow_time.filter(|&v| v > 0),
            tctl_temp_celsius: self.tctl_temp.filter(|&v| v > 0),
            apu_skin_temp_celsius: self.apu_skin_temp.filter(|&v| v > 0),
            mode: self.mode,
            ..TdpProfile::basic(name, self.fast_limit, self.slow_limit)
        }
    }
}

#[derive(Parser, Debug)]
enum FanCommand {
    /// Activate an NBFC fan profile
    Apply { profile: String },
    /// Return to automatic fan control
    Auto,
    /// Set a fixed fan speed in percent
    Speed {
        #[clap(value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },
    /// Start the NBFC service
    Start,
    /// Get NBFC running, selecting the recommended config if needed
    Setup,
    /// Select an NBFC model config
    Select { config: String },
    /// Download the latest NBFC model configs
    UpdateConfigs,
    /// List available NBFC configs
    Configs,
    /// Show the config NBFC recommends for this machine
    Recommended,
    /// Print the fan curve of an NBFC config
    Curve { profile: String },
    /// Write a custom fan profile from curve points
    SaveCurve {
        name: String,
        /// Curve point as TEMP:SPEED, repeatable
        #[clap(long = "point", value_parser = parse_curve_point)]
        points: Vec<(f64, f64)>,
        /// Existing config to copy registers and other settings from
        #[clap(long)]
        base: Option<String>,
    },
}

fn parse_curve_point(value: &str) -> Result<(f64, f64), String> {
    let (temp, speed) = value
        .split_once(':')
        .ok_or_else(|| format!("expected TEMP:SPEED, got '{value}'"))?;
    let temp = temp
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid temperature '{temp}': {e}"))?;
    let speed = speed
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid fan speed '{speed}': {e}"))?;
    Ok((temp, speed))
}

fn open_profile_store(config: &AppConfig) -> ProfileStore {
    let directory = profiles::resolve_profile_directory(
        config.profiles.directory.as_deref(),
        &profiles::candidate_directories(),
    );
    ProfileStore::open(directory, config.tools.clone())
}

/// Launch operations, wait for all of them and print each outcome.
/// Fails if any operation reported failure.
fn run_operations<F>(config: &AppConfig, launch: F) -> Result<(), AppError>
where
    F: FnOnce(&mut Applicator, &dyn Fn() -> Box<dyn FnOnce(CommandResult)>),
{
    let results: Rc<RefCell<Vec<CommandResult>>> = Rc::default();
    let handler = || -> Box<dyn FnOnce(CommandResult)> {
        let results = Rc::clone(&results);
        Box::new(move |result: CommandResult| {
            println!("{result}");
            results.borrow_mut().push(result);
        })
    };

    let mut applicator = Applicator::new(config.tools.clone());
    launch(&mut applicator, &handler);
    applicator.dispatch();
    if applicator.pending_count() > 0 && !applicator.wait_all_timeout(PROGRESS_INTERVAL) {
        log::info!(
            "Still waiting for {} operation(s), possibly on an authorization prompt...",
            applicator.pending_count()
        );
        applicator.wait_all();
    }

    let failures = results.borrow().iter().filter(|r| !r.succeeded).count();
    if failures > 0 {
        return Err(AppError::Generic(format!("{failures} operation(s) failed")));
    }
    Ok(())
}

fn print_info(config: &AppConfig) {
    let snapshot = Collector::new(config.tools.clone()).collect();
    println!("--- Readings ---");
    println!("Temperature: {}", snapshot.temperature_display());
    println!("Fan Speed: {}", snapshot.fan_speed_display());
    println!("Power: {}", snapshot.power_display());
    println!("Fan Profile: {}", snapshot.profile_display());
}

fn run_profiles(config: &AppConfig, command: ProfilesCommand) -> Result<(), AppError> {
    let mut store = open_profile_store(config);

    match command {
        ProfilesCommand::List => {
            println!("Profile directory: {}", store.directory().display());
            if store.profiles().is_empty() {
                println!("  No profiles found.");
            }
            for p in store.profiles() {
                println!(
                    "  {}: fast {} W, slow {} W, slow-time {}, tctl {}, apu-skin {}, mode {:?}",
                    p.name,
                    p.fast_limit_watts,
                    p.slow_limit_watts,
                    optional(p.slow_time_seconds, "s"),
                    optional(p.tctl_temp_celsius, "°C"),
                    optional(p.apu_skin_temp_celsius, "°C"),
                    p.mode
                );
            }
            for skipped in store.skipped() {
                println!(
                    "  Skipped {}: {}",
                    skipped.path.display(),
                    skipped.reason
                );
            }
            Ok(())
        }
        ProfilesCommand::Save { name, limits } => {
            let path = store.save_profile(&limits.into_profile(name))?;
            println!("Saved profile to {}", path.display());
            Ok(())
        }
    }
}

fn optional(value: Option<u32>, unit: &str) -> String {
    value.map_or_else(|| crate::core::UNAVAILABLE.to_string(), |v| format!("{v}{unit}"))
}

fn run_fan(config: &AppConfig, command: FanCommand) -> Result<(), AppError> {
    let dirs = &config.nbfc.config_dirs;

    match command {
        FanCommand::Apply { profile } => run_operations(config, |app, handler| {
            app.apply_fan_profile(&profile, handler());
        }),
        FanCommand::Auto => run_operations(config, |app, handler| {
            app.set_fan_auto(handler());
        }),
        FanCommand::Speed { percent } => run_operations(config, |app, handler| {
            app.set_fan_speed(percent, handler());
        }),
        FanCommand::Start => run_operations(config, |app, handler| {
            app.start_service(handler());
        }),
        FanCommand::Setup => {
            let mut applicator = Applicator::new(config.tools.clone());
            match nbfc::setup(&SystemRunner, &mut applicator, &config.tools)? {
                nbfc::SetupOutcome::AlreadyRunning => println!("NBFC service is already running"),
                nbfc::SetupOutcome::Started => println!("NBFC service started"),
                nbfc::SetupOutcome::Configured(name) => {
                    println!("NBFC service started with recommended config '{name}'");
                }
            }
            Ok(())
        }
        FanCommand::Select { config: name } => run_operations(config, |app, handler| {
            app.select_config(&name, handler());
        }),
        FanCommand::UpdateConfigs => run_operations(config, |app, handler| {
            app.update_configs(handler());
        }),
        FanCommand::Configs => {
            let configs = nbfc::available_configs(dirs);
            if configs.is_empty() {
                println!("No NBFC configs found.");
            }
            for name in configs {
                println!("{name}");
            }
            Ok(())
        }
        FanCommand::Recommended => match nbfc::recommended_config(&SystemRunner, &config.tools) {
            Some(name) => {
                println!("{name}");
                Ok(())
            }
            None => Err(AppError::Generic(
                "NBFC did not recommend a config for this machine".to_string(),
            )),
        },
        FanCommand::Curve { profile } => {
            let nbfc_config = nbfc::load_named_config(dirs, &profile)?;
            let mut points = nbfc_config.curve_points();
            if points.is_empty() {
                println!("No fan curve data in '{profile}', showing the default curve.");
                points = FanCurve::default().points().to_vec();
            } else if nbfc_config.fan_curve().is_none() {
                println!("The curve of '{profile}' cannot be used as a base for save-curve.");
            }
            for point in &points {
                println!(
                    "{:>5.0}°C -> {:>3.0}%",
                    point.temperature_celsius, point.fan_speed_percent
                );
            }
            Ok(())
        }
        FanCommand::SaveCurve { name, points, base } => {
            let curve =
                FanCurve::from_pairs(&points).map_err(|e| NbfcError::InvalidCurve(e.to_string()))?;
            let base = base
                .map(|b| nbfc::load_named_config(dirs, &b))
                .transpose()?;
            let profile = nbfc::build_fan_profile(base.as_ref(), &name, &curve);
            let path = nbfc::save_fan_profile(&config.nbfc, &config.tools, &name, &profile)?;
            println!("Saved fan profile to {}", path.display());
            Ok(())
        }
    }
}

fn needs_privileges(error: &AppError) -> bool {
    matches!(
        error,
        AppError::Profile(ProfileError::PermissionDenied(_))
            | AppError::Profile(ProfileError::Escalation(_))
            | AppError::Nbfc(NbfcError::Escalation(_))
            | AppError::Nbfc(NbfcError::Setup(_))
    )
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {e}. Using default values.");
            AppConfig::default()
        }
    };

    let command_result = match cli.command {
        Some(Commands::Info) => {
            print_info(&config);
            Ok(())
        }
        Some(Commands::Monitor { verbose, interval }) => {
            daemon::run_monitor(config.clone(), verbose, interval)
        }
        Some(Commands::Profiles { command }) => run_profiles(&config, command),
        Some(Commands::ApplyProfile { name }) => {
            let store = open_profile_store(&config);
            let profile = store.find(&name).cloned();
            if profile.is_none() {
                log::warn!("Profile '{name}' not found in {}", store.directory().display());
            }
            run_operations(&config, |app, handler| {
                app.apply_tdp(profile.as_ref(), handler());
            })
        }
        Some(Commands::SetTdp { limits }) => {
            let profile = limits.into_profile("Custom".to_string());
            profiles::validate_profile(&profile)
                .map_err(AppError::from)
                .and_then(|()| {
                    run_operations(&config, |app, handler| {
                        app.apply_tdp(Some(&profile), handler());
                    })
                })
        }
        Some(Commands::Fan { command }) => run_fan(&config, command),
        Some(Commands::Debug) => cli::debug::run_debug(&config),
        None => {
            println!("Welcome to ryzen-master-commander! Use --help for commands.");
            println!("Current effective configuration: {config:?}");
            Ok(())
        }
    };

    if let Err(e) = command_result {
        eprintln!("Error executing command: {e}");
        if let Some(source) = std::error::Error::source(&e) {
            eprintln!("Caused by: {source}");
        }
        if needs_privileges(&e) {
            eprintln!(
                "Hint: This operation needs administrator privileges; check that {} is installed and the request was authorized.",
                config.tools.escalation
            );
        }

        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_curve_point() {
        assert_eq!(parse_curve_point("60:45"), Ok((60.0, 45.0)));
        assert_eq!(parse_curve_point(" 72.5 : 100 "), Ok((72.5, 100.0)));
        assert!(parse_curve_point("60").is_err());
        assert!(parse_curve_point("hot:45").is_err());
    }

    #[test]
    fn test_cli_parses_save_curve() {
        let cli = Cli::try_parse_from([
            "ryzen-master-commander",
            "fan",
            "save-curve",
            "Quiet Fans",
            "--point",
            "40:20",
            "--point",
            "80:100",
            "--base",
            "HP OMEN",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Fan {
                command: FanCommand::SaveCurve { name, points, base },
            }) => {
                assert_eq!(name, "Quiet Fans");
                assert_eq!(points, vec![(40.0, 20.0), (80.0, 100.0)]);
                assert_eq!(base.as_deref(), Some("HP OMEN"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_tdp_args() {
        let cli = Cli::try_parse_from([
            "ryzen-master-commander",
            "profiles",
            "save",
            "--name",
            "Turbo",
            "--fast-limit",
            "54",
            "--slow-limit",
            "35",
            "--tctl-temp",
            "95",
            "--mode",
            "max-performance",
        ])
        .unwrap();

        let Some(Commands::Profiles {
            command: ProfilesCommand::Save { name, limits },
        }) = cli.command
        else {
            panic!("expected profiles save");
        };
        let profile = limits.into_profile(name);
        assert_eq!(profile.fast_limit_watts, 54);
        assert_eq!(profile.tctl_temp_celsius, Some(95));
        assert_eq!(profile.slow_time_seconds, None);
        assert_eq!(profile.mode, PerformanceMode::MaxPerformance);
    }

    #[test]
    fn test_cli_rejects_fan_speed_over_100() {
        assert!(Cli::try_parse_from(["ryzen-master-commander", "fan", "speed", "101"]).is_err());
    }

    #[test]
    fn test_cli_parses_fan_setup() {
        let cli = Cli::try_parse_from(["ryzen-master-commander", "fan", "setup"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Fan {
                command: FanCommand::Setup
            })
        ));
    }

    #[test]
    fn test_run_operations_reports_failure() {
        let config = AppConfig::default();
        let result = run_operations(&config, |app, handler| {
            app.apply_tdp(None, handler());
        });
        assert!(matches!(result, Err(AppError::Generic(_))));
    }
}
