use crate::config::ToolsConfig;
use crate::core::Snapshot;
use crate::parse::{self, NbfcStatus};
use crate::util::error::ToolError;
use crate::util::process::{CommandRunner, SystemRunner};
use log::{debug, warn};

/// Polls the fan daemon and the hardware sensors for a `Snapshot`.
///
/// Nothing here returns an error: every failure degrades the affected
/// fields to unavailable and is logged.
pub struct Collector<R: CommandRunner = SystemRunner> {
    runner: R,
    tools: ToolsConfig,
}

impl Collector<SystemRunner> {
    pub fn new(tools: ToolsConfig) -> Self {
        Self::with_runner(tools, SystemRunner)
    }
}

impl<R: CommandRunner> Collector<R> {
    pub fn with_runner(tools: ToolsConfig, runner: R) -> Self {
        Self { runner, tools }
    }

    /// Take one best-effort reading. The two probes are independent.
    pub fn collect(&self) -> Snapshot {
        let nbfc = self.read_nbfc_status();
        let power_watts = self.read_power();

        Snapshot {
            temperature_celsius: nbfc.temperature_celsius,
            fan_speed_percent: nbfc.fan_speed_percent,
            active_profile_name: nbfc.config_name,
            power_watts,
        }
    }

    fn read_nbfc_status(&self) -> NbfcStatus {
        match self.runner.run(&self.tools.nbfc, &["status", "-a"]) {
            Ok(output) => {
                let status = parse::parse_nbfc_status(&output);
                if status.temperature_celsius.is_none() {
                    debug!("No temperature in '{} status -a' output", self.tools.nbfc);
                }
                if status.fan_speed_percent.is_none() {
                    debug!("No fan speed in '{} status -a' output", self.tools.nbfc);
                }
                status
            }
            Err(ToolError::NotInstalled(tool)) => {
                warn!("{tool} command not found. Make sure NoteBook FanControl is installed.");
                NbfcStatus::default()
            }
            Err(e) => {
                warn!("Failed to execute '{} status -a': {e}", self.tools.nbfc);
                NbfcStatus::default()
            }
        }
    }

    fn read_power(&self) -> Option<f64> {
        match self.runner.run(&self.tools.sensors, &[]) {
            Ok(output) => {
                let power = parse::parse_sensors_power(&output);
                if power.is_none() {
                    debug!("No power1 reading in {} output", self.tools.sensors);
                }
                power
            }
            Err(e) => {
                warn!("Failed to get power data: {e}");
                None
            }
        }
    }
}
