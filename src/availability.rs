use crate::config::ToolsConfig;
use crate::nbfc;
use crate::util::process::CommandRunner;

/// Which of the external tools this program drives are usable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolAvailability {
    /// `ryzenadj` found in PATH
    pub ryzenadj: bool,
    /// `nbfc` client found in PATH
    pub nbfc: bool,
    /// NBFC service answering status requests
    pub nbfc_running: bool,
    /// `sensors` (lm-sensors) found in PATH
    pub sensors: bool,
    /// Escalation wrapper found in PATH, or escalation disabled
    pub escalation: bool,
}

impl ToolAvailability {
    /// Returns true if every tool is ready
    pub fn all_ready(&self) -> bool {
        self.ryzenadj && self.nbfc && self.nbfc_running && self.sensors && self.escalation
    }

    /// Human readable summary listing what is missing
    pub fn message(&self, tools: &ToolsConfig) -> String {
        if self.all_ready() {
            return "All required tools are available.".to_string();
        }

        let mut message = "Some features will not work:\n".to_string();

        if !self.ryzenadj {
            message.push_str(&format!(
                "- {} is not installed. TDP profiles cannot be applied.\n",
                tools.ryzenadj
            ));
        }

        if !self.nbfc {
            message.push_str(&format!(
                "- {} is not installed. Fan readings and fan control are unavailable.\n",
                tools.nbfc
            ));
        } else if !self.nbfc_running {
            message.push_str(&format!(
                "- The NBFC service is not running. Start it with '{} start'.\n",
                tools.nbfc
            ));
        }

        if !self.sensors {
            message.push_str(&format!(
                "- {} is not installed. Power readings are unavailable.\n",
                tools.sensors
            ));
        }

        if !self.escalation {
            message.push_str(&format!(
                "- {} is not installed. Privileged commands cannot run.\n",
                tools.escalation
            ));
        }

        message.trim_end().to_string()
    }
}

fn in_path(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Probe PATH and the NBFC service
pub fn detect<R: CommandRunner>(runner: &R, tools: &ToolsConfig) -> ToolAvailability {
    let nbfc_installed = nbfc::is_installed(tools);

    ToolAvailability {
        ryzenadj: in_path(&tools.ryzenadj),
        nbfc: nbfc_installed,
        nbfc_running: nbfc_installed && nbfc::is_running(runner, tools),
        sensors: in_path(&tools.sensors),
        escalation: !tools.use_escalation || in_path(&tools.escalation),
    }
}
