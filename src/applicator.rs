use crate::config::ToolsConfig;
use crate::core::{CommandResult, TdpProfile};
use crate::util::process::{command_from_argv, privileged_argv, spawn_error};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::thread;
use std::time::{Duration, Instant};

pub type OperationId = u64;

pub const NO_PROFILE_MESSAGE: &str = "No profile selected";

type CompletionHandler = Box<dyn FnOnce(CommandResult)>;

struct PendingOperation {
    label: String,
    on_complete: CompletionHandler,
}

struct Completion {
    id: OperationId,
    result: CommandResult,
}

/// One external invocation and how to judge its outcome
struct LaunchSpec {
    label: String,
    program: String,
    args: Vec<String>,
    success_message: String,
    // nbfc-linux reports some failures on stderr with exit code 0
    stderr_error_marker: Option<&'static str>,
}

/// Applies TDP profiles and fan settings through privileged external tools.
///
/// Every launch returns immediately. A waiter thread owns each child until
/// it exits and posts the outcome back over a channel; completion handlers
/// run on the thread that calls [`Applicator::dispatch`] or
/// [`Applicator::wait_all`], exactly once each.
pub struct Applicator {
    tools: ToolsConfig,
    next_id: OperationId,
    pending: HashMap<OperationId, PendingOperation>,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
}

impl Applicator {
    pub fn new(tools: ToolsConfig) -> Self {
        let (tx, rx) = channel();
        Self {
            tools,
            next_id: 0,
            pending: HashMap::new(),
            tx,
            rx,
        }
    }

    /// Apply a TDP profile with ryzenadj.
    ///
    /// With no profile the handler is called synchronously with a failure and
    /// nothing is launched; that is the only synchronous path.
    pub fn apply_tdp<F>(&mut self, profile: Option<&TdpProfile>, on_complete: F) -> Option<OperationId>
    where
        F: FnOnce(CommandResult) + 'static,
    {
        let Some(profile) = profile else {
            warn!("Cannot apply TDP settings: {NO_PROFILE_MESSAGE}");
            on_complete(CommandResult::failure(NO_PROFILE_MESSAGE));
            return None;
        };

        let spec = LaunchSpec {
            label: format!("TDP profile '{}'", profile.name),
            program: self.tools.ryzenadj.clone(),
            args: ryzenadj_args(profile),
            success_message: "TDP settings applied successfully".to_string(),
            stderr_error_marker: None,
        };
        Some(self.launch(spec, Box::new(on_complete)))
    }

    /// Activate an NBFC fan profile (`nbfc config -a <name>`).
    /// Any directory or `.json` decoration on the name is stripped.
    pub fn apply_fan_profile<F>(&mut self, profile_name: &str, on_complete: F) -> OperationId
    where
        F: FnOnce(CommandResult) + 'static,
    {
        let name = fan_profile_name(profile_name);
        let spec = self.nbfc_spec(
            format!("fan profile '{name}'"),
            vec!["config".to_string(), "-a".to_string(), name.clone()],
            format!("Fan profile '{name}' applied successfully"),
        );
        self.launch(spec, Box::new(on_complete))
    }

    /// Select an NBFC model config without enabling it (`nbfc config -s <name>`)
    pub fn select_config<F>(&mut self, config_name: &str, on_complete: F) -> OperationId
    where
        F: FnOnce(CommandResult) + 'static,
    {
        let name = fan_profile_name(config_name);
        let spec = self.nbfc_spec(
            format!("NBFC config '{name}'"),
            vec!["config".to_string(), "-s".to_string(), name.clone()],
            format!("NBFC config '{name}' selected"),
        );
        self.launch(spec, Box::new(on_complete))
    }

    /// Hand fan control back to the NBFC curve (`nbfc set -a`)
    pub fn set_fan_auto<F>(&mut self, on_complete: F) -> OperationId
    where
        F: FnOnce(CommandResult) + 'static,
    {
        let spec = self.nbfc_spec(
            "automatic fan control".to_string(),
            vec!["set".to_string(), "-a".to_string()],
            "Fan control set to auto".to_string(),
        );
        self.launch(spec, Box::new(on_complete))
    }

    /// Pin the fan to a fixed speed (`nbfc set -s <0-100>`)
    pub fn set_fan_speed<F>(&mut self, speed_percent: u8, on_complete: F) -> OperationId
    where
        F: FnOnce(CommandResult) + 'static,
    {
        if speed_percent > 100 {
            return self.complete_later(
                "fixed fan speed".to_string(),
                CommandResult::failure(format!("Fan speed {speed_percent}% is outside 0-100%")),
                Box::new(on_complete),
            );
        }

        let spec = self.nbfc_spec(
            "fixed fan speed".to_string(),
            vec!["set".to_string(), "-s".to_string(), speed_percent.to_string()],
            format!("Fan speed set to {speed_percent}%"),
        );
        self.launch(spec, Box::new(on_complete))
    }

    /// Start the NBFC service (`nbfc start`)
    pub fn start_service<F>(&mut self, on_complete: F) -> OperationId
    where
        F: FnOnce(CommandResult) + 'static,
    {
        let spec = self.nbfc_spec(
            "NBFC service start".to_string(),
            vec!["start".to_string()],
            "NBFC service started".to_string(),
        );
        self.launch(spec, Box::new(on_complete))
    }

    /// Download the latest model configs (`nbfc update`)
    pub fn update_configs<F>(&mut self, on_complete: F) -> OperationId
    where
        F: FnOnce(CommandResult) + 'static,
    {
        let spec = self.nbfc_spec(
            "NBFC config update".to_string(),
            vec!["update".to_string()],
            "NBFC configs updated".to_string(),
        );
        self.launch(spec, Box::new(on_complete))
    }

    /// Number of launched operations whose handler has not run yet
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Run the handlers of every operation that has finished so far.
    /// Never blocks. Returns how many handlers ran.
    pub fn dispatch(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(completion) = self.rx.try_recv() {
            self.deliver(completion);
            delivered += 1;
        }
        delivered
    }

    /// Block until every pending operation has completed and its handler ran
    pub fn wait_all(&mut self) {
        while !self.pending.is_empty() {
            match self.rx.recv() {
                Ok(completion) => self.deliver(completion),
                Err(_) => break,
            }
        }
    }

    /// Like [`Applicator::wait_all`] but gives up after `timeout`.
    /// Returns `true` if nothing is left pending.
    pub fn wait_all_timeout(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(completion) => self.deliver(completion),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }
        self.pending.is_empty()
    }

    fn nbfc_spec(&self, label: String, args: Vec<String>, success_message: String) -> LaunchSpec {
        LaunchSpec {
            label,
            program: self.tools.nbfc.clone(),
            args,
            success_message,
            stderr_error_marker: Some("ERROR"),
        }
    }

    fn register(&mut self, label: String, on_complete: CompletionHandler) -> OperationId {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, PendingOperation { label, on_complete });
        id
    }

    /// Queue an already-known result so it is delivered like any other completion
    fn complete_later(
        &mut self,
        label: String,
        result: CommandResult,
        on_complete: CompletionHandler,
    ) -> OperationId {
        let id = self.register(label, on_complete);
        // rx is owned by self, so the send cannot fail here
        let _ = self.tx.send(Completion { id, result });
        id
    }

    fn launch(&mut self, spec: LaunchSpec, on_complete: CompletionHandler) -> OperationId {
        let argv = privileged_argv(&self.tools, &spec.program, &spec.args);
        info!("Applying {}: {}", spec.label, argv.join(" "));

        let Some(mut command) = command_from_argv(&argv) else {
            let result = CommandResult::failure(format!("Nothing to run for {}", spec.label));
            return self.complete_later(spec.label, result, on_complete);
        };

        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                let err = spawn_error(&argv[0], e);
                let result = CommandResult::failure(format!("Failed to launch {}: {err}", spec.label));
                return self.complete_later(spec.label, result, on_complete);
            }
        };

        let id = self.register(spec.label.clone(), on_complete);
        let tx = self.tx.clone();
        debug!("Operation {id} running as pid {}", child.id());

        thread::spawn(move || {
            let result = match child.wait_with_output() {
                Ok(output) => judge(&spec, output.status, &output.stderr),
                Err(e) => CommandResult::failure(format!("Failed to wait for {}: {e}", spec.label)),
            };
            // The applicator may already be gone; nobody is left to notify then.
            let _ = tx.send(Completion { id, result });
        });

        id
    }

    fn deliver(&mut self, completion: Completion) {
        let Some(operation) = self.pending.remove(&completion.id) else {
            error!("Completion for unknown operation {}", completion.id);
            return;
        };

        if completion.result.succeeded {
            info!("{}: {}", operation.label, completion.result.message);
        } else {
            warn!("{}: {}", operation.label, completion.result.message);
        }

        (operation.on_complete)(completion.result);
    }
}

fn judge(spec: &LaunchSpec, status: ExitStatus, stderr: &[u8]) -> CommandResult {
    let stderr = String::from_utf8_lossy(stderr).trim().to_string();

    match status.code() {
        Some(0) => match spec.stderr_error_marker {
            Some(marker) if stderr.contains(marker) => CommandResult::failure(format!(
                "Error applying {}: {stderr}",
                spec.label
            )),
            _ => CommandResult::success(spec.success_message.clone()),
        },
        Some(code) if stderr.is_empty() => CommandResult::failure(format!(
            "Error applying {}: exit code {code}",
            spec.label
        )),
        Some(code) => CommandResult::failure(format!(
            "Error applying {}: exit code {code}: {stderr}",
            spec.label
        )),
        None => CommandResult::failure(format!(
            "Error applying {}: terminated by a signal",
            spec.label
        )),
    }
}

/// ryzenadj arguments for a profile.
///
/// Limits are given in watts and seconds but ryzenadj takes milliwatts and
/// milliseconds. Power saving wins over max performance.
pub fn ryzenadj_args(profile: &TdpProfile) -> Vec<String> {
    let mut args = vec![
        format!("--fast-limit={}", u64::from(profile.fast_limit_watts) * 1000),
        format!("--slow-limit={}", u64::from(profile.slow_limit_watts) * 1000),
    ];

    if let Some(slow_time) = profile.slow_time_seconds {
        args.push(format!("--slow-time={}", u64::from(slow_time) * 1000));
    }
    if let Some(tctl) = profile.tctl_temp_celsius {
        args.push(format!("--tctl-temp={tctl}"));
    }
    if let Some(skin) = profile.apu_skin_temp_celsius {
        args.push(format!("--apu-skin-temp={skin}"));
    }

    if profile.mode.is_power_saving() {
        args.push("--power-saving".to_string());
    } else if profile.mode.is_max_performance() {
        args.push("--max-performance".to_string());
    }

    args
}

/// Strip directories and a `.json` extension: `/usr/share/nbfc/configs/Foo.json` -> `Foo`
///
/// Only `.json` is removed. NBFC model names routinely contain dots
/// (`Lenovo Yoga 14s 2021.2`, `Acer Nitro AN515-43.v2`), so anything after
/// the last dot is part of the name unless it is `.json`.
pub fn fan_profile_name(profile_name: &str) -> String {
    let trimmed = profile_name.trim();
    let file_name = Path::new(trimmed)
        .file_name()
        .map_or_else(|| trimmed.to_string(), |name| name.to_string_lossy().into_owned());
    file_name
        .strip_suffix(".json")
        .map_or_else(|| file_name.clone(), ToString::to_string)
}
