use crate::config::ToolsConfig;
use crate::util::error::ToolError;
use log::{debug, info};
use std::{
    io,
    path::Path,
    process::{Command, Output, Stdio},
};

/// Runs an external command to completion and hands back its standard output.
///
/// This is the seam between the readings collector (and the NBFC probes) and
/// the operating system, so tests can feed literal tool output in.
pub trait CommandRunner {
    /// # Errors
    ///
    /// - `ToolError::NotInstalled` if the executable cannot be found
    /// - `ToolError::Failed` if the command exits unsuccessfully
    /// - `ToolError::Io` for any other spawn or pipe failure
    fn run(&self, program: &str, args: &[&str]) -> Result<String, ToolError>;
}

/// `CommandRunner` backed by `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String, ToolError> {
        debug!("Running: {program} {}", args.join(" "));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_error(program, e))?;

        output_to_result(program, output)
    }
}

/// Map a spawn failure to the matching `ToolError` variant
pub fn spawn_error(program: &str, err: io::Error) -> ToolError {
    match err.kind() {
        io::ErrorKind::NotFound => ToolError::NotInstalled(program.to_string()),
        _ => ToolError::Io {
            tool: program.to_string(),
            source: err,
        },
    }
}

fn output_to_result(program: &str, output: Output) -> Result<String, ToolError> {
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(ToolError::Failed {
            tool: program.to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Build the argv for running `program` with elevated rights.
///
/// With escalation enabled this is `[wrapper, program, args...]`, otherwise
/// the program is invoked directly.
pub fn privileged_argv(tools: &ToolsConfig, program: &str, args: &[String]) -> Vec<String> {
    let mut argv = Vec::with_capacity(args.len() + 2);
    if tools.use_escalation {
        argv.push(tools.escalation.clone());
    }
    argv.push(program.to_string());
    argv.extend(args.iter().cloned());
    argv
}

/// Turn an argv into a `Command`. Returns `None` for an empty argv.
pub fn command_from_argv(argv: &[String]) -> Option<Command> {
    let (program, args) = argv.split_first()?;
    let mut command = Command::new(program);
    command.args(args);
    Some(command)
}

/// Run a privileged command synchronously and wait for it.
pub fn run_privileged(tools: &ToolsConfig, program: &str, args: &[String]) -> Result<(), ToolError> {
    let argv = privileged_argv(tools, program, args);
    let Some(mut command) = command_from_argv(&argv) else {
        return Err(ToolError::NotInstalled(program.to_string()));
    };

    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| spawn_error(&argv[0], e))?;

    output_to_result(program, output).map(|_| ())
}

/// Copy `source` over `dest` with elevated rights and make it world-readable.
///
/// Used when a profile directory is not writable by the current user.
pub fn elevated_copy(tools: &ToolsConfig, source: &Path, dest: &Path) -> Result<(), ToolError> {
    info!(
        "Copying {} to {} with elevated privileges",
        source.display(),
        dest.display()
    );

    let dest_str = dest.display().to_string();
    run_privileged(tools, "cp", &[source.display().to_string(), dest_str.clone()])?;
    run_privileged(tools, "chmod", &["644".to_string(), dest_str])
}
