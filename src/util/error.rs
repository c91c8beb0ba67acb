use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{0} is not installed or not in PATH")]
    NotInstalled(String),

    #[error("{tool} exited with {}: {stderr}", exit_description(.code))]
    Failed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error while running {tool}: {source}")]
    Io {
        tool: String,
        #[source]
        source: io::Error,
    },
}

fn exit_description(code: &Option<i32>) -> String {
    code.map_or_else(|| "termination by signal".to_string(), |c| format!("code {c}"))
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid profile JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid profile name '{0}'")]
    InvalidName(String),

    #[error("Invalid value for profile setting: {0}")]
    InvalidValue(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Elevated save failed: {0}")]
    Escalation(#[from] ToolError),

    #[error("NBFC is not installed ('{0}' not found)")]
    NotInstalled(String),

    #[error("NBFC setup failed: {0}")]
    Setup(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NbfcError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid NBFC config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed NBFC config: {0}")]
    InvalidConfig(String),

    #[error("Invalid fan curve: {0}")]
    InvalidCurve(String),

    #[error("Invalid fan profile name '{0}'")]
    InvalidName(String),

    #[error("NBFC config not found: {0}")]
    NotFound(String),

    #[error("Elevated save failed: {0}")]
    Escalation(#[from] ToolError),

    #[error("NBFC is not installed ('{0}' not found)")]
    NotInstalled(String),

    #[error("NBFC setup failed: {0}")]
    Setup(String),
}

// A unified error type for the entire application
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Nbfc(#[from] NbfcError),

    #[error("{0}")]
    Generic(String),
}
