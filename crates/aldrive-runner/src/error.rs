use aldrive_client::ClientError;
use aldrive_core::errors::{ConfigError, DomainError, LedgerError};
use aldrive_core::model::{CycleIndex, Stage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Submission(#[from] ClientError),

    #[error("{failed} of {total} job(s) did not succeed: {detail}")]
    JobFailure {
        failed: usize,
        total: usize,
        detail: String,
    },

    #[error("command `{command}` exited with {}: {stderr}", .code.map_or("a signal".to_string(), |c| format!("status {}", c)))]
    Action {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{outstanding} unit(s) still outstanding after {rounds} resubmission round(s)")]
    Incomplete { rounds: u32, outstanding: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StageError {
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Config(_) => "configuration",
            StageError::Submission(_) => "submission",
            StageError::JobFailure { .. } | StageError::Incomplete { .. } => "job failure",
            StageError::Action { .. } => "action",
            StageError::Io(_) => "io",
        }
    }
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Failed to prepare {path}: {source}")]
    Workspace {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ALC-{cycle} stage {stage} failed ({kind}): {source}", kind = .source.kind())]
    StageFailed {
        cycle: CycleIndex,
        stage: Stage,
        #[source]
        source: StageError,
    },
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to launch notifier '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Notifier '{command}' exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("The driver thread terminated unexpectedly")]
    DriverPanicked,
}
