use crate::model::{CycleIndex, Stage, StageKind};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on path '{path}': {source}")]
    PathIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    General(String),

    #[error("Configuration file not found at '{0}'.\nPass --config or run from a directory containing 'aldrive.toml'.")]
    ConfigNotFound(PathBuf),

    #[error("Unknown stage '{0}' in configuration.")]
    UnknownStage(String),

    #[error("Stage '{stage}' ({kind}) is missing required option '{option}'.")]
    MissingStageOption {
        stage: &'static str,
        kind: StageKind,
        option: &'static str,
    },

    #[error("Option '{option}' is not recognized for stage '{stage}' ({kind}).")]
    UnrecognizedStageOption {
        stage: &'static str,
        kind: StageKind,
        option: &'static str,
    },

    #[error("No action is registered for stage {0}.")]
    NoAction(Stage),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("I/O error on ledger '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot record stage {0} as complete: no cycle has been started in the ledger.")]
    NoActiveCycle(Stage),
}

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("No cycles were requested.")]
    NoCyclesRequested,

    #[error("Requested cycles must be ascending and gapless, but {next} follows {previous}.")]
    InvalidCycleOrder {
        previous: CycleIndex,
        next: CycleIndex,
    },
}
