//! Error types for Warden

use std::time::Duration;

use thiserror::Error;

use crate::recovery::RecoveryStep;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Unreadable unit '{unit}': {reason}")]
    Unreadable { unit: String, reason: String },

    #[error("Recovery of unit '{unit}' failed during {step}: {reason}")]
    RecoveryFailed {
        unit: String,
        step: RecoveryStep,
        reason: String,
    },

    #[error("Unit '{unit}' is unmonitorable: {reason}")]
    Unmonitorable { unit: String, reason: String },

    #[error("Bootstrap failed: {0}")]
    BootstrapFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Invalid unit name: {0}")]
    InvalidUnitName(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl WardenError {
    /// Name of the unit this failure is attributed to, if any
    pub fn unit(&self) -> Option<&str> {
        match self {
            WardenError::Unreadable { unit, .. }
            | WardenError::RecoveryFailed { unit, .. }
            | WardenError::Unmonitorable { unit, .. } => Some(unit),
            _ => None,
        }
    }
}

/// Failures of the container runtime collaborator
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("could not spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WardenError>;
