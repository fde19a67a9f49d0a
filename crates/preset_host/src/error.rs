//! Crate-level error and exit codes

use crate::runtime::{ProcessError, SupervisorError, WatchError};
use crate::template::TemplateError;

/// Any failure that ends the host
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Template expansion failed: {0}")]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("Failed to install shutdown handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

impl HostError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            HostError::Template(_) => 2,
            HostError::Supervisor(SupervisorError::NoPresetAvailable(_)) => 3,
            HostError::Supervisor(SupervisorError::Process(
                ProcessError::ExecutableNotFound { .. } | ProcessError::SpawnFailed { .. },
            )) => 4,
            HostError::Supervisor(SupervisorError::Watch(WatchError::Abandoned { .. })) => 5,
            HostError::Supervisor(_) | HostError::Signal(_) => 1,
        }
    }
}
