//! Host service supervision for the inference server.
//!
//! [`HostServiceManager`] is the seam to the init system; [`SystemctlManager`]
//! drives systemd, tests inject fakes. [`ServiceController`] adds the cooldown,
//! health polling and status reporting on top.

mod controller;
mod systemctl;

use async_trait::async_trait;
use thiserror::Error;

pub use controller::{ServiceController, ServiceStatus};
pub use systemctl::{classify_failure, SystemctlManager};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("service '{unit}' did not become healthy within {waited_secs}s")]
    RestartTimeout { unit: String, waited_secs: u64 },
    #[error("last restart was too recent, {remaining_secs}s of cooldown left")]
    CooldownActive { remaining_secs: u64 },
    #[error("not permitted to restart the service: {0}")]
    PermissionDenied(String),
    #[error("`{command}` failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("could not run `{command}`: {reason}")]
    Spawn { command: String, reason: String },
}

impl ServiceError {
    /// Whether the restart command reached the init system before the failure.
    /// Such a restart still starts the cooldown.
    pub fn restart_issued(&self) -> bool {
        matches!(
            self,
            ServiceError::RestartTimeout { .. } | ServiceError::CommandFailed { .. }
        )
    }
}

/// Restarts and inspects a named host service.
#[async_trait]
pub trait HostServiceManager: Send + Sync {
    async fn restart(&self, unit: &str) -> Result<(), ServiceError>;

    /// Whether the init system reports the unit as running. Never errors.
    async fn is_active(&self, unit: &str) -> bool;

    /// The restart command as a user would type it, for manual instructions.
    fn restart_command(&self, unit: &str) -> String;
}
