use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{HostServiceManager, ServiceError};
use crate::config::ServiceConfig;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Markers in stderr that mean we lack the rights, not that the unit is broken.
const PERMISSION_MARKERS: &[&str] = &[
    "a password is required",
    "permission denied",
    "access denied",
    "interactive authentication required",
    "not in the sudoers file",
    "authentication is required",
];

/// Controls a systemd unit through `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemctlManager {
    use_sudo: bool,
    user_unit: bool,
}

impl SystemctlManager {
    pub fn new(use_sudo: bool, user_unit: bool) -> Self {
        Self { use_sudo, user_unit }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.use_sudo, config.user_unit)
    }

    /// Program and arguments for `systemctl <verb> <unit>`.
    ///
    /// User units never go through sudo. Restarts of system units use `sudo -n`
    /// so a missing password fails fast instead of prompting.
    pub fn command_line(&self, verb: &str, unit: &str, privileged: bool) -> (String, Vec<String>) {
        let mut args = Vec::new();
        let program = if privileged && self.use_sudo && !self.user_unit {
            args.push("-n".to_string());
            args.push("systemctl".to_string());
            "sudo"
        } else {
            "systemctl"
        };
        if self.user_unit {
            args.push("--user".to_string());
        }
        args.push(verb.to_string());
        if verb == "is-active" {
            args.push("--quiet".to_string());
        }
        args.push(unit.to_string());
        (program.to_string(), args)
    }
}

fn render(program: &str, args: &[String]) -> String {
    std::iter::once(program.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Maps a failed command to the matching error variant.
pub fn classify_failure(command: &str, code: Option<i32>, stderr: &str) -> ServiceError {
    let lowered = stderr.to_lowercase();
    if PERMISSION_MARKERS.iter().any(|m| lowered.contains(m)) {
        ServiceError::PermissionDenied(stderr.trim().to_string())
    } else {
        ServiceError::CommandFailed {
            command: command.to_string(),
            code,
            stderr: stderr.trim().to_string(),
        }
    }
}

#[async_trait]
impl HostServiceManager for SystemctlManager {
    async fn restart(&self, unit: &str) -> Result<(), ServiceError> {
        let (program, args) = self.command_line("restart", unit, true);
        let rendered = render(&program, &args);
        info!(command = %rendered, "Restarting service");

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = match timeout(COMMAND_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(ServiceError::PermissionDenied(e.to_string()))
            }
            Ok(Err(e)) => {
                return Err(ServiceError::Spawn {
                    command: rendered,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ServiceError::CommandFailed {
                    command: rendered,
                    code: None,
                    stderr: format!("timed out after {}s", COMMAND_TIMEOUT.as_secs()),
                })
            }
        };

        if output.status.success() {
            debug!(command = %rendered, "Restart command succeeded");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let error = classify_failure(&rendered, output.status.code(), &stderr);
            warn!(command = %rendered, error = %error, "Restart command failed");
            Err(error)
        }
    }

    async fn is_active(&self, unit: &str) -> bool {
        let (program, args) = self.command_line("is-active", unit, false);
        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        match timeout(COMMAND_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!(unit, error = %e, "Could not query unit state");
                false
            }
            Err(_) => false,
        }
    }

    fn restart_command(&self, unit: &str) -> String {
        let (program, args) = self.command_line("restart", unit, true);
        // Humans don't need the non-interactive flag
        render(&program, &args).replacen("sudo -n", "sudo", 1)
    }
}
