use std::sync::Arc;

use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{HostServiceManager, ServiceError};
use crate::config::ServiceConfig;
use crate::transport::Transport;

/// Snapshot of the service for the `service status` command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub unit: String,
    pub active: bool,
    pub healthy: bool,
    pub server_version: Option<String>,
}

/// Restarts the host service and waits for the server to answer again.
pub struct ServiceController {
    manager: Arc<dyn HostServiceManager>,
    transport: Arc<dyn Transport>,
    config: ServiceConfig,
}

impl ServiceController {
    pub fn new(
        manager: Arc<dyn HostServiceManager>,
        transport: Arc<dyn Transport>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            manager,
            transport,
            config,
        }
    }

    pub fn unit(&self) -> &str {
        &self.config.unit
    }

    /// What the user should run by hand when automatic recovery gives up.
    pub fn manual_restart_hint(&self) -> String {
        self.manager.restart_command(&self.config.unit)
    }

    pub async fn is_healthy(&self) -> bool {
        match self.transport.probe().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Health probe failed");
                false
            }
        }
    }

    /// Restarts the service unless the previous restart is inside the cooldown.
    ///
    /// Returns once the unit is active and the server answers a probe.
    pub async fn restart(&self, last_restart: Option<Instant>) -> Result<(), ServiceError> {
        if let Some(previous) = last_restart {
            let elapsed = previous.elapsed();
            let cooldown = self.config.restart_cooldown();
            if elapsed < cooldown {
                let remaining = cooldown - elapsed;
                warn!(remaining_secs = remaining.as_secs(), "Restart refused, cooldown active");
                return Err(ServiceError::CooldownActive {
                    remaining_secs: remaining.as_secs().max(1),
                });
            }
        }

        self.manager.restart(&self.config.unit).await?;

        let started = Instant::now();
        let deadline = started + self.config.restart_timeout();
        loop {
            if self.manager.is_active(&self.config.unit).await && self.is_healthy().await {
                info!(
                    unit = %self.config.unit,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Service is back"
                );
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ServiceError::RestartTimeout {
                    unit: self.config.unit.clone(),
                    waited_secs: self.config.restart_timeout_secs,
                });
            }
            sleep(self.config.poll_interval()).await;
        }
    }

    pub async fn status(&self) -> ServiceStatus {
        let active = self.manager.is_active(&self.config.unit).await;
        let server_version = self.transport.version().await.ok();
        ServiceStatus {
            unit: self.config.unit.clone(),
            active,
            healthy: server_version.is_some(),
            server_version,
        }
    }
}
