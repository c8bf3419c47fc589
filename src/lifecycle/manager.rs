use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::recovery::{decide, ErrorKind, RecoveryAction};
use super::state::{LifecycleState, LoadPhase};
use crate::config::{LifecycleConfig, ServerConfig};
use crate::service::ServiceController;
use crate::transport::{
    ChatRequest, Completion, GenerateRequest, ModelDescriptor, ModelInfo, RunningModel, Transport,
    TransportError,
};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("model '{0}' is not available on the server")]
    ModelNotFound(String),
    #[error("failed to load model '{model}': {reason}")]
    LoadFailed { model: String, reason: String },
    #[error("failed to unload model '{model}': {reason}")]
    UnloadFailed { model: String, reason: String },
    #[error("giving up after {attempts} attempt(s): {message}")]
    GiveUp {
        kind: ErrorKind,
        message: String,
        attempts: u32,
    },
}

impl LifecycleError {
    /// Failure kind of the underlying server error, when there was one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            LifecycleError::GiveUp { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    AlreadyLoaded,
    Loaded {
        load_duration: Duration,
        attempts: u32,
        /// Model that was unloaded to make room
        replaced: Option<String>,
    },
}

/// Tunables for the manager, taken from `[server]` and `[lifecycle]`.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub keep_alive: String,
    pub max_transient_failures: u32,
    pub retry_delay: Duration,
    pub model_list_ttl: Duration,
}

impl LifecycleOptions {
    pub fn from_config(server: &ServerConfig, lifecycle: &LifecycleConfig) -> Self {
        Self {
            keep_alive: server.keep_alive.clone(),
            max_transient_failures: lifecycle.max_transient_failures,
            retry_delay: Duration::from_millis(lifecycle.retry_delay_ms),
            model_list_ttl: Duration::from_secs(lifecycle.model_list_ttl_secs),
        }
    }
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            keep_alive: "30m".to_string(),
            max_transient_failures: 3,
            retry_delay: Duration::from_millis(1000),
            model_list_ttl: Duration::from_secs(30),
        }
    }
}

/// Keeps at most one model loaded and recovers from server failures.
///
/// Every operation that talks to the server goes through the same recovery
/// loop: classify the failure, pick a [`RecoveryAction`], run it, try again.
pub struct LifecycleManager {
    transport: Arc<dyn Transport>,
    service: ServiceController,
    state: LifecycleState,
    options: LifecycleOptions,
    model_cache: Option<(Instant, Vec<ModelDescriptor>)>,
    /// `/api/show` answers by model name, fetched once per model
    details: HashMap<String, ModelInfo>,
}

impl LifecycleManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        service: ServiceController,
        options: LifecycleOptions,
    ) -> Self {
        Self {
            transport,
            service,
            state: LifecycleState::new(),
            options,
            model_cache: None,
            details: HashMap::new(),
        }
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn service(&self) -> &ServiceController {
        &self.service
    }

    pub fn options(&self) -> &LifecycleOptions {
        &self.options
    }

    /// Decision for a failure that has already been counted in the streak.
    pub fn recover_from_failure(&self, kind: &ErrorKind) -> RecoveryAction {
        decide(
            kind,
            self.state.consecutive_failures(),
            self.state.restart_attempted_in_streak(),
            self.options.max_transient_failures,
        )
    }

    /// Server model list, served from cache while it is fresh.
    pub async fn list_models(&mut self, force_refresh: bool) -> Result<Vec<ModelDescriptor>, LifecycleError> {
        if !force_refresh {
            if let Some((fetched_at, models)) = &self.model_cache {
                if fetched_at.elapsed() < self.options.model_list_ttl {
                    return Ok(models.clone());
                }
            }
        }
        let (models, _) = self
            .with_recovery(None, |t| async move { t.list_models().await })
            .await?;
        debug!(count = models.len(), "Refreshed model list");
        self.model_cache = Some((Instant::now(), models.clone()));
        Ok(models)
    }

    /// Looks a model up by identifier. A bare name matches its `:latest` tag.
    async fn find_model(&mut self, model: &str) -> Result<ModelDescriptor, LifecycleError> {
        let was_cached = self.model_cache.is_some();
        let models = self.list_models(false).await?;
        if let Some(found) = match_model(&models, model) {
            return Ok(found);
        }
        if was_cached {
            let models = self.list_models(true).await?;
            if let Some(found) = match_model(&models, model) {
                return Ok(found);
            }
        }
        Err(LifecycleError::ModelNotFound(model.to_string()))
    }

    /// Model list with server-reported details merged in.
    pub async fn list_models_detailed(
        &mut self,
        force_refresh: bool,
    ) -> Result<Vec<ModelDescriptor>, LifecycleError> {
        let models = self.list_models(force_refresh).await?;
        let mut detailed = Vec::with_capacity(models.len());
        for model in models {
            detailed.push(self.with_details(model).await);
        }
        Ok(detailed)
    }

    /// Looks a model up and merges in what `/api/show` reports about it.
    pub async fn describe(&mut self, model: &str) -> Result<ModelDescriptor, LifecycleError> {
        let descriptor = self.find_model(model).await?;
        Ok(self.with_details(descriptor).await)
    }

    /// Fills in server-reported capabilities and, when the list left it out,
    /// the parameter count. A failed lookup returns the descriptor unchanged
    /// and is retried next time.
    pub async fn with_details(&mut self, mut descriptor: ModelDescriptor) -> ModelDescriptor {
        if !self.details.contains_key(&descriptor.name) {
            match self.transport.show_model(&descriptor.name).await {
                Ok(info) => {
                    debug!(model = %descriptor.name, capabilities = ?info.capabilities, "Fetched model details");
                    self.details.insert(descriptor.name.clone(), info);
                }
                Err(e) => {
                    debug!(model = %descriptor.name, error = %e, "Model details unavailable");
                    return descriptor;
                }
            }
        }
        if let Some(info) = self.details.get(&descriptor.name) {
            if descriptor.capabilities.is_empty() {
                descriptor.capabilities = info.capabilities.clone();
            }
            if descriptor.parameter_size.is_none() {
                descriptor.parameter_size = info.parameter_count().map(format_parameter_count);
            }
        }
        descriptor
    }

    pub async fn ensure_loaded(&mut self, model: &str) -> Result<LoadOutcome, LifecycleError> {
        let is_current = self
            .state
            .current_model()
            .is_some_and(|m| match_model(std::slice::from_ref(m), model).is_some());
        if is_current {
            if self.service.is_healthy().await {
                debug!(model, "Model already loaded");
                return Ok(LoadOutcome::AlreadyLoaded);
            }
            warn!(model, "Server did not answer the liveness probe, reloading");
        }

        let descriptor = self.describe(model).await?;

        let mut replaced = None;
        if let Some(current) = self.state.current_model().cloned() {
            if current.name != descriptor.name {
                info!(from = %current.name, to = %descriptor.name, "Switching models");
                self.unload(&current.name).await?;
                replaced = Some(current.name);
            }
        }

        self.state.set_phase(LoadPhase::Loading);
        let started = Instant::now();
        let keep_alive = self.options.keep_alive.clone();
        let name = descriptor.name.as_str();
        let ka = keep_alive.as_str();
        let result = self
            .with_recovery(Some(name), |t| async move { t.load(name, ka).await })
            .await;

        match result {
            Ok((_, attempts)) => {
                let load_duration = started.elapsed();
                info!(
                    model = %descriptor.name,
                    load_ms = load_duration.as_millis() as u64,
                    attempts,
                    "Model loaded"
                );
                self.state.set_loaded(descriptor);
                Ok(LoadOutcome::Loaded {
                    load_duration,
                    attempts,
                    replaced,
                })
            }
            Err(e) => {
                error!(model, error = %e, "Model load failed");
                self.state.clear_current();
                Err(match e {
                    LifecycleError::GiveUp {
                        kind: ErrorKind::HttpStatus(404),
                        ..
                    } => LifecycleError::ModelNotFound(model.to_string()),
                    LifecycleError::GiveUp { kind, message, .. } if kind.is_client_error() => {
                        LifecycleError::LoadFailed {
                            model: model.to_string(),
                            reason: message,
                        }
                    }
                    other => other,
                })
            }
        }
    }

    /// Evicts a model. Unloading a model that is not resident succeeds.
    pub async fn unload(&mut self, model: &str) -> Result<(), LifecycleError> {
        let result = self
            .with_recovery(Some(model), |t| async move { t.unload(model).await })
            .await;
        match result {
            Ok(_) => {
                if self.state.is_current(model) {
                    self.state.reset();
                }
                info!(model, "Model unloaded");
                Ok(())
            }
            Err(e) => Err(LifecycleError::UnloadFailed {
                model: model.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Unloads the current model with one request and no recovery. For
    /// shutdown paths that must not restart a struggling server.
    pub async fn release_current(&mut self) -> Result<(), LifecycleError> {
        let Some(model) = self.state.current_model().map(|m| m.name.clone()) else {
            return Ok(());
        };
        match self.transport.unload(&model).await {
            Ok(()) => {
                self.state.reset();
                info!(model = %model, "Model released");
                Ok(())
            }
            Err(e) => Err(LifecycleError::UnloadFailed {
                model,
                reason: e.to_string(),
            }),
        }
    }

    pub async fn generate(
        &mut self,
        model: &str,
        request: &GenerateRequest,
    ) -> Result<Completion, LifecycleError> {
        self.ensure_loaded(model).await?;
        let loaded = self.state.current_model().cloned();
        let (completion, _) = self
            .with_recovery(Some(model), |t| async move { t.generate(request).await })
            .await?;
        self.restore_current(loaded);
        Ok(completion)
    }

    pub async fn chat(
        &mut self,
        model: &str,
        request: &ChatRequest,
    ) -> Result<Completion, LifecycleError> {
        self.ensure_loaded(model).await?;
        let loaded = self.state.current_model().cloned();
        let (completion, _) = self
            .with_recovery(Some(model), |t| async move { t.chat(request).await })
            .await?;
        self.restore_current(loaded);
        Ok(completion)
    }

    pub async fn running_models(&mut self) -> Result<Vec<RunningModel>, LifecycleError> {
        let (models, _) = self
            .with_recovery(None, |t| async move { t.running_models().await })
            .await?;
        Ok(models)
    }

    /// The server reloads a model on demand, so a request that succeeded after
    /// an unload-or-restart recovery left it resident again.
    fn restore_current(&mut self, loaded: Option<ModelDescriptor>) {
        if self.state.current_model().is_none() {
            if let Some(descriptor) = loaded {
                self.state.set_loaded(descriptor);
            }
        }
    }

    /// Runs `call` until it succeeds or the recovery policy gives up.
    ///
    /// Returns the value and the number of attempts made.
    async fn with_recovery<T, F, Fut>(
        &mut self,
        attempted_model: Option<&str>,
        mut call: F,
    ) -> Result<(T, u32), LifecycleError>
    where
        F: FnMut(Arc<dyn Transport>) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let err = match call(Arc::clone(&self.transport)).await {
                Ok(value) => {
                    self.state.record_success();
                    return Ok((value, attempts));
                }
                Err(err) => err,
            };

            let kind = ErrorKind::from(&err);
            let failures = self.state.record_failure();
            let action = self.recover_from_failure(&kind);
            warn!(
                model = attempted_model.unwrap_or("-"),
                error = %err,
                failures,
                action = ?action,
                "Server call failed"
            );

            let loading = self.state.phase() == LoadPhase::Loading;
            if loading {
                self.state.set_phase(LoadPhase::Failed);
            }
            let recovered = self
                .apply_recovery(action, kind, &err, attempted_model, failures, attempts)
                .await;
            if loading {
                self.state.set_phase(LoadPhase::Idle);
            }
            recovered?;
            if loading {
                self.state.set_phase(LoadPhase::Loading);
            }
        }
    }

    /// Runs one recovery action. `Err` means the loop must stop.
    async fn apply_recovery(
        &mut self,
        action: RecoveryAction,
        kind: ErrorKind,
        err: &TransportError,
        attempted_model: Option<&str>,
        failures: u32,
        attempts: u32,
    ) -> Result<(), LifecycleError> {
        match action {
            RecoveryAction::Retry => {
                sleep(self.options.retry_delay * failures).await;
                Ok(())
            }
            RecoveryAction::UnloadThenRetry => {
                self.unload_for_recovery(attempted_model).await;
                Ok(())
            }
            RecoveryAction::RestartServiceThenRetry => {
                self.state.mark_restart_attempted();
                let issued_at = Instant::now();
                match self.service.restart(self.state.last_restart()).await {
                    Ok(()) => {
                        self.state.set_last_restart(issued_at);
                        self.state.clear_current();
                        self.model_cache = None;
                        Ok(())
                    }
                    Err(service_err) => {
                        if service_err.restart_issued() {
                            self.state.set_last_restart(issued_at);
                        }
                        error!(error = %service_err, "Service restart failed, giving up");
                        Err(LifecycleError::GiveUp {
                            kind,
                            message: format!(
                                "{}; service restart failed: {}. Try `{}` manually",
                                err,
                                service_err,
                                self.service.manual_restart_hint()
                            ),
                            attempts,
                        })
                    }
                }
            }
            RecoveryAction::GiveUp => Err(LifecycleError::GiveUp {
                kind,
                message: err.to_string(),
                attempts,
            }),
        }
    }

    /// Best-effort unload of the current and the attempted model.
    async fn unload_for_recovery(&mut self, attempted_model: Option<&str>) {
        let mut targets: Vec<String> = Vec::new();
        if let Some(current) = self.state.current_model() {
            targets.push(current.name.clone());
        }
        if let Some(model) = attempted_model {
            if !targets.iter().any(|t| t == model) {
                targets.push(model.to_string());
            }
        }
        for target in &targets {
            if let Err(e) = self.transport.unload(target).await {
                debug!(model = %target, error = %e, "Recovery unload failed, ignoring");
            }
        }
        self.state.clear_current();
    }
}

/// Exact parameter count in the list's notation, e.g. "8.0B" or "135M".
fn format_parameter_count(count: u64) -> String {
    if count >= 1_000_000_000 {
        format!("{:.1}B", count as f64 / 1e9)
    } else {
        format!("{}M", (count as f64 / 1e6).round() as u64)
    }
}

fn match_model(models: &[ModelDescriptor], wanted: &str) -> Option<ModelDescriptor> {
    let with_tag = if wanted.contains(':') {
        wanted.to_string()
    } else {
        format!("{}:latest", wanted)
    };
    models
        .iter()
        .find(|m| m.name == wanted || m.name == with_tag)
        .cloned()
}
