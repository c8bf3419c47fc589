use tokio::time::Instant;

use crate::transport::ModelDescriptor;

/// Phase of the most recent load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPhase {
    #[default]
    Idle,
    Loading,
    Loaded,
    Failed,
}

/// What the manager knows about the server: the loaded model and the current
/// failure streak. Read-only outside the lifecycle module.
#[derive(Debug, Clone, Default)]
pub struct LifecycleState {
    current_model: Option<ModelDescriptor>,
    consecutive_failures: u32,
    last_restart: Option<Instant>,
    restart_attempted_in_streak: bool,
    phase: LoadPhase,
}

impl LifecycleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_model(&self) -> Option<&ModelDescriptor> {
        self.current_model.as_ref()
    }

    pub fn is_current(&self, model: &str) -> bool {
        self.current_model.as_ref().is_some_and(|m| m.name == model)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_restart(&self) -> Option<Instant> {
        self.last_restart
    }

    pub fn restart_attempted_in_streak(&self) -> bool {
        self.restart_attempted_in_streak
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    /// Returns the streak length including this failure.
    pub(crate) fn record_failure(&mut self) -> u32 {
        self.consecutive_failures += 1;
        self.consecutive_failures
    }

    pub(crate) fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.restart_attempted_in_streak = false;
    }

    pub(crate) fn mark_restart_attempted(&mut self) {
        self.restart_attempted_in_streak = true;
    }

    pub(crate) fn set_last_restart(&mut self, at: Instant) {
        self.last_restart = Some(at);
    }

    pub(crate) fn set_loaded(&mut self, descriptor: ModelDescriptor) {
        self.current_model = Some(descriptor);
        self.phase = LoadPhase::Loaded;
    }

    pub(crate) fn clear_current(&mut self) {
        self.current_model = None;
        self.phase = LoadPhase::Idle;
    }

    pub(crate) fn set_phase(&mut self, phase: LoadPhase) {
        self.phase = phase;
    }

    /// Back to idle. The restart time survives so the cooldown still holds.
    pub(crate) fn reset(&mut self) {
        *self = Self {
            last_restart: self.last_restart,
            ..Self::default()
        };
    }
}
