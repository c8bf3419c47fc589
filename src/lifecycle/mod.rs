//! # Model Lifecycle
//!
//! Owns the "which model is loaded" state and the failure streak, and wraps
//! every server call in the recovery policy:
//!
//! - transient failures (refused, timeout, 502-504) are retried with a growing delay
//! - server faults (other 5xx, garbage responses) unload the models involved first
//! - once the streak reaches the threshold the host service is restarted, once
//! - client errors and anything after that restart give up

mod manager;
mod recovery;
mod state;

pub use manager::{LifecycleError, LifecycleManager, LifecycleOptions, LoadOutcome};
pub use recovery::{decide, ErrorKind, RecoveryAction};
pub use state::{LifecycleState, LoadPhase};
