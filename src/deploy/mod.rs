pub mod drift;
pub mod graph;
pub mod orchestrator;
pub mod retry;
pub mod walker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::errors::ReasonCode;
use crate::state::models::PreciseResourceStatus;

// ─── Configuration ──────────────────────────────────────────────────────────

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Bound on concurrently executing resource operations.
    pub max_concurrency: usize,
    /// Cap on stabilisation polls per resource.
    pub max_stabilisation_polls: u32,
    /// Base delay for the exponential backoff between stabilisation polls.
    pub stabilisation_base_delay_ms: u64,
    /// Fail fast instead of continuing independent branches after a
    /// terminal failure.
    pub stop_on_first_error: bool,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            max_stabilisation_polls: 30,
            stabilisation_base_delay_ms: 100,
            stop_on_first_error: false,
        }
    }
}

// ─── Cancellation ───────────────────────────────────────────────────────────

/// Cooperative cancellation: workers check the flag before issuing the next
/// provider call; in-flight calls are never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

// ─── Events ─────────────────────────────────────────────────────────────────

/// Progress events streamed while a deployment runs.
#[derive(Debug, Clone)]
pub enum DeployEvent {
    ResourceStarted {
        resource_name: String,
    },
    ResourceCompleted {
        resource_name: String,
        resource_id: Option<String>,
        status: PreciseResourceStatus,
        attempts: u32,
    },
    ResourceFailed {
        resource_name: String,
        message: String,
    },
    ResourceSkipped {
        resource_name: String,
        reason: String,
    },
}

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum DeployError {
    #[error("deployment was cancelled before \"{resource}\" started")]
    Cancelled { resource: String },

    #[error("resource \"{resource}\" failed to deploy: {message}")]
    TerminalDeploy { resource: String, message: String },

    #[error("resource \"{resource}\" failed to destroy: {message}")]
    TerminalDestroy { resource: String, message: String },

    #[error("resource \"{resource}\" did not stabilise after {polls} polls")]
    StabilisationTimeout { resource: String, polls: u32 },

    #[error("dependency \"{dependency}\" of \"{resource}\" did not complete: {reason}")]
    DependencySkipped {
        resource: String,
        dependency: String,
        reason: String,
    },

    #[error("{failed} of {total} resources failed")]
    Aggregate {
        failed: usize,
        total: usize,
        errors: Vec<DeployError>,
    },
}

impl DeployError {
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            DeployError::Cancelled { .. } => ReasonCode::Cancelled,
            DeployError::TerminalDeploy { .. } => ReasonCode::TerminalDeploy,
            DeployError::TerminalDestroy { .. } => ReasonCode::TerminalDestroy,
            DeployError::StabilisationTimeout { .. } => ReasonCode::StabilisationTimeout,
            DeployError::DependencySkipped { .. } => ReasonCode::Cancelled,
            DeployError::Aggregate { errors, .. } => errors
                .first()
                .map(DeployError::reason_code)
                .unwrap_or(ReasonCode::TerminalDeploy),
        }
    }
}
