//! # Engine Errors
//!
//! One error type for the whole control plane. Most conditions degrade to a
//! result object with `success = false`; only retry exhaustion, scheduler
//! deadlocks, invalid plans and cancellation escape the public entry points.

use thiserror::Error;

/// Errors raised by the Conductor control plane
#[derive(Debug, Error)]
pub enum ConductorError {
    /// A guardrail or the risk assessor refused the instruction
    #[error("blocked by policy: {0}")]
    PolicyBlocked(String),

    /// The action guardrail refused the resolved handler's output target
    #[error("action by '{handler}' rejected: {reason}")]
    ActionRejected { handler: String, reason: String },

    /// No registered handler matched the instruction
    #[error("no handler matched: {0}")]
    HandlerNotFound(String),

    /// The critic scored the output below the passing threshold
    #[error("critic rejected output (score {score}/100): {feedback}")]
    CriticRejected { score: u8, feedback: String },

    /// A handler script exited unsuccessfully
    #[error("script failed with exit code {exit_code:?}: {stderr}")]
    ScriptExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The scheduler could not make progress
    #[error("deadlock detected: tasks {pending:?} can never become ready")]
    DeadlockDetected { pending: Vec<String> },

    /// The retry budget of a component was used up
    #[error("{component} failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        component: String,
        attempts: u32,
        last_error: String,
    },

    #[error("checkpoint failed: {0}")]
    CheckpointFailed(String),

    #[error("rollback failed: {0}")]
    RollbackFailed(String),

    /// The plan itself is malformed (e.g. duplicate task ids)
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConductorError {
    /// Whether the execution pipeline may retry after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CriticRejected { .. }
                | Self::ActionRejected { .. }
                | Self::ScriptExecutionFailed { .. }
                | Self::CheckpointFailed(_)
                | Self::Io(_)
                | Self::Other(_)
        )
    }
}

pub type Result<T, E = ConductorError> = std::result::Result<T, E>;
