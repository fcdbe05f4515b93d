//! Error taxonomy for task requests and controller operations.

use crate::model::TaskPhase;
use std::time::Duration;
use thiserror::Error;

/// First unmet precondition of a task request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ValidationError {
    pub reason: String,
}

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Caller errors raised by [`crate::orchestrator::TaskController`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("a task is already running")]
    AlreadyRunning,

    #[error("no task is running (phase: {phase})")]
    NotRunning { phase: TaskPhase },

    #[error("cannot reset while {phase}")]
    NotTerminal { phase: TaskPhase },
}

/// Why a task ended in the `Failed` phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("driver error: {0}")]
    Driver(String),
}
