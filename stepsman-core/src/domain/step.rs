//! Step domain types
//!
//! A step is one ordered unit of work inside a run. Valid status transitions:
//! - `Pending` -> `InProgress`
//! - `Pending` -> `Skipped`
//! - `InProgress` -> `InProgress` (heartbeat refresh)
//! - `InProgress` -> `Done` | `Skipped` | `Failed`
//!
//! `Done`, `Skipped` and `Failed` are terminal. Nothing leaves a terminal state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One unit of work within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position within the run, defines execution order
    pub step_id: i64,

    /// Stable identifier of this step
    pub uuid: Uuid,

    pub name: String,
    pub description: String,

    /// Current status of the step
    pub status: StepStatus,

    /// Last liveness signal, written while the step is in progress
    pub heart_beat: Option<DateTime<Utc>>,
}

impl Step {
    /// Create a pending step with a fresh UUID
    pub fn new(step_id: i64, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            step_id,
            uuid: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            status: StepStatus::Pending,
            heart_beat: None,
        }
    }

    /// Move the step to `target`, stamping the heartbeat when it enters or stays in progress
    pub fn transition(
        &mut self,
        target: StepStatus,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(target) {
            return Err(TransitionError::InvalidTransition {
                step_id: self.step_id,
                from: self.status,
                to: target,
            });
        }

        if target == StepStatus::InProgress {
            self.heart_beat = Some(at);
        }
        self.status = target;

        Ok(())
    }

    /// Whether an in-progress step has gone quiet for longer than `threshold`
    ///
    /// This is derived on read and never stored. Steps that are not in
    /// progress are never stale.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        if self.status != StepStatus::InProgress {
            return false;
        }

        match self.heart_beat {
            Some(beat) => now.signed_duration_since(beat) > threshold,
            None => true,
        }
    }
}

/// Step execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    /// Not started yet
    Pending,

    /// Being executed; the executor refreshes the heartbeat
    InProgress,

    /// Completed successfully
    Done,

    /// Bypassed by an operator
    Skipped,

    /// Execution reported an error
    Failed,
}

impl StepStatus {
    pub const ALL: [StepStatus; 5] = [
        StepStatus::Pending,
        StepStatus::InProgress,
        StepStatus::Done,
        StepStatus::Skipped,
        StepStatus::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Skipped | StepStatus::Failed)
    }

    /// Terminal and not failed
    pub fn is_satisfied(self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Skipped)
    }

    pub fn can_transition_to(self, target: StepStatus) -> bool {
        use StepStatus::*;

        match (self, target) {
            (Pending, InProgress) | (Pending, Skipped) => true,
            (InProgress, InProgress)
            | (InProgress, Done)
            | (InProgress, Skipped)
            | (InProgress, Failed) => true,
            _ => false,
        }
    }

    /// Integer code used in the store
    pub fn code(self) -> i64 {
        match self {
            StepStatus::Pending => 0,
            StepStatus::InProgress => 1,
            StepStatus::Done => 2,
            StepStatus::Skipped => 3,
            StepStatus::Failed => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.code() == code)
    }

    /// Human-readable label
    pub fn label(self) -> &'static str {
        match self {
            StepStatus::Pending => "Pending",
            StepStatus::InProgress => "In Progress",
            StepStatus::Done => "Done",
            StepStatus::Skipped => "Skipped",
            StepStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Errors raised by the run/step state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The requested status change is not allowed from the current status
    #[error("step {step_id} cannot move from {from} to {to}")]
    InvalidTransition {
        step_id: i64,
        from: StepStatus,
        to: StepStatus,
    },

    /// The step is not in the status the caller expected
    #[error("step {step_id} is {actual}, expected {expected}")]
    Conflict {
        step_id: i64,
        expected: StepStatus,
        actual: StepStatus,
    },

    /// No step with this id belongs to the run
    #[error("step {0} does not exist")]
    UnknownStep(i64),
}
