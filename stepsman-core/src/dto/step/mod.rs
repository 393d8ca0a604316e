//! Step DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::step::StepStatus;

/// Request to move one step of a run to a new status
///
/// `expected` is the status the caller last observed. The store rejects the
/// transition with a conflict when the persisted status differs, so two
/// callers racing on the same step cannot both succeed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTransition {
    pub step_id: i64,
    pub expected: StepStatus,
    pub target: StepStatus,
    /// Heartbeat timestamp; the store uses the current time when absent
    pub heart_beat: Option<DateTime<Utc>>,
}

impl StepTransition {
    pub fn new(step_id: i64, expected: StepStatus, target: StepStatus) -> Self {
        Self {
            step_id,
            expected,
            target,
            heart_beat: None,
        }
    }

    /// `Pending` -> `InProgress`
    pub fn start(step_id: i64) -> Self {
        Self::new(step_id, StepStatus::Pending, StepStatus::InProgress)
    }

    /// `InProgress` -> `InProgress`, refreshing the heartbeat
    pub fn heartbeat(step_id: i64) -> Self {
        Self::new(step_id, StepStatus::InProgress, StepStatus::InProgress)
    }

    /// `InProgress` -> `Done`
    pub fn done(step_id: i64) -> Self {
        Self::new(step_id, StepStatus::InProgress, StepStatus::Done)
    }

    /// `InProgress` -> `Failed`
    pub fn fail(step_id: i64) -> Self {
        Self::new(step_id, StepStatus::InProgress, StepStatus::Failed)
    }

    /// `expected` -> `Skipped`
    pub fn skip(step_id: i64, expected: StepStatus) -> Self {
        Self::new(step_id, expected, StepStatus::Skipped)
    }

    pub fn at(mut self, heart_beat: DateTime<Utc>) -> Self {
        self.heart_beat = Some(heart_beat);
        self
    }
}
