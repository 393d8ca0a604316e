//! Run domain types
//!
//! A run is one instantiation of a script. It owns its steps, a cursor naming
//! the step currently in focus, and an aggregate status derived from the steps.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::script::{ScriptDefinition, ScriptError};
use super::step::{Step, StepStatus, TransitionError};

/// Run aggregate: metadata plus the ordered steps it owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Store-assigned identity, 0 until the run is inserted
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub status: RunStatus,
    /// `step_id` of the focused step
    pub cursor: i64,
    /// Raw script the run was created from
    pub script: String,
    /// Audit flag
    pub checked: bool,
    /// Bumped on every persisted transition
    pub revision: i64,
    pub steps: Vec<Step>,
}

impl Run {
    /// Build an unsaved run from a parsed script
    ///
    /// Every step gets a fresh UUID and starts `Pending`; the cursor starts on
    /// step 1. A script without steps is rejected.
    pub fn draft(definition: ScriptDefinition, script: String) -> Result<Self, ScriptError> {
        if definition.title.trim().is_empty() {
            return Err(ScriptError::new("script title cannot be empty"));
        }
        if definition.steps.is_empty() {
            return Err(ScriptError::new("script must define at least one step"));
        }

        let steps = definition
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, def)| Step::new(i as i64 + 1, def.name, def.description))
            .collect();

        Ok(Self {
            id: 0,
            uuid: Uuid::new_v4(),
            name: definition.title,
            status: RunStatus::Pending,
            cursor: 1,
            script,
            checked: false,
            revision: 0,
            steps,
        })
    }

    pub fn step(&self, step_id: i64) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// The step under the cursor
    pub fn current_step(&self) -> Option<&Step> {
        self.step(self.cursor)
    }

    /// All steps have reached a terminal status
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_terminal())
    }

    /// Apply one status change to a step, then move the cursor and refresh the run status
    ///
    /// `expected` must match the step's current status, otherwise the step
    /// was changed by someone else and a conflict is reported. On error the
    /// run is left untouched.
    pub fn apply_transition(
        &mut self,
        step_id: i64,
        expected: StepStatus,
        target: StepStatus,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let step = self
            .steps
            .iter_mut()
            .find(|s| s.step_id == step_id)
            .ok_or(TransitionError::UnknownStep(step_id))?;

        if step.status != expected {
            return Err(TransitionError::Conflict {
                step_id,
                expected,
                actual: step.status,
            });
        }

        step.transition(target, at)?;

        self.advance_cursor();
        self.refresh_status();

        Ok(())
    }

    /// Move the cursor past a finished step
    ///
    /// When the focused step is terminal the cursor moves to the first later
    /// step that is not, or to the last step if every later step is done.
    /// The cursor never moves backward.
    pub fn advance_cursor(&mut self) {
        let focused_terminal = self
            .current_step()
            .map(|s| s.status.is_terminal())
            .unwrap_or(false);
        if !focused_terminal {
            return;
        }

        let next = self
            .steps
            .iter()
            .filter(|s| s.step_id > self.cursor)
            .find(|s| !s.status.is_terminal())
            .or_else(|| self.steps.last())
            .map(|s| s.step_id);

        if let Some(next) = next {
            self.cursor = self.cursor.max(next);
        }
    }

    pub fn refresh_status(&mut self) {
        self.status = RunStatus::from_steps(&self.steps);
    }

    /// In-progress steps whose heartbeat is older than `threshold`
    pub fn stale_steps(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<&Step> {
        self.steps
            .iter()
            .filter(|s| s.is_stale(now, threshold))
            .collect()
    }
}

/// Run-level status, always derived from the steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl RunStatus {
    pub const ALL: [RunStatus; 4] = [
        RunStatus::Pending,
        RunStatus::InProgress,
        RunStatus::Done,
        RunStatus::Failed,
    ];

    /// Aggregate status of a step sequence
    ///
    /// - `Failed` if any step failed
    /// - `Done` if every step is terminal
    /// - `InProgress` if any step is in progress or already finished
    /// - `Pending` otherwise
    pub fn from_steps(steps: &[Step]) -> Self {
        if steps.iter().any(|s| s.status == StepStatus::Failed) {
            RunStatus::Failed
        } else if steps.iter().all(|s| s.status.is_terminal()) {
            RunStatus::Done
        } else if steps
            .iter()
            .any(|s| s.status == StepStatus::InProgress || s.status.is_terminal())
        {
            RunStatus::InProgress
        } else {
            RunStatus::Pending
        }
    }

    /// Integer code used in the store
    pub fn code(self) -> i64 {
        match self {
            RunStatus::Pending => 0,
            RunStatus::InProgress => 1,
            RunStatus::Done => 2,
            RunStatus::Failed => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.code() == code)
    }

    /// Human-readable label
    pub fn label(self) -> &'static str {
        match self {
            RunStatus::Pending => "Pending",
            RunStatus::InProgress => "In Progress",
            RunStatus::Done => "Done",
            RunStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "pending" => Ok(RunStatus::Pending),
            "inprogress" => Ok(RunStatus::InProgress),
            "done" => Ok(RunStatus::Done),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(format!("unknown run status '{}'", s)),
        }
    }
}

/// Reference to a run by store id or by UUID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunRef {
    Id(i64),
    Uuid(Uuid),
}

impl std::fmt::Display for RunRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunRef::Id(id) => write!(f, "{}", id),
            RunRef::Uuid(uuid) => write!(f, "{}", uuid),
        }
    }
}
