//! Store Error Handling
//!
//! Unified error type for migrations, the run repository and the run service.

use stepsman_core::domain::run::RunRef;
use stepsman_core::domain::script::ScriptError;
use stepsman_core::domain::step::{StepStatus, TransitionError};
use thiserror::Error;

/// Underlying cause of a persistence failure
#[derive(Debug, Error)]
pub enum PersistenceCause {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Encoding(#[from] serde_json::Error),

    /// A stored row could not be mapped back to the domain model
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl PersistenceCause {
    pub fn is_unique_violation(&self) -> bool {
        match self {
            PersistenceCause::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }

    /// SQLite reported SQLITE_BUSY or one of its extended codes
    ///
    /// A write transaction that lost a race against another writer fails
    /// this way, typically with `SQLITE_BUSY_SNAPSHOT` in WAL mode.
    pub fn is_busy(&self) -> bool {
        match self {
            PersistenceCause::Database(sqlx::Error::Database(db)) => db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff == 5)
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Store error type
#[derive(Debug, Error)]
pub enum StoreError {
    /// Driver failure, constraint violation, encoding failure or corrupt row
    #[error("failed to {operation}: {source}")]
    Persistence {
        operation: String,
        #[source]
        source: PersistenceCause,
    },

    #[error("run {0} not found")]
    NotFound(RunRef),

    #[error("step {step_id} not found in run {run_id}")]
    StepNotFound { run_id: i64, step_id: i64 },

    /// Optimistic-concurrency check failed; re-read and retry or abort
    #[error("step {step_id} of run {run_id} is no longer {expected}")]
    Conflict {
        run_id: i64,
        step_id: i64,
        expected: StepStatus,
    },

    #[error("step {step_id} of run {run_id} cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: i64,
        step_id: i64,
        from: StepStatus,
        to: StepStatus,
    },

    #[error(transparent)]
    InvalidScript(#[from] ScriptError),

    /// The migration registry itself is malformed
    #[error("invalid migration registry: {0}")]
    MigrationRegistry(String),
}

impl StoreError {
    /// Attach the run identity to a state machine error
    pub fn from_transition(run_id: i64, err: TransitionError) -> Self {
        match err {
            TransitionError::InvalidTransition { step_id, from, to } => {
                StoreError::InvalidTransition {
                    run_id,
                    step_id,
                    from,
                    to,
                }
            }
            TransitionError::Conflict {
                step_id, expected, ..
            } => StoreError::Conflict {
                run_id,
                step_id,
                expected,
            },
            TransitionError::UnknownStep(step_id) => StoreError::StepNotFound { run_id, step_id },
        }
    }

    /// Conflicts are the only errors worth retrying after a re-read
    pub fn is_retriable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound(_) | StoreError::StepNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Names the operation a persistence failure happened in
pub trait PersistContext<T> {
    fn during(self, operation: impl Into<String>) -> Result<T>;
}

impl<T, E> PersistContext<T> for std::result::Result<T, E>
where
    E: Into<PersistenceCause>,
{
    fn during(self, operation: impl Into<String>) -> Result<T> {
        self.map_err(|err| StoreError::Persistence {
            operation: operation.into(),
            source: err.into(),
        })
    }
}
