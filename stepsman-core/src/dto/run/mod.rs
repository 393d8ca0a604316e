//! Run DTOs

use serde::{Deserialize, Serialize};

use crate::domain::run::RunStatus;

/// Filter for listing runs
///
/// Both fields are optional; an empty filter lists every run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunFilter {
    pub name: Option<String>,
    pub status: Option<RunStatus>,
}

impl RunFilter {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }
}
