//! Script domain types
//!
//! A script is the procedure a run is created from. Parsing the raw text is
//! delegated to a [`ScriptParser`], so the store never depends on a concrete
//! script language.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structure extracted from a script: a title and its ordered steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptDefinition {
    pub title: String,
    pub steps: Vec<StepDefinition>,
}

/// Name and description of one step, in script order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A script could not be turned into a step sequence
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid script: {0}")]
pub struct ScriptError(pub String);

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Turns raw script text into a [`ScriptDefinition`]
pub trait ScriptParser: Send + Sync {
    fn parse(&self, source: &str) -> Result<ScriptDefinition, ScriptError>;
}
