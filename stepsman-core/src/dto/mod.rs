//! Data Transfer Objects
//!
//! This module contains the requests that front ends (CLI, executors) hand to
//! the store. They carry intent only; the store resolves them against the
//! persisted aggregate.

pub mod run;
pub mod step;
