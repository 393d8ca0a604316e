//! Core domain types
//!
//! This module contains the core domain structures used across Stepsman crates.
//! The run/step state machine lives here so that it can be exercised without a
//! store; the store only loads an aggregate, applies a transition and saves it.

pub mod run;
pub mod script;
pub mod step;
