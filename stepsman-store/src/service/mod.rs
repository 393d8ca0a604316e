//! Service Module
//!
//! Business logic layer for the store.
//! Services orchestrate between repositories and the domain state machine.

pub mod run;

// Re-export for convenience
pub use run as run_service;
