//! Repository Module
//!
//! Data access layer for the store.

pub mod run;

// Re-export for convenience
pub use run as run_repository;
