//! Stepsman Store
//!
//! Durable storage for runs and their steps, backed by SQLite.
//!
//! - `db`: pool creation and store opening
//! - `migrations`: versioned, transactional schema upgrades
//! - `repository`: single-statement data access
//! - `service`: run creation and atomic step transitions

pub mod db;
pub mod error;
pub mod migrations;
pub mod repository;
pub mod service;

pub use error::{Result, StoreError};
