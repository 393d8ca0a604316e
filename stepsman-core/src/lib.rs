//! Stepsman Core
//!
//! Core types and abstractions for Stepsman, a tool that tracks scripted
//! procedures step by step.
//!
//! This crate contains:
//! - Domain types: Run, Step and the status state machine that governs them
//! - Script definitions and the parser seam that turns a script into steps
//! - DTOs: requests passed from front ends down to the store
//!
//! Note: Persistence lives in `stepsman-store`, script evaluation in `stepsman-lua`.

pub mod domain;
pub mod dto;
