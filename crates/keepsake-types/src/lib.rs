//! Core types and traits for the keepsake companion memory subsystem.
//!
//! This crate defines the shared data model used by the memory core, the
//! kernel service, and the CLI: remembered facts, per-session persona state,
//! the rendered context bundle, configuration, and the two store traits.
//! It contains no business logic beyond field-level merging of partial updates.

pub mod config;
pub mod context;
pub mod error;
pub mod ids;
pub mod memory;
pub mod state;
