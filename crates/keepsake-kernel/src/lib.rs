//! Process-level service around the keepsake memory core.
//!
//! [`CompanionMemory`] is what a chat orchestrator talks to on every turn.
//! It owns the soft-fail policy: store errors and slow stores degrade to
//! "no memory this turn" and never reach message delivery.

pub mod background;
pub mod config;
pub mod error;
pub mod kernel;

pub use kernel::CompanionMemory;
