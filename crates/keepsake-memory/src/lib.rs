//! Memory for a companion persona.
//!
//! Two stores share one SQLite database:
//! - **Facts**: remembered statements about the user, extracted from their
//!   messages by pattern, with trigger clarity decaying by age
//! - **Session state**: what the persona is wearing, doing, and feeling, and
//!   where its body is, merged field by field from its own replies
//!
//! [`context::ContextAssembler`] turns both into the lines injected ahead of
//! each generation.

pub mod context;
pub mod decay;
pub mod extractor;
pub mod facts;
pub mod migration;
pub mod session_store;
pub mod spatial;
pub mod tracker;

mod substrate;
pub use substrate::MemorySubstrate;
