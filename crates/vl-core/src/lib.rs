//! vl-core: shared types, errors, configuration, and library identities.
//!
//! This crate is the foundational dependency for all other vl-* crates,
//! providing the unified error type, the configuration snapshot, and the
//! deterministic identity scheme that maps virtual library names to the ids
//! clients see.

pub mod config;
pub mod error;
pub mod identity;

// Re-export the most commonly used items at the crate root.
pub use config::{Config, HidePolicy, Library, ResourceRef, ResourceType};
pub use error::{Error, Result, UpstreamErrorKind};
pub use identity::{hash_name, IdentityRegistry};
