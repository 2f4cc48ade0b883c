//! # chronicle-core
//!
//! Core types, traits, and abstractions for the chronicle enrichment
//! pipeline.
//!
//! This crate provides the data structures and trait seams that the store,
//! knowledge-base client and job crates depend on.

pub mod defaults;
pub mod error;
pub mod events;
pub mod geography;
pub mod models;
pub mod progress;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventBus, EventEnvelope, RunEvent};
pub use geography::*;
pub use models::*;
pub use progress::*;
pub use traits::*;
