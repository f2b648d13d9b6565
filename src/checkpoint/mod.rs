//! Checkpoint module for resumable runs.
//!
//! Provides:
//! - `CheckpointStore`: success set loaded at start, append-only token files
//! - `load_tokens`: read a newline-delimited token file

mod store;

pub use store::*;
