//! Core data models for bulksub.
//!
//! - `config`: layered configuration resolved into `RunConfig`
//! - `error`: setup and run errors (row failures are outcomes, not errors)
//! - `outcome`: per-row outcomes, error kinds, run totals
//! - `row`: input records
//! - `subscription`: state extracted from validate payloads

mod config;
mod error;
mod outcome;
mod row;
mod subscription;

pub use config::*;
pub use error::*;
pub use outcome::*;
pub use row::*;
pub use subscription::*;
