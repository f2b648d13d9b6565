//! bulksub - bulk cancel/validate/revoke of Google Play subscriptions.
//!
//! ## Architecture
//!
//! One sequential batch engine drives every row of a CSV through:
//! - **Row Source**: streams or reservoir-samples rows, resolves columns
//! - **Checkpoint Store**: skips tokens that already succeeded
//! - **Dispatcher**: picks the remote verb for the run's mode
//! - **Retry Executor**: bounded exponential backoff with jitter
//! - **Audit Logger**: one JSONL record per processed row
//!
//! ## Failure model
//!
//! - Setup errors (config, columns, credentials) abort before any remote call
//! - Row failures are classified outcomes and never abort the batch
//! - Audit and checkpoint I/O errors are fatal

pub mod audit;
pub mod checkpoint;
pub mod client;
pub mod models;
pub mod pipeline;
pub mod source;

// Re-exports for convenience
pub use audit::{AuditLogger, AuditRecord, LogSummary, summarize_log};
pub use checkpoint::CheckpointStore;
pub use client::{PlayClient, RetryExecutor, RetryPolicy, ServiceAccountAuth, SubscriptionApi};
pub use models::{
    BulkError, ConfigError, ConfigLayer, ErrorKind, OperationMode, OperationOutcome, Result,
    RunConfig, RunTotals,
};
pub use pipeline::{BatchDriver, Dispatcher, RunReport};
pub use source::{RowSource, Selection};
