//! Error types for bulksub.
//!
//! Taxonomy:
//! - Setup failures: bad configuration, missing columns, credentials. Fatal
//!   before the first remote call.
//! - Run failures: audit log or checkpoint I/O. Fatal, the audit trail is the
//!   system of record.
//! - Row failures never appear here. They are values (`OperationOutcome`),
//!   not errors, so one bad row cannot abort the batch.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for bulksub.
#[derive(Debug, Error)]
pub enum BulkError {
    // ═══════════════════════════════════════════════════════════════════
    // SETUP: raised before any row is touched
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Auth(#[from] crate::client::AuthError),

    // ═══════════════════════════════════════════════════════════════════
    // RUN: durable outputs could not be written or read
    // ═══════════════════════════════════════════════════════════════════
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ═══════════════════════════════════════════════════════════════════
    // INVARIANT: should not happen
    // ═══════════════════════════════════════════════════════════════════
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors.
///
/// All of these abort the run before the credential exchange or any
/// remote call.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Missing required inputs: {}", .0.join(", "))]
    MissingRequired(Vec<String>),

    #[error("CSV is missing a token column. Tried: {}", .tried.join(", "))]
    MissingTokenColumn { tried: Vec<String> },

    #[error("CSV missing required columns: {}. Found: {}", .missing.join(", "), .found.join(", "))]
    MissingColumns {
        missing: Vec<String>,
        found: Vec<String>,
    },

    #[error("No package name provided and no package column found in CSV")]
    NoPackageSource,

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl BulkError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether this error comes from setup rather than from the run itself.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Process exit code: 2 for configuration errors, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        if self.is_config() { 2 } else { 1 }
    }
}

/// Result type alias for bulksub.
pub type Result<T> = std::result::Result<T, BulkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_message_lists_both_sides() {
        let err = ConfigError::MissingColumns {
            missing: vec!["subscription_state".to_string()],
            found: vec!["purchaseToken".to_string(), "package".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "CSV missing required columns: subscription_state. Found: purchaseToken, package"
        );
    }

    #[test]
    fn test_config_errors_are_flagged() {
        let err: BulkError = ConfigError::NoPackageSource.into();
        assert!(err.is_config());
        assert_eq!(err.exit_code(), 2);
        let internal = BulkError::Internal("x".to_string());
        assert!(!internal.is_config());
        assert_eq!(internal.exit_code(), 1);
    }
}
