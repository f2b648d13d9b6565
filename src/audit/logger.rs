//! JSONL audit log.
//!
//! Invariants:
//! - One record per processed row, written once and never rewritten.
//! - Each record is flushed before the row's checkpoint write, so a crash
//!   never leaves a checkpointed token without its audit line.

use crate::models::{
    BulkError, ErrorKind, OperationMode, OperationOutcome, OutcomeStatus, Result,
    SubscriptionDetails,
};
use crate::source::RowIdentifiers;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Validate-mode fields of an audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationFields {
    pub subscription_state: Option<String>,
    pub expiry_time: Option<String>,
    pub auto_renew_enabled: Option<bool>,
    pub latest_order_id: Option<String>,
    pub eligible_for_revoke: bool,
}

impl ValidationFields {
    pub fn new(details: &SubscriptionDetails) -> Self {
        Self {
            subscription_state: details.subscription_state.clone(),
            expiry_time: details.expiry_time.clone(),
            auto_renew_enabled: details.auto_renew_enabled,
            latest_order_id: details.latest_order_id.clone(),
            eligible_for_revoke: details.is_eligible(),
        }
    }
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub purchase_token: String,
    pub subscription_id: Option<String>,
    pub package: String,
    pub product: Option<String>,
    #[serde(rename = "order_id")]
    pub order_id: Option<String>,
    pub mode: OperationMode,
    pub status: OutcomeStatus,
    pub attempts: u32,
    pub http_status: Option<u16>,
    pub error_type: Option<ErrorKind>,
    pub message: Option<String>,
    pub row_index: usize,
    #[serde(flatten)]
    pub validation: Option<ValidationFields>,
    /// Raw get payload, when response logging is on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl AuditRecord {
    /// Build the record for a dispatched row. The token and package are the
    /// values actually sent.
    pub fn new(
        mode: OperationMode,
        row_index: usize,
        token: &str,
        package: &str,
        ids: &RowIdentifiers,
        outcome: &OperationOutcome,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            purchase_token: token.to_string(),
            subscription_id: ids.subscription_id.clone(),
            package: package.to_string(),
            product: ids.product.clone(),
            order_id: ids.order_id.clone(),
            mode,
            status: outcome.status(),
            attempts: outcome.attempts(),
            http_status: outcome.http_status(),
            error_type: outcome.error_kind(),
            message: outcome.message().map(str::to_string),
            row_index,
            validation: None,
            response: None,
        }
    }

    pub fn with_validation(mut self, details: &SubscriptionDetails) -> Self {
        self.validation = Some(ValidationFields::new(details));
        self
    }

    pub fn with_response(mut self, response: Option<Value>) -> Self {
        self.response = response;
        self
    }
}

/// Append-only JSONL writer.
pub struct AuditLogger {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl AuditLogger {
    /// Create (or truncate) the log at `path`, creating parent directories.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| BulkError::io(format!("creating log dir {}", parent.display()), e))?;
        }
        let file = File::create(path)
            .map_err(|e| BulkError::io(format!("creating audit log {}", path.display()), e))?;
        Ok(Self {
            path: path.to_owned(),
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    /// Write one record and flush it.
    pub fn write(&mut self, record: &AuditRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        writeln!(self.writer, "{json}")
            .and_then(|()| self.writer.flush())
            .map_err(|e| BulkError::io("writing audit record", e))?;
        self.written += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written so far.
    pub fn written(&self) -> usize {
        self.written
    }
}
