//! Per-row outcomes and run totals.
//!
//! Invariants:
//! - Every processed row ends in exactly one `OperationOutcome`.
//! - `attempts` counts remote calls actually made: 0 for dry runs, otherwise
//!   1..=retries+1.
//! - `RunTotals` is owned by the batch driver and reset every run.

use crate::client::is_transient_status;
use serde::{Deserialize, Serialize};

/// Classification of a failed remote operation.
///
/// Used for retry eligibility and reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The subscription is already cancelled/revoked
    AlreadyInTargetState,
    /// Unknown token or package
    NotFound,
    /// Credentials lack access to the package
    PermissionDenied,
    /// Rate limited or server-side unavailable
    TransientServer,
    /// Transport or decoding fault with no HTTP status
    LocalException,
    /// Anything else
    Other,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyInTargetState => "already_in_target_state",
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::TransientServer => "transient_server",
            Self::LocalException => "local_exception",
            Self::Other => "other",
        }
    }
}

/// Status string written to the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failure,
    DryRun,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::DryRun => "dry_run",
        }
    }
}

/// Terminal result of one row's remote operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Success {
        http_status: u16,
        attempts: u32,
        /// Response body, only for read operations
        payload: Option<serde_json::Value>,
    },
    Failure {
        /// `None` for local faults
        http_status: Option<u16>,
        message: String,
        kind: ErrorKind,
        attempts: u32,
    },
    /// Nothing was sent
    DryRun,
}

impl OperationOutcome {
    pub fn status(&self) -> OutcomeStatus {
        match self {
            Self::Success { .. } => OutcomeStatus::Success,
            Self::Failure { .. } => OutcomeStatus::Failure,
            Self::DryRun => OutcomeStatus::DryRun,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } | Self::Failure { attempts, .. } => *attempts,
            Self::DryRun => 0,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Success { http_status, .. } => Some(*http_status),
            Self::Failure { http_status, .. } => *http_status,
            Self::DryRun => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Failure { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Success { payload, .. } => payload.as_ref(),
            _ => None,
        }
    }

    /// A failure whose final HTTP status was still in the retryable set.
    pub fn is_transient_failure(&self) -> bool {
        match self {
            Self::Failure { http_status, .. } => http_status.is_some_and(is_transient_status),
            _ => false,
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    /// Rows sent to the dispatcher (including dry runs)
    pub processed: usize,
    pub success: usize,
    /// Rows excluded before dispatch (missing token, checkpointed, package)
    pub skipped: usize,
    pub failed_transient: usize,
    pub failed_permanent: usize,
    pub dry_run: usize,
    /// Subset of `failed_permanent` classified as already done remotely
    pub already_in_target_state: usize,
}

impl RunTotals {
    /// Count a processed row by its outcome.
    pub fn record(&mut self, outcome: &OperationOutcome) {
        self.processed += 1;
        match outcome {
            OperationOutcome::Success { .. } => self.success += 1,
            OperationOutcome::DryRun => self.dry_run += 1,
            OperationOutcome::Failure { kind, .. } => {
                if outcome.is_transient_failure() {
                    self.failed_transient += 1;
                } else {
                    self.failed_permanent += 1;
                }
                if *kind == ErrorKind::AlreadyInTargetState {
                    self.already_in_target_state += 1;
                }
            }
        }
    }

    /// Count a row excluded before dispatch.
    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    /// Rows read from the source in this run.
    pub fn considered(&self) -> usize {
        self.processed + self.skipped
    }

    pub fn failed(&self) -> usize {
        self.failed_transient + self.failed_permanent
    }

    /// Labelled counters in display order.
    pub fn entries(&self) -> [(&'static str, usize); 7] {
        [
            ("processed", self.processed),
            ("success", self.success),
            ("skipped", self.skipped),
            ("failed_transient", self.failed_transient),
            ("failed_permanent", self.failed_permanent),
            ("already_in_target_state", self.already_in_target_state),
            ("dry_run", self.dry_run),
        ]
    }
}
