//! Mode x dry-run dispatch of one row to the remote API.
//!
//! Invariants:
//! - One exhaustive match over `OperationMode` picks the remote verb.
//! - A dry-run dispatcher holds no API handle, so it cannot make a call.
//! - Validate always yields `SubscriptionDetails`, empty when the fetch
//!   failed or was skipped, so every validated row can be routed.

use crate::client::{RetryExecutor, SubscriptionApi};
use crate::models::{OperationMode, OperationOutcome, SubscriptionDetails};
use std::sync::Arc;
use tracing::debug;

/// Result of dispatching one row.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub outcome: OperationOutcome,
    /// Set in validate mode only
    pub details: Option<SubscriptionDetails>,
}

/// Invokes the configured verb under the retry executor.
pub struct Dispatcher {
    mode: OperationMode,
    api: Option<Arc<dyn SubscriptionApi>>,
    executor: RetryExecutor,
}

impl Dispatcher {
    /// A dispatcher that calls `api`.
    pub fn live(mode: OperationMode, api: Arc<dyn SubscriptionApi>, executor: RetryExecutor) -> Self {
        Self {
            mode,
            api: Some(api),
            executor,
        }
    }

    /// A dispatcher that never leaves the process.
    pub fn dry_run(mode: OperationMode, executor: RetryExecutor) -> Self {
        Self {
            mode,
            api: None,
            executor,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.api.is_none()
    }

    /// Run the mode's verb for one (package, token) pair.
    pub async fn dispatch(&self, package: &str, token: &str) -> Dispatched {
        let outcome = match self.api.as_deref() {
            None => OperationOutcome::DryRun,
            Some(api) => match self.mode {
                OperationMode::Cancel => {
                    self.executor.execute(|| api.cancel(package, token)).await
                }
                OperationMode::Validate => self.executor.execute(|| api.get(package, token)).await,
                OperationMode::RevokeProrated => {
                    self.executor.execute(|| api.revoke(package, token)).await
                }
            },
        };

        debug!(
            mode = %self.mode,
            status = outcome.status().as_str(),
            attempts = outcome.attempts(),
            "Dispatched row"
        );

        let details = (self.mode == OperationMode::Validate).then(|| {
            outcome
                .payload()
                .map(SubscriptionDetails::from_payload)
                .unwrap_or_default()
        });

        Dispatched { outcome, details }
    }
}
