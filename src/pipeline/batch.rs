//! Batch driver: row source -> skip checks -> dispatch -> audit -> checkpoint.
//!
//! Invariants:
//! - Rows are handled strictly one at a time. A row's remote call, audit
//!   record and checkpoint append complete before the next row starts.
//! - Every row read is either skipped (counted, reason logged) or
//!   processed (counted, audited): `processed + skipped = considered`.
//! - Row failures are outcomes. Only audit, export or checkpoint I/O errors
//!   end a run early.

use crate::audit::{
    AuditLogger, AuditRecord, EligibilityExports, ExportRow, build_log_path, export_path,
    run_stamp,
};
use crate::checkpoint::CheckpointStore;
use crate::client::{RetryExecutor, RetryPolicy, SubscriptionApi};
use crate::models::{
    BulkError, OperationMode, OperationOutcome, Result, Row, RunConfig, RunTotals,
};
use crate::pipeline::{Dispatched, Dispatcher};
use crate::source::{ResolvedColumns, RowIdentifiers, RowSource, Selection};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const ELIGIBLE_EXPORT_NAME: &str = "eligible_for_revoke";
const INELIGIBLE_EXPORT_NAME: &str = "ineligible_for_revoke";

/// Why a row was excluded before dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Unreadable(String),
    MissingToken,
    AlreadyCheckpointed,
    MissingPackage,
    PackageMismatch(String),
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unreadable(_) => "unreadable record",
            Self::MissingToken => "missing token",
            Self::AlreadyCheckpointed => "already checkpointed",
            Self::MissingPackage => "missing package",
            Self::PackageMismatch(_) => "package mismatch",
        }
    }
}

/// Where a finished run left its outputs.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: OperationMode,
    pub stamp: String,
    pub totals: RunTotals,
    pub log_path: PathBuf,
    /// Validate mode: eligibility CSVs and their row counts
    pub exports: Option<ExportSummary>,
    pub elapsed: Duration,
}

/// Validate-mode export files and how many rows each received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub eligible_path: PathBuf,
    pub ineligible_path: PathBuf,
    pub eligible: usize,
    pub ineligible: usize,
}

impl From<&EligibilityExports> for ExportSummary {
    fn from(exports: &EligibilityExports) -> Self {
        let (eligible, ineligible) = exports.counts();
        Self {
            eligible_path: exports.eligible_path().to_owned(),
            ineligible_path: exports.ineligible_path().to_owned(),
            eligible,
            ineligible,
        }
    }
}

/// A validated plan for one run. Preparing touches no remote system and
/// writes nothing, so configuration errors surface before credentials are
/// loaded.
pub struct BatchDriver {
    config: RunConfig,
    source: RowSource,
    columns: ResolvedColumns,
}

impl BatchDriver {
    /// Open the input and resolve its columns for the configured mode.
    pub fn prepare(config: RunConfig) -> Result<Self> {
        let source = RowSource::open(&config.input)?;
        let columns = ResolvedColumns::resolve(
            source.headers(),
            &config.columns,
            config.mode,
            config.package_name.is_some(),
        )?;

        info!(
            input = %config.input.display(),
            mode = %config.mode,
            token_column = %columns.token,
            package_column = columns.package.as_deref().unwrap_or("-"),
            "Prepared batch"
        );

        Ok(Self {
            config,
            source,
            columns,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn columns(&self) -> &ResolvedColumns {
        &self.columns
    }

    /// Execute the run. `api` may be `None` only for dry runs.
    pub async fn run(self, api: Option<Arc<dyn SubscriptionApi>>) -> Result<RunReport> {
        let start = Instant::now();
        let config = &self.config;
        let stamp = run_stamp(Utc::now());
        let executor = RetryExecutor::new(RetryPolicy::from(config.retry));

        let dispatcher = match (config.dry_run, api) {
            (true, _) => Dispatcher::dry_run(config.mode, executor),
            (false, Some(api)) => Dispatcher::live(config.mode, api, executor),
            (false, None) => {
                return Err(BulkError::Internal(
                    "live run started without an API client".to_string(),
                ));
            }
        };

        let checkpoints = if config.dry_run {
            CheckpointStore::read_only(config.checkpoint_success.as_deref())?
        } else {
            CheckpointStore::open(
                config.checkpoint_success.as_deref(),
                config.checkpoint_failed.as_deref(),
            )?
        };

        let log_path = build_log_path(
            config.mode,
            config.log.as_deref(),
            config.timestamp_logs,
            &stamp,
        );
        let logger = AuditLogger::create(&log_path)?;

        let exports = match config.mode {
            OperationMode::Validate => Some(EligibilityExports::create(
                &export_path(config.eligible_output.as_deref(), ELIGIBLE_EXPORT_NAME, &stamp),
                &export_path(
                    config.ineligible_output.as_deref(),
                    INELIGIBLE_EXPORT_NAME,
                    &stamp,
                ),
            )?),
            OperationMode::Cancel | OperationMode::RevokeProrated => None,
        };

        let selection = Selection::new(config.sample_size, config.max_rows);
        let progress = if config.progress {
            progress_bar(self.source.selected_len(selection)?)?
        } else {
            ProgressBar::hidden()
        };
        let rows = self.source.select(selection, &mut rand::rng())?;

        info!(
            log = %log_path.display(),
            dry_run = config.dry_run,
            checkpointed = checkpoints.done().len(),
            "Starting run"
        );

        let mut processor = RowProcessor {
            config,
            columns: &self.columns,
            dispatcher,
            checkpoints,
            logger,
            exports,
            totals: RunTotals::default(),
        };

        for row in rows {
            processor.process(&row?).await?;
            progress.inc(1);
        }
        progress.finish_and_clear();

        let totals = processor.totals;
        info!(
            processed = totals.processed,
            success = totals.success,
            skipped = totals.skipped,
            failed = totals.failed(),
            audit_records = processor.logger.written(),
            "Run complete"
        );

        Ok(RunReport {
            mode: config.mode,
            stamp,
            totals,
            log_path: processor.logger.path().to_owned(),
            exports: processor.exports.as_ref().map(ExportSummary::from),
            elapsed: start.elapsed(),
        })
    }
}

fn progress_bar(total: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
        .map_err(|e| BulkError::Internal(format!("progress template: {e}")))?
        .progress_chars("##-");
    pb.set_style(style);
    Ok(pb)
}

/// Per-run mutable state.
struct RowProcessor<'a> {
    config: &'a RunConfig,
    columns: &'a ResolvedColumns,
    dispatcher: Dispatcher,
    checkpoints: CheckpointStore,
    logger: AuditLogger,
    exports: Option<EligibilityExports>,
    totals: RunTotals,
}

impl RowProcessor<'_> {
    /// Resolve the (token, package) pair to send, or the reason not to.
    ///
    /// Checks run in order: decoding, token, checkpoint, package, package match.
    fn target(
        &self,
        row: &Row,
        ids: &RowIdentifiers,
    ) -> std::result::Result<(String, String), SkipReason> {
        if let Some(error) = row.decode_error() {
            return Err(SkipReason::Unreadable(error.to_string()));
        }
        let token = ids.token.clone().ok_or(SkipReason::MissingToken)?;
        if self.checkpoints.contains(&token) {
            return Err(SkipReason::AlreadyCheckpointed);
        }

        let package = ids
            .package
            .clone()
            .or_else(|| self.config.package_name.clone())
            .ok_or(SkipReason::MissingPackage)?;

        if let Some(expected) = self.config.package_name.as_deref() {
            if package != expected {
                return Err(SkipReason::PackageMismatch(package));
            }
        }

        Ok((token, package))
    }

    async fn process(&mut self, row: &Row) -> Result<()> {
        let ids = self.columns.identifiers(row);

        let (token, package) = match self.target(row, &ids) {
            Ok(target) => target,
            Err(reason) => {
                self.totals.record_skip();
                match &reason {
                    SkipReason::AlreadyCheckpointed => {
                        debug!(row = row.index, reason = reason.as_str(), "Skipping row");
                    }
                    SkipReason::Unreadable(error) => {
                        warn!(row = row.index, error = %error, "Skipping unreadable row");
                    }
                    SkipReason::PackageMismatch(package) => {
                        warn!(row = row.index, package = %package, "Skipping row: package mismatch");
                    }
                    SkipReason::MissingToken | SkipReason::MissingPackage => {
                        warn!(row = row.index, reason = reason.as_str(), "Skipping row");
                    }
                }
                return Ok(());
            }
        };

        let Dispatched { outcome, details } = self.dispatcher.dispatch(&package, &token).await;
        self.totals.record(&outcome);

        let mut record = AuditRecord::new(
            self.config.mode,
            row.index,
            &token,
            &package,
            &ids,
            &outcome,
        );
        if let Some(details) = details.as_ref() {
            record = record.with_validation(details);
            if self.config.log_response {
                record = record.with_response(outcome.payload().cloned());
            }
        }
        self.logger.write(&record)?;

        if let (Some(exports), Some(details)) = (self.exports.as_mut(), details.as_ref()) {
            let export_row = ExportRow {
                token: &token,
                package: &package,
                product: ids.product.as_deref(),
                order_id: ids.order_id.as_deref(),
            };
            exports.write(&export_row, details, &outcome)?;
        }

        match &outcome {
            OperationOutcome::Success { .. } => self.checkpoints.record_success(&token)?,
            OperationOutcome::Failure { kind, message, .. } => {
                warn!(
                    row = row.index,
                    http_status = ?outcome.http_status(),
                    kind = kind.as_str(),
                    message = %message,
                    "Row failed"
                );
                self.checkpoints.record_failure(&token)?;
            }
            OperationOutcome::DryRun => {}
        }

        if !self.dispatcher.is_dry_run() && !self.config.delay.is_zero() {
            tokio::time::sleep(self.config.delay).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::{ScriptedApi, http_error, ok_with};
    use crate::models::{ConfigLayer, ErrorKind};
    use serde_json::{Value, json};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_input(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("tokens.csv");
        fs::write(&path, content).unwrap();
        path
    }

    fn config(dir: &TempDir, input: PathBuf, mode: OperationMode) -> RunConfig {
        let layer = ConfigLayer {
            input: Some(input),
            mode: Some(mode),
            service_account: Some(dir.path().join("key.json")),
            package_name: Some("com.example.app".to_string()),
            log: Some(dir.path().join("audit.jsonl")),
            delay: Some(0.0),
            retries: Some(1),
            backoff: Some(0.0),
            jitter: Some(0.0),
            progress: Some(false),
            checkpoint_success: Some(dir.path().join("done.txt")),
            checkpoint_failed: Some(dir.path().join("failed.txt")),
            eligible_output: Some(dir.path().join("eligible.csv")),
            ineligible_output: Some(dir.path().join("ineligible.csv")),
            ..Default::default()
        };
        RunConfig::resolve(None, layer).unwrap()
    }

    fn audit_lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    async fn run(config: RunConfig, api: Arc<ScriptedApi>) -> RunReport {
        BatchDriver::prepare(config)
            .unwrap()
            .run(Some(api))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_three_row_scenario() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "purchaseToken\nt1\nt2\nt3\n");
        let api = Arc::new(
            ScriptedApi::new()
                .script("t2", vec![http_error(503, "Backend unavailable")])
                .script("t3", vec![http_error(404, "Purchase token not found")]),
        );

        let report = run(config(&dir, input, OperationMode::Cancel), api.clone()).await;
        let totals = &report.totals;
        assert_eq!(totals.processed, 3);
        assert_eq!(totals.success, 2);
        assert_eq!(totals.failed_permanent, 1);
        assert_eq!(totals.failed_transient, 0);
        assert_eq!(totals.skipped, 0);
        assert_eq!(api.call_count(), 4);

        let records = audit_lines(&report.log_path);
        assert_eq!(records.len(), 3);
        assert_eq!(records[1]["purchaseToken"], "t2");
        assert_eq!(records[1]["attempts"], 2);
        assert_eq!(records[1]["status"], "success");
        assert_eq!(records[2]["errorType"], "not_found");
        assert_eq!(records[2]["rowIndex"], 3);

        assert_eq!(lines(&dir.path().join("done.txt")), vec!["t1", "t2"]);
        assert_eq!(lines(&dir.path().join("failed.txt")), vec!["t3"]);
    }

    #[tokio::test]
    async fn test_second_run_skips_checkpointed_tokens() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "purchaseToken\nt1\nt2\n");

        let first = Arc::new(ScriptedApi::new().script("t2", vec![http_error(404, "not found")]));
        run(config(&dir, input.clone(), OperationMode::Cancel), first.clone()).await;
        assert_eq!(first.call_count(), 2);

        let second = Arc::new(ScriptedApi::new());
        let report = run(config(&dir, input, OperationMode::Cancel), second.clone()).await;

        // t1 succeeded before; t2 failed and is retried.
        assert_eq!(second.call_count(), 1);
        assert_eq!(second.calls()[0].token, "t2");
        assert_eq!(report.totals.skipped, 1);
        assert_eq!(report.totals.processed, 1);
        assert_eq!(report.totals.considered(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_tokens_within_a_run_are_skipped() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "purchaseToken\nt1\nt1\n");
        let api = Arc::new(ScriptedApi::new());

        let report = run(config(&dir, input, OperationMode::Cancel), api.clone()).await;
        assert_eq!(api.call_count(), 1);
        assert_eq!(report.totals.skipped, 1);
    }

    #[tokio::test]
    async fn test_dry_run_calls_nothing_and_writes_no_checkpoint() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "purchaseToken\nt1\nt2\n");
        let mut cfg = config(&dir, input, OperationMode::RevokeProrated);
        cfg.dry_run = true;
        // revoke-prorated needs the column even for dry runs
        fs::write(&cfg.input, "purchaseToken,subscription_state\nt1,ACTIVE\nt2,ACTIVE\n").unwrap();

        let report = BatchDriver::prepare(cfg).unwrap().run(None).await.unwrap();

        assert_eq!(report.totals.dry_run, 2);
        assert_eq!(report.totals.processed, 2);
        assert_eq!(report.totals.success, 0);
        let records = audit_lines(&report.log_path);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r["status"] == "dry_run" && r["attempts"] == 0));
        assert!(!dir.path().join("done.txt").exists());
        assert!(!dir.path().join("failed.txt").exists());
    }

    #[tokio::test]
    async fn test_live_run_requires_api() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "purchaseToken\nt1\n");
        let err = BatchDriver::prepare(config(&dir, input, OperationMode::Cancel))
            .unwrap()
            .run(None)
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::Internal(_)));
    }

    #[tokio::test]
    async fn test_validate_routes_by_state() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "purchaseToken,product,order_id\nactive,monthly,GPA.1\nexpired,monthly,GPA.2\n");
        let api = Arc::new(
            ScriptedApi::new()
                .script(
                    "active",
                    vec![ok_with(json!({
                        "subscriptionState": "SUBSCRIPTION_STATE_ACTIVE",
                        "lineItems": [{"expiryTime": "2026-01-01T00:00:00Z"}]
                    }))],
                )
                .script(
                    "expired",
                    vec![ok_with(json!({"subscriptionState": "SUBSCRIPTION_STATE_EXPIRED"}))],
                ),
        );
        let mut cfg = config(&dir, input, OperationMode::Validate);
        cfg.log_response = true;

        let report = run(cfg, api).await;
        let exports = report.exports.clone().unwrap();
        assert_eq!((exports.eligible, exports.ineligible), (1, 1));
        let (eligible, ineligible) = (exports.eligible_path, exports.ineligible_path);
        assert!(
            eligible
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("eligible_")
        );

        let eligible_rows = lines(&eligible);
        assert_eq!(eligible_rows.len(), 2);
        assert!(eligible_rows[1].starts_with("active,com.example.app,monthly,GPA.1,SUBSCRIPTION_STATE_ACTIVE"));

        let ineligible_rows = lines(&ineligible);
        assert_eq!(ineligible_rows.len(), 2);
        assert!(ineligible_rows[1].starts_with("expired,"));
        assert!(ineligible_rows[1].contains("SUBSCRIPTION_STATE_EXPIRED"));
        assert!(ineligible_rows[1].contains(",success,200,"));

        let records = audit_lines(&report.log_path);
        assert_eq!(records[0]["eligibleForRevoke"], true);
        assert_eq!(records[1]["eligibleForRevoke"], false);
        assert_eq!(records[0]["response"]["subscriptionState"], "SUBSCRIPTION_STATE_ACTIVE");
        assert_eq!(report.totals.success, 2);
    }

    #[tokio::test]
    async fn test_skip_reasons_are_counted() {
        let dir = TempDir::new().unwrap();
        let input = write_input(
            &dir,
            "purchaseToken,package\nt1,com.example.app\n,com.example.app\nt3,com.other.app\nt4,\n",
        );
        let api = Arc::new(ScriptedApi::new());

        let report = run(config(&dir, input, OperationMode::Cancel), api.clone()).await;

        // Blank token and mismatched package are skipped; a blank package
        // cell falls back to the configured package.
        assert_eq!(report.totals.skipped, 2);
        assert_eq!(report.totals.processed, 2);
        assert_eq!(report.totals.considered(), 4);
        let tokens: Vec<String> = api.calls().into_iter().map(|c| c.token).collect();
        assert_eq!(tokens, vec!["t1", "t4"]);
    }

    #[tokio::test]
    async fn test_row_package_used_without_run_package() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "purchaseToken,package\nt1,com.a\nt2,\n");
        let mut cfg = config(&dir, input, OperationMode::Cancel);
        cfg.package_name = None;
        let api = Arc::new(ScriptedApi::new());

        let report = BatchDriver::prepare(cfg)
            .unwrap()
            .run(Some(api.clone()))
            .await
            .unwrap();

        assert_eq!(report.totals.processed, 1);
        assert_eq!(report.totals.skipped, 1);
        assert_eq!(api.calls()[0].package, "com.a");
    }

    #[tokio::test]
    async fn test_max_rows_bounds_considered_rows() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "purchaseToken\nt1\nt2\nt3\n");
        let mut cfg = config(&dir, input, OperationMode::Cancel);
        cfg.max_rows = Some(2);
        let api = Arc::new(ScriptedApi::new());

        let report = BatchDriver::prepare(cfg)
            .unwrap()
            .run(Some(api.clone()))
            .await
            .unwrap();

        assert_eq!(report.totals.considered(), 2);
        assert_eq!(api.call_count(), 2);
    }

    #[tokio::test]
    async fn test_already_cancelled_counts_as_permanent() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "purchaseToken\nt1\n");
        let api = Arc::new(
            ScriptedApi::new().script("t1", vec![http_error(400, "The subscription is already cancelled.")]),
        );

        let report = run(config(&dir, input, OperationMode::Cancel), api).await;
        assert_eq!(report.totals.failed_permanent, 1);
        assert_eq!(report.totals.already_in_target_state, 1);

        let records = audit_lines(&report.log_path);
        assert_eq!(
            records[0]["errorType"],
            serde_json::to_value(ErrorKind::AlreadyInTargetState).unwrap()
        );
    }

    #[tokio::test]
    async fn test_unreadable_row_is_skipped_and_the_run_continues() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("tokens.csv");
        fs::write(&input, b"purchaseToken\nt1\n\xff\xfe\nt3\n").unwrap();
        let api = Arc::new(ScriptedApi::new());

        let report = run(config(&dir, input, OperationMode::Cancel), api.clone()).await;

        let tokens: Vec<String> = api.calls().into_iter().map(|c| c.token).collect();
        assert_eq!(tokens, vec!["t1", "t3"]);
        assert_eq!(report.totals.processed, 2);
        assert_eq!(report.totals.skipped, 1);
        assert_eq!(report.totals.considered(), 3);

        let records = audit_lines(&report.log_path);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["rowIndex"], 3);
    }

    #[test]
    fn test_missing_token_column_fails_preparation() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "id\n1\n");
        let err = BatchDriver::prepare(config(&dir, input, OperationMode::Cancel))
            .err()
            .unwrap();
        assert!(err.is_config());
    }
}
