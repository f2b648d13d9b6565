//! Validate-mode eligibility exports.
//!
//! Every validated row lands in exactly one of two CSVs: eligible for a
//! prorated revoke, or not (including rows whose fetch failed, with the
//! failure detail alongside).

use crate::models::{BulkError, OperationOutcome, Result, SubscriptionDetails};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

pub const ELIGIBLE_COLUMNS: [&str; 8] = [
    "token",
    "package",
    "product",
    "order_id",
    "subscription_state",
    "expiry_time",
    "auto_renew_enabled",
    "latest_order_id",
];

pub const INELIGIBLE_EXTRA_COLUMNS: [&str; 4] = ["status", "http_status", "error_type", "message"];

/// Identifiers of one exported row.
#[derive(Debug, Clone, Copy)]
pub struct ExportRow<'a> {
    pub token: &'a str,
    pub package: &'a str,
    pub product: Option<&'a str>,
    pub order_id: Option<&'a str>,
}

fn open_writer(path: &Path, header: &[&str]) -> Result<csv::Writer<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| BulkError::io(format!("creating output dir {}", parent.display()), e))?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(header)?;
    writer
        .flush()
        .map_err(|e| BulkError::io(format!("writing {}", path.display()), e))?;
    Ok(writer)
}

fn base_fields(row: &ExportRow<'_>, details: &SubscriptionDetails) -> Vec<String> {
    vec![
        row.token.to_string(),
        row.package.to_string(),
        row.product.unwrap_or_default().to_string(),
        row.order_id.unwrap_or_default().to_string(),
        details.subscription_state.clone().unwrap_or_default(),
        details.expiry_time.clone().unwrap_or_default(),
        details
            .auto_renew_enabled
            .map(|b| b.to_string())
            .unwrap_or_default(),
        details.latest_order_id.clone().unwrap_or_default(),
    ]
}

/// Writers for the two eligibility CSVs of a run.
pub struct EligibilityExports {
    eligible: csv::Writer<File>,
    ineligible: csv::Writer<File>,
    eligible_path: PathBuf,
    ineligible_path: PathBuf,
    eligible_count: usize,
    ineligible_count: usize,
}

impl EligibilityExports {
    /// Create both files and write their headers.
    pub fn create(eligible_path: &Path, ineligible_path: &Path) -> Result<Self> {
        let ineligible_header: Vec<&str> = ELIGIBLE_COLUMNS
            .iter()
            .chain(INELIGIBLE_EXTRA_COLUMNS.iter())
            .copied()
            .collect();

        Ok(Self {
            eligible: open_writer(eligible_path, &ELIGIBLE_COLUMNS)?,
            ineligible: open_writer(ineligible_path, &ineligible_header)?,
            eligible_path: eligible_path.to_owned(),
            ineligible_path: ineligible_path.to_owned(),
            eligible_count: 0,
            ineligible_count: 0,
        })
    }

    /// Route one validated row by `details.is_eligible()`.
    pub fn write(
        &mut self,
        row: &ExportRow<'_>,
        details: &SubscriptionDetails,
        outcome: &OperationOutcome,
    ) -> Result<()> {
        let mut fields = base_fields(row, details);

        if details.is_eligible() {
            self.eligible.write_record(&fields)?;
            self.eligible
                .flush()
                .map_err(|e| BulkError::io("writing eligible export", e))?;
            self.eligible_count += 1;
        } else {
            fields.extend([
                outcome.status().as_str().to_string(),
                outcome
                    .http_status()
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
                outcome
                    .error_kind()
                    .map(|k| k.as_str().to_string())
                    .unwrap_or_default(),
                outcome.message().unwrap_or_default().to_string(),
            ]);
            self.ineligible.write_record(&fields)?;
            self.ineligible
                .flush()
                .map_err(|e| BulkError::io("writing ineligible export", e))?;
            self.ineligible_count += 1;
        }
        Ok(())
    }

    pub fn eligible_path(&self) -> &Path {
        &self.eligible_path
    }

    pub fn ineligible_path(&self) -> &Path {
        &self.ineligible_path
    }

    /// Rows written as (eligible, ineligible).
    pub fn counts(&self) -> (usize, usize) {
        (self.eligible_count, self.ineligible_count)
    }
}
