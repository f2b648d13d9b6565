//! Post-hoc summary of an audit log.
//!
//! Reads the JSONL log produced by a run, counts records by status and
//! failures by error type and HTTP status, and optionally exports CSVs for
//! operator review. Malformed lines are skipped with a warning.

use crate::models::{BulkError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::warn;

/// Columns of the report CSVs.
pub const REPORT_COLUMNS: [&str; 9] = [
    "timestamp",
    "purchaseToken",
    "subscriptionId",
    "status",
    "attempts",
    "httpStatus",
    "errorType",
    "message",
    "rowIndex",
];

const UNKNOWN: &str = "unknown";

/// Counts from one audit log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSummary {
    pub total: usize,
    pub malformed: usize,
    pub by_status: HashMap<String, usize>,
    pub failures_by_error_type: HashMap<String, usize>,
    pub failures_by_http_status: HashMap<String, usize>,
}

/// Entries by descending count, ties by key.
fn ranked(counts: &HashMap<String, usize>) -> Vec<(&str, usize)> {
    let mut entries: Vec<(&str, usize)> = counts.iter().map(|(k, &v)| (k.as_str(), v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    entries
}

/// Render a JSON field as a CSV/counter cell.
fn cell(record: &Value, key: &str) -> String {
    match record.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn counter_key(record: &Value, key: &str) -> String {
    let value = cell(record, key);
    if value.is_empty() {
        UNKNOWN.to_string()
    } else {
        value
    }
}

impl LogSummary {
    fn record(&mut self, record: &Value) {
        self.total += 1;
        let status = counter_key(record, "status");
        if status == "failure" {
            *self
                .failures_by_error_type
                .entry(counter_key(record, "errorType"))
                .or_default() += 1;
            *self
                .failures_by_http_status
                .entry(counter_key(record, "httpStatus"))
                .or_default() += 1;
        }
        *self.by_status.entry(status).or_default() += 1;
    }

    pub fn status_ranking(&self) -> Vec<(&str, usize)> {
        ranked(&self.by_status)
    }

    pub fn error_type_ranking(&self) -> Vec<(&str, usize)> {
        ranked(&self.failures_by_error_type)
    }

    pub fn http_status_ranking(&self) -> Vec<(&str, usize)> {
        ranked(&self.failures_by_http_status)
    }
}

impl fmt::Display for LogSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "---- Log summary ----")?;
        writeln!(f, "Total records: {}", self.total)?;
        for (status, count) in self.status_ranking() {
            writeln!(f, "{status}: {count}")?;
        }
        if !self.failures_by_error_type.is_empty() {
            writeln!(f, "\nFailure breakdown by errorType:")?;
            for (kind, count) in self.error_type_ranking() {
                writeln!(f, "  {kind}: {count}")?;
            }
        }
        if !self.failures_by_http_status.is_empty() {
            writeln!(f, "\nFailure breakdown by httpStatus:")?;
            for (code, count) in self.http_status_ranking() {
                writeln!(f, "  {code}: {count}")?;
            }
        }
        Ok(())
    }
}

fn csv_writer(path: Option<&Path>) -> Result<Option<csv::Writer<File>>> {
    path.map(|p| -> Result<csv::Writer<File>> {
        let mut writer = csv::Writer::from_path(p)?;
        writer.write_record(REPORT_COLUMNS)?;
        Ok(writer)
    })
    .transpose()
}

fn csv_row(record: &Value) -> Vec<String> {
    REPORT_COLUMNS.iter().map(|key| cell(record, key)).collect()
}

/// Summarize the log at `log`, streaming records into the optional
/// failures-only and all-records CSVs.
pub fn summarize_log(
    log: &Path,
    failures_csv: Option<&Path>,
    all_csv: Option<&Path>,
) -> Result<LogSummary> {
    let file = File::open(log)
        .map_err(|e| BulkError::io(format!("opening audit log {}", log.display()), e))?;

    let mut failures = csv_writer(failures_csv)?;
    let mut all = csv_writer(all_csv)?;
    let mut summary = LogSummary::default();

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| BulkError::io("reading audit log", e))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record: Value = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "Skipping malformed JSON");
                summary.malformed += 1;
                continue;
            }
        };

        summary.record(&record);

        if let Some(writer) = all.as_mut() {
            writer.write_record(csv_row(&record))?;
        }
        if let Some(writer) = failures.as_mut() {
            if record.get("status").and_then(Value::as_str) == Some("failure") {
                writer.write_record(csv_row(&record))?;
            }
        }
    }

    for writer in [failures.as_mut(), all.as_mut()].into_iter().flatten() {
        writer
            .flush()
            .map_err(|e| BulkError::io("writing report CSV", e))?;
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const LOG: &str = r#"{"timestamp":"t1","purchaseToken":"a","status":"success","attempts":1,"httpStatus":204,"errorType":null,"rowIndex":1}
{"timestamp":"t2","purchaseToken":"b","status":"failure","attempts":1,"httpStatus":404,"errorType":"not_found","message":"Not found","rowIndex":2}

not json at all
{"timestamp":"t3","purchaseToken":"c","status":"failure","attempts":2,"httpStatus":503,"errorType":"transient_server","rowIndex":3}
{"timestamp":"t4","purchaseToken":"d","status":"failure","attempts":1,"httpStatus":null,"errorType":"local_exception","rowIndex":4}
"#;

    fn write_log(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("cancel_log.jsonl");
        fs::write(&path, LOG).unwrap();
        path
    }

    #[test]
    fn test_counts_and_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let summary = summarize_log(&write_log(&dir), None, None).unwrap();

        assert_eq!(summary.total, 4);
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.status_ranking(), vec![("failure", 3), ("success", 1)]);
        assert_eq!(summary.failures_by_error_type["not_found"], 1);
        assert_eq!(summary.failures_by_http_status["503"], 1);
        assert_eq!(summary.failures_by_http_status[UNKNOWN], 1);
        assert!(!summary.failures_by_http_status.contains_key("204"));
    }

    #[test]
    fn test_csv_exports() {
        let dir = TempDir::new().unwrap();
        let failures = dir.path().join("failures.csv");
        let all = dir.path().join("all.csv");
        summarize_log(&write_log(&dir), Some(&failures), Some(&all)).unwrap();

        let failures_text = fs::read_to_string(&failures).unwrap();
        let lines: Vec<&str> = failures_text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], REPORT_COLUMNS.join(","));
        assert_eq!(lines[1], "t2,b,,failure,1,404,not_found,Not found,2");

        assert_eq!(fs::read_to_string(&all).unwrap().lines().count(), 5);
    }

    #[test]
    fn test_summary_display() {
        let dir = TempDir::new().unwrap();
        let summary = summarize_log(&write_log(&dir), None, None).unwrap();
        let text = summary.to_string();
        assert!(text.contains("Total records: 4"));
        assert!(text.contains("failure: 3"));
        assert!(text.contains("  transient_server: 1"));
    }

    #[test]
    fn test_missing_log_is_io_error() {
        let err = summarize_log(Path::new("/nonexistent/log.jsonl"), None, None).unwrap_err();
        assert!(matches!(err, BulkError::Io { .. }));
    }
}
