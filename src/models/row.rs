//! Input rows.

use csv::StringRecord;
use std::sync::Arc;

/// One CSV record, addressable by column name.
///
/// Headers are shared between all rows of a source.
#[derive(Debug, Clone)]
pub struct Row {
    /// 1-based position among the data rows of the input file
    pub index: usize,
    headers: Arc<StringRecord>,
    record: StringRecord,
    decode_error: Option<String>,
}

impl Row {
    pub fn new(index: usize, headers: Arc<StringRecord>, record: StringRecord) -> Self {
        Self {
            index,
            headers,
            record,
            decode_error: None,
        }
    }

    /// A record that could not be decoded. It has no values.
    pub fn unreadable(index: usize, headers: Arc<StringRecord>, error: String) -> Self {
        Self {
            index,
            headers,
            record: StringRecord::new(),
            decode_error: Some(error),
        }
    }

    pub fn decode_error(&self) -> Option<&str> {
        self.decode_error.as_deref()
    }

    /// Raw value of a column, if the column exists and the record reaches it.
    pub fn get(&self, column: &str) -> Option<&str> {
        let position = self.headers.iter().position(|h| h == column)?;
        self.record.get(position)
    }

    /// Trimmed value of a column. Missing and empty values are both `None`.
    pub fn get_trimmed(&self, column: &str) -> Option<&str> {
        self.get(column).map(str::trim).filter(|v| !v.is_empty())
    }
}
