//! CSV row source.
//!
//! Every iteration reopens the file, so a source can be restarted from the
//! beginning (once to count, once to process) but never resumed mid-stream.
//! A record that is not valid UTF-8 still yields a row, marked unreadable,
//! so one bad line never hides the rows after it.

use crate::models::{BulkError, Result, Row};
use crate::source::Reservoir;
use csv::{ByteRecordsIntoIter, StringRecord};
use rand::Rng;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// How rows are chosen from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// File order, optionally truncated to the first `max_rows`
    Sequential { max_rows: Option<usize> },
    /// Uniform sample of `size` rows, optionally truncated to `max_rows`
    Sample {
        size: usize,
        max_rows: Option<usize>,
    },
}

impl Selection {
    pub fn new(sample_size: Option<usize>, max_rows: Option<usize>) -> Self {
        match sample_size {
            Some(size) => Self::Sample { size, max_rows },
            None => Self::Sequential { max_rows },
        }
    }
}

/// Rows selected for one run.
pub type SelectedRows = Box<dyn Iterator<Item = Result<Row>> + Send>;

/// A CSV file with a header row.
#[derive(Debug, Clone)]
pub struct RowSource {
    path: PathBuf,
    headers: Arc<StringRecord>,
}

impl RowSource {
    /// Open `path` and read its header row.
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = Self::reader_for(path)?;
        let headers = reader.headers()?.clone();
        debug!(path = %path.display(), columns = headers.len(), "Opened input");
        Ok(Self {
            path: path.to_owned(),
            headers: Arc::new(headers),
        })
    }

    fn reader_for(path: &Path) -> Result<csv::Reader<File>> {
        let file = File::open(path)
            .map_err(|e| BulkError::io(format!("Failed to open input {}", path.display()), e))?;
        Ok(csv::ReaderBuilder::new().flexible(true).from_reader(file))
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    /// Number of data rows, header excluded.
    pub fn count_rows(&self) -> Result<usize> {
        let mut count = 0;
        for row in self.rows()? {
            row?;
            count += 1;
        }
        Ok(count)
    }

    /// All rows in file order.
    pub fn rows(&self) -> Result<Rows> {
        Ok(Rows {
            records: Self::reader_for(&self.path)?.into_byte_records(),
            headers: Arc::clone(&self.headers),
            next_index: 1,
        })
    }

    /// Rows under `selection`.
    ///
    /// Sequential selection streams. Sampling reads the whole file once
    /// and holds at most `size` rows.
    pub fn select<R: Rng + ?Sized>(&self, selection: Selection, rng: &mut R) -> Result<SelectedRows> {
        match selection {
            Selection::Sequential { max_rows } => {
                let rows = self.rows()?;
                Ok(match max_rows {
                    Some(limit) => Box::new(rows.take(limit)),
                    None => Box::new(rows),
                })
            }
            Selection::Sample { size, max_rows } => {
                let mut reservoir = Reservoir::new(size);
                for row in self.rows()? {
                    reservoir.offer(row?, rng);
                }
                debug!(seen = reservoir.seen(), size, "Sampled input");

                let mut sample = reservoir.into_vec();
                if let Some(limit) = max_rows {
                    sample.truncate(limit);
                }
                Ok(Box::new(sample.into_iter().map(Ok::<Row, BulkError>)))
            }
        }
    }

    /// Number of rows `selection` yields, for progress reporting.
    pub fn selected_len(&self, selection: Selection) -> Result<usize> {
        let total = self.count_rows()?;
        Ok(match selection {
            Selection::Sequential { max_rows } => max_rows.map_or(total, |m| total.min(m)),
            Selection::Sample { size, max_rows } => {
                let sampled = total.min(size);
                max_rows.map_or(sampled, |m| sampled.min(m))
            }
        })
    }
}

/// Streaming iterator over a source's rows.
pub struct Rows {
    records: ByteRecordsIntoIter<File>,
    headers: Arc<StringRecord>,
    next_index: usize,
}

impl Iterator for Rows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e.into())),
        };
        let index = self.next_index;
        self.next_index += 1;
        let headers = Arc::clone(&self.headers);

        let row = match StringRecord::from_byte_record(record) {
            Ok(record) => Row::new(index, headers, record),
            Err(e) => {
                warn!(row = index, error = %e, "Unreadable record");
                Row::unreadable(index, headers, e.to_string())
            }
        };
        Some(Ok(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn input(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    fn tokens(rows: SelectedRows) -> Vec<String> {
        rows.map(|r| r.unwrap().get("purchaseToken").unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_sequential_rows_in_file_order() {
        let file = input(&["purchaseToken,package", "a,p", "b,p", "c,p"]);
        let source = RowSource::open(file.path()).unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        let rows: Vec<Row> = source
            .select(Selection::new(None, None), &mut rng)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].index, 1);
        assert_eq!(rows[2].index, 3);
        assert_eq!(rows[2].get("purchaseToken"), Some("c"));
        assert_eq!(source.count_rows().unwrap(), 3);
    }

    #[test]
    fn test_max_rows_truncates() {
        let file = input(&["purchaseToken", "a", "b", "c"]);
        let source = RowSource::open(file.path()).unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        let selection = Selection::new(None, Some(2));
        assert_eq!(tokens(source.select(selection, &mut rng).unwrap()), vec!["a", "b"]);
        assert_eq!(source.selected_len(selection).unwrap(), 2);
    }

    #[test]
    fn test_source_restarts_from_the_beginning() {
        let file = input(&["purchaseToken", "a", "b"]);
        let source = RowSource::open(file.path()).unwrap();

        assert_eq!(source.rows().unwrap().count(), 2);
        assert_eq!(source.rows().unwrap().count(), 2);
    }

    #[test]
    fn test_sample_yields_min_k_n_distinct_rows() {
        let mut lines = vec!["purchaseToken".to_string()];
        lines.extend((0..50).map(|i| format!("tok-{i}")));
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let file = input(&refs);
        let source = RowSource::open(file.path()).unwrap();
        let mut rng = StdRng::seed_from_u64(9);

        let picked = tokens(source.select(Selection::new(Some(5), None), &mut rng).unwrap());
        assert_eq!(picked.len(), 5);
        assert_eq!(picked.iter().collect::<HashSet<_>>().len(), 5);

        let all = tokens(source.select(Selection::new(Some(500), None), &mut rng).unwrap());
        assert_eq!(all.len(), 50);
        assert_eq!(source.selected_len(Selection::new(Some(500), Some(20))).unwrap(), 20);
    }

    #[test]
    fn test_sampled_rows_keep_file_positions() {
        let file = input(&["purchaseToken", "a", "b", "c", "d"]);
        let source = RowSource::open(file.path()).unwrap();
        let mut rng = StdRng::seed_from_u64(4);

        for row in source.select(Selection::new(Some(2), None), &mut rng).unwrap() {
            let row = row.unwrap();
            let expected = ["a", "b", "c", "d"][row.index - 1];
            assert_eq!(row.get("purchaseToken"), Some(expected));
        }
    }

    #[test]
    fn test_short_records_are_tolerated() {
        let file = input(&["purchaseToken,package", "a"]);
        let source = RowSource::open(file.path()).unwrap();
        let row = source.rows().unwrap().next().unwrap().unwrap();
        assert_eq!(row.get("purchaseToken"), Some("a"));
        assert_eq!(row.get("package"), None);
    }

    #[test]
    fn test_invalid_utf8_record_does_not_end_the_stream() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"purchaseToken\nt1\n\xff\xfe\nt3\n").unwrap();
        let source = RowSource::open(file.path()).unwrap();

        let rows: Vec<Row> = source.rows().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[1].decode_error().is_some());
        assert_eq!(rows[1].index, 2);
        assert_eq!(rows[2].get("purchaseToken"), Some("t3"));
        assert_eq!(rows[2].index, 3);
        assert_eq!(source.count_rows().unwrap(), 3);
    }

    #[test]
    fn test_missing_input_is_io_error() {
        let err = RowSource::open(Path::new("/nonexistent/input.csv")).unwrap_err();
        assert!(matches!(err, BulkError::Io { .. }));
    }
}
