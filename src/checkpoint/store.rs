//! Token checkpoint files for resumable runs.
//!
//! Invariants:
//! - A token in the success set is never sent to the remote API again, in
//!   this run or any later run sharing the file.
//! - Files are append-only, one token per line, flushed after every append.
//! - A read-only store (dry runs) loads the success set and writes nothing.
//! - Failure membership is informational; it never causes a skip.

use crate::models::{BulkError, Result};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Newline-delimited append log.
#[derive(Debug)]
struct TokenLog {
    path: PathBuf,
    file: File,
}

impl TokenLog {
    fn open(path: &Path) -> Result<Self> {
        ensure_parent(path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| BulkError::io(format!("opening checkpoint {}", path.display()), e))?;
        Ok(Self {
            path: path.to_owned(),
            file,
        })
    }

    fn append(&mut self, token: &str) -> Result<()> {
        writeln!(self.file, "{token}")
            .and_then(|()| self.file.flush())
            .map_err(|e| {
                BulkError::io(format!("appending to checkpoint {}", self.path.display()), e)
            })
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .map_err(|e| BulkError::io(format!("creating directory {}", parent.display()), e)),
        _ => Ok(()),
    }
}

/// Read a token file into a set. A missing file is an empty set.
pub fn load_tokens(path: &Path) -> Result<HashSet<String>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => {
            return Err(BulkError::io(
                format!("opening checkpoint {}", path.display()),
                e,
            ));
        }
    };

    let mut tokens = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line =
            line.map_err(|e| BulkError::io(format!("reading checkpoint {}", path.display()), e))?;
        let token = line.trim();
        if !token.is_empty() {
            tokens.insert(token.to_string());
        }
    }
    Ok(tokens)
}

/// Success and failure checkpoints for one run.
#[derive(Debug, Default)]
pub struct CheckpointStore {
    done: HashSet<String>,
    success_log: Option<TokenLog>,
    failure_log: Option<TokenLog>,
}

impl CheckpointStore {
    /// Load the success set and open both files for appending.
    pub fn open(success: Option<&Path>, failure: Option<&Path>) -> Result<Self> {
        let done = match success {
            Some(path) => load_tokens(path)?,
            None => HashSet::new(),
        };
        if let Some(path) = success {
            info!(path = %path.display(), tokens = done.len(), "Loaded success checkpoint");
        }

        Ok(Self {
            done,
            success_log: success.map(TokenLog::open).transpose()?,
            failure_log: failure.map(TokenLog::open).transpose()?,
        })
    }

    /// Load the success set without opening anything for writing.
    pub fn read_only(success: Option<&Path>) -> Result<Self> {
        let done = match success {
            Some(path) => load_tokens(path)?,
            None => HashSet::new(),
        };
        debug!(tokens = done.len(), "Loaded success checkpoint (read-only)");
        Ok(Self {
            done,
            ..Self::default()
        })
    }

    /// Whether `token` already succeeded.
    pub fn contains(&self, token: &str) -> bool {
        self.done.contains(token)
    }

    /// Tokens known to have succeeded.
    pub fn done(&self) -> &HashSet<String> {
        &self.done
    }

    /// Mark `token` done in memory and, when configured, on disk.
    pub fn record_success(&mut self, token: &str) -> Result<()> {
        if let Some(log) = self.success_log.as_mut() {
            log.append(token)?;
        }
        self.done.insert(token.to_string());
        Ok(())
    }

    /// Append `token` to the failure file, when configured.
    pub fn record_failure(&mut self, token: &str) -> Result<()> {
        match self.failure_log.as_mut() {
            Some(log) => log.append(token),
            None => Ok(()),
        }
    }
}
