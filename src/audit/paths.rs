//! Run-partitioned output paths.
//!
//! One stamp per run (UTC `%Y%m%d_%H%M%S`) names the run's log and export
//! directories, so repeated runs never overwrite each other's audit trail.

use crate::models::OperationMode;
use chrono::{DateTime, Utc};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

pub const LOG_DIR: &str = "logs";
pub const OUTPUT_DIR: &str = "outputs";

/// Stamp identifying one run.
pub fn run_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Audit log path for a run.
///
/// An explicit path is used verbatim. Otherwise the log goes to
/// `logs/<stamp>/<mode>_log_<stamp>.jsonl`, or `logs/<mode>_log.jsonl` when
/// timestamped logs are off.
pub fn build_log_path(
    mode: OperationMode,
    explicit: Option<&Path>,
    timestamp_logs: bool,
    stamp: &str,
) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_owned();
    }
    let base = format!("{mode}_log");
    if timestamp_logs {
        Path::new(LOG_DIR)
            .join(stamp)
            .join(format!("{base}_{stamp}.jsonl"))
    } else {
        Path::new(LOG_DIR).join(format!("{base}.jsonl"))
    }
}

/// Insert `_<stamp>` before the extension, or at the end when there is none.
pub fn append_timestamp(path: &Path, stamp: &str) -> PathBuf {
    let Some(stem) = path.file_stem() else {
        return path.to_owned();
    };

    let mut name = OsString::from(stem);
    name.push(format!("_{stamp}"));
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

/// Move a path that starts with `base_dir` under `base_dir/<stamp>/`.
///
/// Paths elsewhere are returned unchanged.
pub fn apply_stamp_dir(path: &Path, stamp: &str, base_dir: &str) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == base_dir => {
            let rest = components.as_path();
            if rest.as_os_str().is_empty() {
                return path.to_owned();
            }
            Path::new(base_dir).join(stamp).join(rest)
        }
        _ => path.to_owned(),
    }
}

/// Path of one eligibility export.
///
/// Defaults to `outputs/<stamp>/<default_name>_<stamp>.csv`. An explicit path
/// is stamped, then moved under the run directory if it lives in `outputs/`.
pub fn export_path(explicit: Option<&Path>, default_name: &str, stamp: &str) -> PathBuf {
    let stamped = match explicit {
        Some(path) => append_timestamp(path, stamp),
        None => Path::new(OUTPUT_DIR).join(format!("{default_name}_{stamp}.csv")),
    };
    apply_stamp_dir(&stamped, stamp, OUTPUT_DIR)
}
