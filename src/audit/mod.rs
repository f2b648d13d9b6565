//! Audit trail module.
//!
//! - `logger`: per-row JSONL audit records
//! - `export`: validate-mode eligible/ineligible CSVs
//! - `paths`: run-stamped log and export locations
//! - `report`: post-hoc log summary and CSV exports

mod export;
mod logger;
mod paths;
mod report;

pub use export::*;
pub use logger::*;
pub use paths::*;
pub use report::*;
