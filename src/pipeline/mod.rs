//! Pipeline module - row dispatch and the batch driver.
//!
//! - `dispatch`: mode x dry-run selection of the remote verb
//! - `batch`: the sequential row loop with skips, audit and checkpoints

mod batch;
mod dispatch;

pub use batch::*;
pub use dispatch::*;
