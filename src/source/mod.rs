//! Row source module.
//!
//! - `reader`: restartable CSV source with sequential or sampled selection
//! - `sample`: single-pass reservoir sampling
//! - `columns`: header resolution against alias lists

mod columns;
mod reader;
mod sample;

pub use columns::*;
pub use reader::*;
pub use sample::*;
