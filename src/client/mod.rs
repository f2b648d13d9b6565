//! Remote API client module.
//!
//! - `api`: the `SubscriptionApi` seam and its error type
//! - `auth`: service-account token exchange
//! - `play`: reqwest implementation for Google Play
//! - `classifier` / `retry`: failure taxonomy and the retry executor

mod api;
mod auth;
mod classifier;
mod play;
mod retry;

#[cfg(test)]
pub(crate) mod fake;

pub use api::*;
pub use auth::*;
pub use classifier::*;
pub use play::*;
pub use retry::*;
