//! Failure classification.
//!
//! `classify` is a pure function of the final HTTP status and the error
//! message. Message rules win over status rules, so "already cancelled" is
//! reported as such whatever status carried it.

use crate::models::ErrorKind;

/// HTTP statuses worth retrying: rate limited, internal error, unavailable.
pub const TRANSIENT_STATUSES: [u16; 3] = [429, 500, 503];

/// Whether a status is in [`TRANSIENT_STATUSES`].
pub fn is_transient_status(status: u16) -> bool {
    TRANSIENT_STATUSES.contains(&status)
}

/// Map a failed call to an [`ErrorKind`]. Case-insensitive.
pub fn classify(status: Option<u16>, message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();

    if lowered.contains("already") && lowered.contains("cancel") {
        ErrorKind::AlreadyInTargetState
    } else if lowered.contains("not found") {
        ErrorKind::NotFound
    } else if lowered.contains("permission") || lowered.contains("forbidden") {
        ErrorKind::PermissionDenied
    } else if status.is_some_and(is_transient_status) {
        ErrorKind::TransientServer
    } else {
        ErrorKind::Other
    }
}
