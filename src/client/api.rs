//! The remote subscription API seam.
//!
//! Three verbs, each idempotent by token on the remote side. Implementations
//! report failures as values; retry and classification happen above them.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Successful response from one remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Decoded body, only for read operations
    pub body: Option<serde_json::Value>,
}

/// Failed remote call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    /// The server answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never produced an HTTP status (connect, timeout, auth refresh)
    #[error("Transport error: {0}")]
    Transport(String),

    /// A success status with a body that could not be decoded
    #[error("Invalid response body: {0}")]
    Decode(String),
}

/// Google-style error envelope: `{"error": {"message": ...}}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

impl ApiError {
    /// Build an HTTP error from a status and raw body.
    ///
    /// Prefers the envelope's `error.message`, then the raw body text, then a
    /// generic status line.
    pub fn from_body(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .and_then(|envelope| envelope.error.message)
            .filter(|m| !m.is_empty())
            .or_else(|| {
                let trimmed = body.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or_else(|| format!("HTTP {status}"));

        Self::Http { status, message }
    }
}

/// Subscription operations on the billing API.
#[async_trait]
pub trait SubscriptionApi: Send + Sync {
    /// Stop future payments (developer-requested cancellation).
    async fn cancel(&self, package: &str, token: &str) -> Result<ApiResponse, ApiError>;

    /// Fetch the current subscription resource. Read-only.
    async fn get(&self, package: &str, token: &str) -> Result<ApiResponse, ApiError>;

    /// Revoke access with a prorated refund.
    async fn revoke(&self, package: &str, token: &str) -> Result<ApiResponse, ApiError>;
}
