//! Google Play Android Publisher client (`purchases.subscriptionsv2`).

use crate::client::{ApiError, ApiResponse, SubscriptionApi, TokenSource};
use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Client for the three subscription verbs.
///
/// Every call fetches a bearer token from the [`TokenSource`] (cached there)
/// and reports failures as [`ApiError`] values; retries live in the caller.
pub struct PlayClient {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<dyn TokenSource>,
}

impl PlayClient {
    /// Create a client against `base_url` (no trailing slash required).
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        auth: Arc<dyn TokenSource>,
    ) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_http(http, base_url, auth))
    }

    /// Create a client on an existing HTTP client.
    pub fn with_http(
        http: reqwest::Client,
        base_url: impl Into<String>,
        auth: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    /// URL of one token resource, optionally with a `:verb` suffix.
    ///
    /// Package and token are pushed as single path segments, so reserved
    /// characters in either are percent-encoded instead of changing the path.
    fn token_url(&self, package: &str, token: &str, verb: Option<&str>) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ApiError::Transport(format!("invalid base URL {}: {e}", self.base_url)))?;
        let last = match verb {
            Some(verb) => format!("{token}:{verb}"),
            None => token.to_string(),
        };
        url.path_segments_mut()
            .map_err(|()| ApiError::Transport(format!("base URL cannot hold a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend([
                "applications",
                package,
                "purchases",
                "subscriptionsv2",
                "tokens",
                last.as_str(),
            ]);
        Ok(url)
    }

    async fn headers(&self) -> Result<HeaderMap, ApiError> {
        let bearer = self
            .auth
            .access_token()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Bearer {bearer}"))
            .map_err(|e| ApiError::Transport(format!("invalid bearer token: {e}")))?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    /// Send a request and split the result into success/HTTP error/transport error.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        decode_body: bool,
    ) -> Result<ApiResponse, ApiError> {
        let response = request
            .headers(self.headers().await?)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status().as_u16();

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status, "Request failed");
            return Err(ApiError::from_body(status, &body));
        }

        let body = if decode_body {
            let value: Value = response
                .json()
                .await
                .map_err(|e| ApiError::Decode(e.to_string()))?;
            Some(value)
        } else {
            None
        };

        Ok(ApiResponse { status, body })
    }
}

#[async_trait]
impl SubscriptionApi for PlayClient {
    async fn cancel(&self, package: &str, token: &str) -> Result<ApiResponse, ApiError> {
        let url = self.token_url(package, token, Some("cancel"))?;
        let body = json!({
            "cancellationContext": {
                "cancellationType": "DEVELOPER_REQUESTED_STOP_PAYMENTS"
            }
        });
        self.send(self.http.post(url).json(&body), false).await
    }

    async fn get(&self, package: &str, token: &str) -> Result<ApiResponse, ApiError> {
        let url = self.token_url(package, token, None)?;
        self.send(self.http.get(url), true).await
    }

    async fn revoke(&self, package: &str, token: &str) -> Result<ApiResponse, ApiError> {
        let url = self.token_url(package, token, Some("revoke"))?;
        let body = json!({"revocationContext": {"proratedRefund": {}}});
        self.send(self.http.post(url).json(&body), false).await
    }
}
