//! Service-account authentication for the Android Publisher API.
//!
//! A signed RS256 JWT assertion is exchanged at the key's `token_uri` for a
//! bearer token, cached until shortly before it expires.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// OAuth scope for subscription management.
pub const ANDROID_PUBLISHER_SCOPE: &str = "https://www.googleapis.com/auth/androidpublisher";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Credential errors. Fatal when raised during setup.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Failed to read service account key {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid service account key: {0}")]
    InvalidKey(String),

    #[error("Failed to sign token assertion: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("Token exchange failed: {0}")]
    Exchange(String),
}

/// Source of bearer tokens for API requests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, AuthError>;
}

/// Fixed bearer token, for pre-issued credentials and tests.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

/// The fields of a service-account JSON key that the exchange needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    /// Parse a key from its JSON text.
    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        let key: Self =
            serde_json::from_str(json).map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        if key.key_type != "service_account" {
            return Err(AuthError::InvalidKey(format!(
                "expected type \"service_account\", found \"{}\"",
                key.key_type
            )));
        }
        Ok(key)
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Refresh five minutes early.
    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at - Duration::minutes(5)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    exp: i64,
    iat: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

/// Token source backed by a service-account key.
pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    http: reqwest::Client,
    cache: RwLock<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    pub fn new(key: ServiceAccountKey, http: reqwest::Client) -> Self {
        Self {
            key,
            http,
            cache: RwLock::new(None),
        }
    }

    /// Load a key file.
    pub fn from_file(path: &Path, http: reqwest::Client) -> Result<Self, AuthError> {
        let json = std::fs::read_to_string(path).map_err(|e| AuthError::Read {
            path: path.to_owned(),
            source: e,
        })?;
        Ok(Self::new(ServiceAccountKey::from_json(&json)?, http))
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    fn assertion(&self) -> Result<String, AuthError> {
        use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};

        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: ANDROID_PUBLISHER_SCOPE,
            aud: &self.key.token_uri,
            exp: now + ASSERTION_LIFETIME_SECS,
            iat: now,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();
        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())?;
        Ok(encode(&header, &claims, &encoding_key)?)
    }

    async fn exchange(&self) -> Result<CachedToken, AuthError> {
        let assertion = self.assertion()?;
        let params = [("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)];

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Exchange(format!("HTTP {}: {}", status.as_u16(), body.trim())));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Exchange(format!("invalid token response: {e}")))?;

        debug!(
            client_email = %self.key.client_email,
            expires_in = token.expires_in,
            "Obtained access token"
        );

        let expires_at = Duration::try_seconds(token.expires_in)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                AuthError::Exchange(format!("expires_in out of range: {}", token.expires_in))
            })?;

        Ok(CachedToken {
            token: token.access_token,
            expires_at,
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountAuth {
    async fn access_token(&self) -> Result<String, AuthError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref().filter(|t| !t.is_expired()) {
                return Ok(cached.token.clone());
            }
        }

        let mut cache = self.cache.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref().filter(|t| !t.is_expired()) {
            return Ok(cached.token.clone());
        }

        let fresh = self.exchange().await?;
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(token)
    }
}
