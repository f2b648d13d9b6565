//! Scripted in-memory `SubscriptionApi` for tests.

use crate::client::{ApiError, ApiResponse, SubscriptionApi};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verb {
    Cancel,
    Get,
    Revoke,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    pub verb: Verb,
    pub package: String,
    pub token: String,
}

/// Replays queued responses per token; unscripted calls succeed with 200.
#[derive(Default)]
pub(crate) struct ScriptedApi {
    scripts: Mutex<HashMap<String, VecDeque<Result<ApiResponse, ApiError>>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue responses for `token`, consumed in order.
    pub fn script(self, token: &str, responses: Vec<Result<ApiResponse, ApiError>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(token.to_string(), responses.into());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn respond(&self, verb: Verb, package: &str, token: &str) -> Result<ApiResponse, ApiError> {
        self.calls.lock().unwrap().push(Call {
            verb,
            package: package.to_string(),
            token: token.to_string(),
        });
        self.scripts
            .lock()
            .unwrap()
            .get_mut(token)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(ApiResponse {
                status: 200,
                body: None,
            }))
    }
}

pub(crate) fn http_error(status: u16, message: &str) -> Result<ApiResponse, ApiError> {
    Err(ApiError::Http {
        status,
        message: message.to_string(),
    })
}

pub(crate) fn ok_with(body: serde_json::Value) -> Result<ApiResponse, ApiError> {
    Ok(ApiResponse {
        status: 200,
        body: Some(body),
    })
}

#[async_trait]
impl SubscriptionApi for ScriptedApi {
    async fn cancel(&self, package: &str, token: &str) -> Result<ApiResponse, ApiError> {
        self.respond(Verb::Cancel, package, token)
    }

    async fn get(&self, package: &str, token: &str) -> Result<ApiResponse, ApiError> {
        self.respond(Verb::Get, package, token)
    }

    async fn revoke(&self, package: &str, token: &str) -> Result<ApiResponse, ApiError> {
        self.respond(Verb::Revoke, package, token)
    }
}
