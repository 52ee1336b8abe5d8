//! Push provider port and adapters.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::notification::{NotificationPayload, PushPriority};

/// Shortest string accepted as a provider registration token.
const MIN_TOKEN_LEN: usize = 32;

/// Result for a single token in a multicast send, in request order.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Delivered {
        message_id: Option<String>,
    },
    Failed {
        code: String,
        message: String,
        /// The provider no longer recognises the token.
        dead_token: bool,
    },
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("push provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("push provider protocol error: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Sends one payload to every token. Returns one outcome per token, in
    /// the order the tokens were given. A batch-level failure is an `Err`.
    async fn send_multicast(
        &self,
        payload: &NotificationPayload,
        tokens: &[String],
    ) -> Result<Vec<PushOutcome>, PushError>;
}

/// Cheap format check that weeds out tokens minted by other push SDKs
/// (Expo) and obvious garbage before they reach the provider.
pub fn looks_like_provider_token(token: &str) -> bool {
    token.len() >= MIN_TOKEN_LEN
        && !token.starts_with("ExponentPushToken[")
        && !token.starts_with("ExpoPushToken[")
        && !token.chars().any(char::is_whitespace)
}

#[derive(Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct FcmRequest<'a> {
    registration_ids: &'a [String],
    priority: &'static str,
    notification: FcmNotification<'a>,
    data: &'a BTreeMap<String, String>,
    content_available: bool,
}

#[derive(Deserialize)]
struct FcmResponse {
    #[serde(default)]
    results: Vec<FcmResult>,
}

#[derive(Deserialize)]
struct FcmResult {
    message_id: Option<String>,
    error: Option<String>,
}

/// FCM HTTP multicast adapter.
pub struct FcmPushProvider {
    client: Client,
    endpoint: String,
    server_key: String,
}

impl FcmPushProvider {
    pub fn new(endpoint: String, server_key: String, timeout: Duration) -> Result<Self, PushError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            server_key,
        })
    }
}

fn is_dead_token_code(code: &str) -> bool {
    matches!(
        code,
        "NotRegistered" | "InvalidRegistration" | "MissingRegistration"
    )
}

fn priority_hint(priority: PushPriority) -> &'static str {
    match priority {
        PushPriority::Normal => "normal",
        PushPriority::High => "high",
    }
}

#[async_trait]
impl PushProvider for FcmPushProvider {
    async fn send_multicast(
        &self,
        payload: &NotificationPayload,
        tokens: &[String],
    ) -> Result<Vec<PushOutcome>, PushError> {
        let request = FcmRequest {
            registration_ids: tokens,
            priority: priority_hint(payload.priority),
            notification: FcmNotification {
                title: &payload.title,
                body: &payload.body,
            },
            data: &payload.data,
            content_available: payload.priority == PushPriority::High,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("key={}", self.server_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PushError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: FcmResponse = response.json().await?;
        let outcomes = map_results(parsed, tokens.len())?;

        debug!(tokens = tokens.len(), "fcm multicast completed");
        Ok(outcomes)
    }
}

/// One outcome per token, in request order.
fn map_results(parsed: FcmResponse, expected: usize) -> Result<Vec<PushOutcome>, PushError> {
    if parsed.results.len() != expected {
        return Err(PushError::Protocol(format!(
            "expected {expected} results, got {}",
            parsed.results.len()
        )));
    }

    Ok(parsed
        .results
        .into_iter()
        .map(|result| match result.error {
            Some(code) => PushOutcome::Failed {
                dead_token: is_dead_token_code(&code),
                message: format!("fcm rejected token: {code}"),
                code,
            },
            None => PushOutcome::Delivered {
                message_id: result.message_id,
            },
        })
        .collect())
}

/// Dry-run provider used when no provider credentials are configured.
pub struct LogPushProvider;

#[async_trait]
impl PushProvider for LogPushProvider {
    async fn send_multicast(
        &self,
        payload: &NotificationPayload,
        tokens: &[String],
    ) -> Result<Vec<PushOutcome>, PushError> {
        info!(
            title = %payload.title,
            tokens = tokens.len(),
            "push provider not configured; logging notification instead"
        );

        Ok(tokens
            .iter()
            .map(|_| PushOutcome::Delivered { message_id: None })
            .collect())
    }
}
