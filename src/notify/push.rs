//! Push provider seam: deliver a notification to a set of device tokens.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("push request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("push provider rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("push provider not configured")]
    NotConfigured,
}

/// Notification payload handed to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: HashMap<String, String>,
    /// Provider-side coalescing key. Set to the message id.
    pub collapse_key: String,
}

/// Per-token delivery counts reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PushReport {
    #[serde(default)]
    pub success: usize,
    #[serde(default)]
    pub failure: usize,
}

#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(&self, tokens: &[String], message: &PushMessage) -> Result<PushReport, PushError>;
}

/// FCM legacy HTTP API (`registration_ids` + server key).
pub struct FcmPushProvider {
    client: reqwest::Client,
    endpoint: String,
    server_key: String,
}

impl FcmPushProvider {
    pub fn new(endpoint: String, server_key: String, timeout: Duration) -> Result<Self, PushError> {
        if server_key.is_empty() {
            return Err(PushError::NotConfigured);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            server_key,
        })
    }
}

#[async_trait]
impl PushProvider for FcmPushProvider {
    async fn send(&self, tokens: &[String], message: &PushMessage) -> Result<PushReport, PushError> {
        if tokens.is_empty() {
            return Ok(PushReport::default());
        }

        let body = json!({
            "registration_ids": tokens,
            "notification": {
                "title": message.title,
                "body": message.body,
                "sound": "default",
            },
            "data": message.data,
            "collapse_key": message.collapse_key,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, format!("key={}", self.server_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PushError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(resp.json::<PushReport>().await.unwrap_or_default())
    }
}

/// Provider used when push delivery is disabled: logs and reports success.
pub struct LogPushProvider;

#[async_trait]
impl PushProvider for LogPushProvider {
    async fn send(&self, tokens: &[String], message: &PushMessage) -> Result<PushReport, PushError> {
        tracing::info!(
            tokens = tokens.len(),
            collapse_key = %message.collapse_key,
            title = %message.title,
            "Push delivery disabled, skipping send"
        );
        Ok(PushReport {
            success: tokens.len(),
            failure: 0,
        })
    }
}
