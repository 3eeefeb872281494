//! Edge collaborators: client notification push and billing refund.
//!
//! Both are invoked only by the orchestrator, at the edges of a run — one
//! success publish, or the refund + error publish of the compensation path.

use crate::adapters::{BillingCompensator, NotificationSink};
use crate::error::{PipelineError, Result};
use crate::types::EmbedContent;
use async_trait::async_trait;
use serde::Serialize;

/// Connection settings for [`HttpNotificationSink`].
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Full publish endpoint, e.g. `https://gateway.internal/v1/push`.
    pub endpoint: String,
    pub api_token: String,
}

/// Notification push backed by `reqwest`: the serialized [`EmbedContent`]
/// is POSTed to the gateway that holds the client connection.
pub struct HttpNotificationSink {
    client: reqwest::Client,
    config: NotifyConfig,
}

impl HttpNotificationSink {
    pub fn new(client: reqwest::Client, config: NotifyConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl NotificationSink for HttpNotificationSink {
    async fn publish(&self, content: &EmbedContent) -> Result<()> {
        self.client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_token)
            .json(content)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::Publish {
                detail: e.to_string(),
            })?;
        Ok(())
    }
}

/// Connection settings for [`HttpBillingCompensator`].
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Full refund endpoint, e.g. `https://billing.internal/v1/refunds`.
    pub endpoint: String,
    pub api_token: String,
}

#[derive(Serialize)]
struct RefundRequest<'a> {
    owner_id: &'a str,
    credits: u32,
    reason: &'a str,
}

/// Credit refund backed by `reqwest`.
pub struct HttpBillingCompensator {
    client: reqwest::Client,
    config: BillingConfig,
}

impl HttpBillingCompensator {
    pub fn new(client: reqwest::Client, config: BillingConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl BillingCompensator for HttpBillingCompensator {
    async fn refund(&self, owner_id: &str, credits: u32, reason: &str) -> Result<()> {
        self.client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_token)
            .json(&RefundRequest {
                owner_id,
                credits,
                reason,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::Refund {
                owner_id: owner_id.to_string(),
                detail: e.to_string(),
            })?;
        Ok(())
    }
}
