//! HTTP client for the external key-management service.
//!
//! The KMS holds one wrapping key per tenant (`key_id`). Symmetric keys
//! cross the wire base64-encoded inside small JSON bodies; the service never
//! sees artifact plaintext.

use crate::adapters::KeyManagementClient;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Connection settings for [`HttpKeyManagementClient`].
///
/// Injected explicitly rather than read from process-global state so tests
/// and multi-tenant deployments can construct several clients side by side.
#[derive(Debug, Clone)]
pub struct KmsConfig {
    /// Base URL, e.g. `https://kms.internal`.
    pub base_url: String,
    pub api_token: String,
}

#[derive(Serialize)]
struct WrapRequest<'a> {
    key_id: &'a str,
    plaintext_key: &'a str,
}

#[derive(Deserialize)]
struct WrapResponse {
    wrapped: String,
}

#[derive(Serialize)]
struct UnwrapRequest<'a> {
    key_id: &'a str,
    wrapped: &'a str,
}

#[derive(Deserialize)]
struct UnwrapResponse {
    plaintext_key: String,
}

/// KMS client backed by `reqwest`.
pub struct HttpKeyManagementClient {
    client: reqwest::Client,
    config: KmsConfig,
}

impl HttpKeyManagementClient {
    pub fn new(client: reqwest::Client, config: KmsConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self, op: &str) -> String {
        format!("{}/v1/keys/{}", self.config.base_url.trim_end_matches('/'), op)
    }
}

#[async_trait]
impl KeyManagementClient for HttpKeyManagementClient {
    async fn wrap(&self, plaintext_key_b64: &str, key_id: &str) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint("wrap"))
            .bearer_auth(&self.config.api_token)
            .json(&WrapRequest {
                key_id,
                plaintext_key: plaintext_key_b64,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::KeyWrap {
                key_id: key_id.to_string(),
                detail: e.to_string(),
            })?;

        let body: WrapResponse = response.json().await.map_err(|e| PipelineError::KeyWrap {
            key_id: key_id.to_string(),
            detail: format!("malformed wrap response: {e}"),
        })?;
        Ok(body.wrapped)
    }

    async fn unwrap(&self, wrapped: &str, key_id: &str) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint("unwrap"))
            .bearer_auth(&self.config.api_token)
            .json(&UnwrapRequest { key_id, wrapped })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::KeyUnwrap {
                key_id: key_id.to_string(),
                detail: e.to_string(),
            })?;

        let body: UnwrapResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::KeyUnwrap {
                key_id: key_id.to_string(),
                detail: format!("malformed unwrap response: {e}"),
            })?;
        Ok(body.plaintext_key)
    }
}
