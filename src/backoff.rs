//! Retry backoff as an injected dependency.
//!
//! The orchestrator never calls `tokio::time::sleep` directly: it asks a
//! [`Backoff`] to wait. Production uses [`TokioBackoff`]; tests inject a
//! recording implementation, so the exact 60 s/120 s/240 s schedule can be
//! asserted without real sleeping.

use async_trait::async_trait;
use std::time::Duration;

/// Sleeps between retry attempts.
#[async_trait]
pub trait Backoff: Send + Sync {
    async fn wait(&self, delay: Duration);
}

/// Production backoff: a real `tokio::time::sleep`.
#[derive(Debug, Default)]
pub struct TokioBackoff;

#[async_trait]
impl Backoff for TokioBackoff {
    async fn wait(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}
