//! Delivery of finished proof messages.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::BroadcastError;

/// Broadcast target that disables delivery.
pub const NO_BROADCAST: &str = "NO_BROADCAST";

/// Default time allowed for a target to acknowledge a proof.
pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_millis(3000);

/// Ships a serialized `PoetProofMessage`.
///
/// `Ok(())` is an acknowledgement: the round's local state may then be
/// reclaimed. Errors are retried on the next start.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, message: &[u8]) -> Result<(), BroadcastError>;
}

/// Acknowledges everything without sending it anywhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBroadcaster;

#[async_trait]
impl Broadcaster for NoopBroadcaster {
    async fn broadcast(&self, message: &[u8]) -> Result<(), BroadcastError> {
        debug!(bytes = message.len(), "broadcast disabled, dropping proof message");
        Ok(())
    }
}

/// POSTs the message to a node's HTTP endpoint; a body of `ok` acknowledges.
#[derive(Debug, Clone)]
pub struct HttpBroadcaster {
    client: Client,
    target: String,
}

impl HttpBroadcaster {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Result<Self, BroadcastError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            target: target.into(),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl Broadcaster for HttpBroadcaster {
    async fn broadcast(&self, message: &[u8]) -> Result<(), BroadcastError> {
        let response = self
            .client
            .post(&self.target)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(message.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BroadcastError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        if body.trim() != "ok" {
            return Err(BroadcastError::Rejected(body));
        }
        debug!(target = %self.target, bytes = message.len(), "proof message acknowledged");
        Ok(())
    }
}

/// Build the broadcaster for a configured target.
pub fn from_target(target: &str, timeout: Duration) -> Result<Arc<dyn Broadcaster>, BroadcastError> {
    let target = target.trim();
    if target.is_empty() || target == NO_BROADCAST {
        return Ok(Arc::new(NoopBroadcaster));
    }
    Ok(Arc::new(HttpBroadcaster::new(target, timeout)?))
}
