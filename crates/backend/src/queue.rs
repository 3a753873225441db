//! Request queue trait and message type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// A raw message received from the request queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Unique message identifier from the queue provider.
    pub id: String,
    /// Raw message body (JSON string).
    pub body: String,
    /// Provider-specific handle for ack/nack.
    pub receipt_handle: String,
    /// When the message was sent to the queue.
    pub timestamp: DateTime<Utc>,
}

/// The external queue evaluation requests arrive on.
#[async_trait]
pub trait RequestSource: Send + Sync {
    /// Poll up to `max_messages` from the queue. Returns an empty vec if
    /// nothing is available.
    async fn poll(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge successful processing — removes the message.
    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Negative-acknowledge — returns the message to the queue for another
    /// server instance to pick up.
    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError>;
}
