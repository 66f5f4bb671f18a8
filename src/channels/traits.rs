use std::time::Duration;

use async_trait::async_trait;

use super::Channel;

/// Provider acknowledgement for one accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub provider: String,
    pub message_id: String,
    pub status: String,
}

/// Failure of a single delivery attempt on one channel.
///
/// The dispatcher treats every variant the same way; only the message text
/// is recorded.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("{channel} provider timed out after {after:?}")]
    Timeout { channel: Channel, after: Duration },

    #[error("{0} provider is not configured")]
    NotConfigured(Channel),

    #[error("no {0} recipient on file for user")]
    MissingRecipient(Channel),

    #[error("{channel} provider rejected message (HTTP {status}): {body}")]
    Provider {
        channel: Channel,
        status: u16,
        body: String,
    },

    #[error("{channel} transport error: {message}")]
    Transport { channel: Channel, message: String },
}

/// One concrete transport. New channels only need to implement this trait.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    /// The channel this provider serves.
    fn channel(&self) -> Channel;

    /// Deliver `message` to a channel-specific recipient address.
    async fn send(&self, recipient: &str, message: &str) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Channel-to-transport resolution consumed by the dispatcher.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        message: &str,
    ) -> Result<DeliveryReceipt, DeliveryError>;
}
