//! SMS and push delivery through `{to, message}` JSON webhooks.

use async_trait::async_trait;
use serde::Serialize;

use crate::config::WebhookProviderConfig;

use super::http::post_json;
use super::message::message_id;
use super::{Channel, DeliveryError, DeliveryReceipt, NotificationProvider};

#[derive(Serialize)]
struct WebhookPayload<'a> {
    to: &'a str,
    message: &'a str,
}

/// Provider for channels whose upstream accepts a plain `{to, message}` POST.
pub struct WebhookProvider {
    channel: Channel,
    client: reqwest::Client,
    config: WebhookProviderConfig,
    dry_run: bool,
}

impl WebhookProvider {
    pub fn sms(client: reqwest::Client, config: WebhookProviderConfig, dry_run: bool) -> Self {
        Self {
            channel: Channel::Sms,
            client,
            config,
            dry_run,
        }
    }

    pub fn push(client: reqwest::Client, config: WebhookProviderConfig, dry_run: bool) -> Self {
        Self {
            channel: Channel::Push,
            client,
            config,
            dry_run,
        }
    }
}

#[async_trait]
impl NotificationProvider for WebhookProvider {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, recipient: &str, message: &str) -> Result<DeliveryReceipt, DeliveryError> {
        let receipt = DeliveryReceipt {
            provider: self.channel.as_str().to_owned(),
            message_id: message_id(self.channel, recipient, message),
            status: "sent".to_owned(),
        };
        if self.dry_run {
            return Ok(receipt);
        }

        let url = self
            .config
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(DeliveryError::NotConfigured(self.channel))?;

        post_json(
            &self.client,
            self.channel,
            url,
            self.config.token.as_deref(),
            &WebhookPayload {
                to: recipient,
                message,
            },
        )
        .await?;
        Ok(receipt)
    }
}
