//! Channel-to-provider routing with a bounded per-attempt timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::DeliveryConfig;

use super::email::EmailProvider;
use super::http::build_client;
use super::webhook::WebhookProvider;
use super::{
    Channel, DeliveryError, DeliveryReceipt, NotificationGateway, NotificationProvider,
};

/// Routes each [`Channel`] to its registered provider.
pub struct ProviderGateway {
    providers: HashMap<Channel, Arc<dyn NotificationProvider>>,
    timeout: Duration,
}

impl ProviderGateway {
    /// Empty gateway; every send fails with `NotConfigured` until providers
    /// are registered.
    pub fn new(timeout: Duration) -> Self {
        Self {
            providers: HashMap::new(),
            timeout,
        }
    }

    /// Register (or replace) the provider for its channel.
    pub fn with_provider(mut self, provider: Arc<dyn NotificationProvider>) -> Self {
        self.providers.insert(provider.channel(), provider);
        self
    }

    /// Build the email, SMS, and push providers from delivery settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_config(config: &DeliveryConfig) -> reqwest::Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = build_client(timeout)?;
        Ok(Self::new(timeout)
            .with_provider(Arc::new(EmailProvider::new(
                client.clone(),
                config.email.clone(),
                config.dry_run,
            )))
            .with_provider(Arc::new(WebhookProvider::sms(
                client.clone(),
                config.sms.clone(),
                config.dry_run,
            )))
            .with_provider(Arc::new(WebhookProvider::push(
                client,
                config.push.clone(),
                config.dry_run,
            ))))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl NotificationGateway for ProviderGateway {
    async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        message: &str,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let provider = self
            .providers
            .get(&channel)
            .ok_or(DeliveryError::NotConfigured(channel))?;

        debug!(%channel, "sending notification");
        match tokio::time::timeout(self.timeout, provider.send(recipient, message)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout {
                channel,
                after: self.timeout,
            }),
        }
    }
}
