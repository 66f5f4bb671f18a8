//! Email delivery through a transactional-email HTTP API.

use async_trait::async_trait;
use serde::Serialize;

use crate::config::EmailProviderConfig;

use super::http::post_json;
use super::message::message_id;
use super::{Channel, DeliveryError, DeliveryReceipt, NotificationProvider};

#[derive(Serialize)]
struct EmailPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

pub struct EmailProvider {
    client: reqwest::Client,
    config: EmailProviderConfig,
    dry_run: bool,
}

impl EmailProvider {
    pub fn new(client: reqwest::Client, config: EmailProviderConfig, dry_run: bool) -> Self {
        Self {
            client,
            config,
            dry_run,
        }
    }
}

#[async_trait]
impl NotificationProvider for EmailProvider {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, recipient: &str, message: &str) -> Result<DeliveryReceipt, DeliveryError> {
        let receipt = DeliveryReceipt {
            provider: Channel::Email.as_str().to_owned(),
            message_id: message_id(Channel::Email, recipient, message),
            status: "sent".to_owned(),
        };
        if self.dry_run {
            return Ok(receipt);
        }

        let url = self
            .config
            .api_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(DeliveryError::NotConfigured(Channel::Email))?;

        let payload = EmailPayload {
            from: &self.config.from,
            to: recipient,
            subject: &self.config.subject,
            text: message,
        };
        post_json(
            &self.client,
            Channel::Email,
            url,
            self.config.api_token.as_deref(),
            &payload,
        )
        .await?;
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: Option<String>) -> EmailProviderConfig {
        EmailProviderConfig {
            api_url: url,
            api_token: Some("mail-key".to_owned()),
            from: "reminders@example.com".to_owned(),
            subject: "Reminder Notification".to_owned(),
        }
    }

    #[tokio::test]
    async fn posts_envelope_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/send"))
            .and(header("authorization", "Bearer mail-key"))
            .and(body_json(serde_json::json!({
                "from": "reminders@example.com",
                "to": "ada@example.com",
                "subject": "Reminder Notification",
                "text": "pay rent",
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let provider = EmailProvider::new(
            reqwest::Client::new(),
            config(Some(format!("{}/v1/send", server.uri()))),
            false,
        );
        let receipt = provider.send("ada@example.com", "pay rent").await.unwrap();
        assert_eq!(receipt.provider, "email");
        assert_eq!(receipt.status, "sent");
        assert_eq!(receipt.message_id.len(), 16);
    }

    #[tokio::test]
    async fn missing_url_is_not_configured() {
        let provider = EmailProvider::new(reqwest::Client::new(), config(None), false);
        let err = provider.send("ada@example.com", "x").await.unwrap_err();
        assert!(matches!(err, DeliveryError::NotConfigured(Channel::Email)));
    }

    #[tokio::test]
    async fn dry_run_skips_network() {
        let provider = EmailProvider::new(reqwest::Client::new(), config(None), true);
        let receipt = provider.send("ada@example.com", "x").await.unwrap();
        assert_eq!(
            receipt.message_id,
            message_id(Channel::Email, "ada@example.com", "x")
        );
    }
}
