//! Shared JSON-over-HTTP plumbing for the channel providers.

use std::time::Duration;

use serde::Serialize;

use super::{Channel, DeliveryError};

/// Build the HTTP client shared by all providers.
///
/// The client-level timeout is a backstop; the gateway enforces the
/// per-attempt bound.
pub fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// POST `body` as JSON, with an optional bearer token, and require a 2xx.
pub async fn post_json<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    channel: Channel,
    url: &str,
    token: Option<&str>,
    body: &T,
) -> Result<(), DeliveryError> {
    let mut request = client.post(url).json(body);
    if let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| DeliveryError::Transport {
            channel,
            message: e.to_string(),
        })?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(DeliveryError::Provider {
            channel,
            status,
            body,
        });
    }
    Ok(())
}
