//! Content-relay webhook delivery
//!
//! Forwards extracted page content to a user-configured webhook. The
//! disabled-config invariant is enforced here: a disabled webhook
//! configuration never produces a network call.

use crate::config::WebhookConfig;
use crate::error::{Result, TabmateError};
use crate::host::ExtractedPage;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(15);
const API_KEY_HEADER: &str = "X-Api-Key";

/// Webhook delivery body
#[derive(Debug, Serialize)]
struct DeliveryBody<'a> {
    url: &'a str,
    title: &'a str,
    content: &'a str,
}

/// Delivers extracted page content to the configured webhook
pub struct ContentRelay {
    client: Client,
}

impl ContentRelay {
    /// Create a relay client
    ///
    /// # Errors
    ///
    /// Returns an error if HTTP client initialization fails.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .user_agent("tabmate/0.2.0")
            .build()
            .map_err(|e| TabmateError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Post an extracted page to the webhook
    ///
    /// # Errors
    ///
    /// Returns `TabmateError::Config` without touching the network when
    /// the webhook is disabled; transport failures map to
    /// `TabmateError::Network`, rejections to `TabmateError::Backend`.
    pub async fn deliver(&self, config: &WebhookConfig, page: &ExtractedPage) -> Result<()> {
        if !config.enabled {
            return Err(TabmateError::Config("webhook is disabled".to_string()).into());
        }

        let body = DeliveryBody {
            url: &page.page.url,
            title: &page.page.title,
            content: &page.content,
        };
        let mut request = self.client.post(&config.target_url).json(&body);
        if let Some(api_key) = &config.api_key {
            request = request.header(API_KEY_HEADER, api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TabmateError::Network(format!("Webhook delivery failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!("webhook rejected delivery {}: {}", status, error_text);
            return Err(TabmateError::Backend {
                status: status.as_u16(),
                message: error_text,
            }
            .into());
        }
        tracing::debug!(target = %config.target_url, "delivered page content");
        Ok(())
    }
}
