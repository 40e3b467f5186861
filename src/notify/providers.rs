//! Notification provider adapters
//!
//! Provider configuration is owned by Sonarr; each adapter extracts its
//! implementation-specific fields from the config's `fields` array and fails
//! the provider (not the dispatch) when required fields are missing.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;

use crate::sonarr::types::NotificationConfig;

#[async_trait]
pub trait NotificationProvider: Send + Sync {
    /// Sonarr's `implementation` discriminator, e.g. `Discord`.
    fn implementation(&self) -> &'static str;

    async fn send(
        &self,
        config: &NotificationConfig,
        title: &str,
        body: &str,
    ) -> anyhow::Result<()>;
}

// ============================================================================
// Discord
// ============================================================================

pub struct DiscordProvider {
    http: Arc<Client>,
}

impl DiscordProvider {
    pub fn new(http: Arc<Client>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl NotificationProvider for DiscordProvider {
    fn implementation(&self) -> &'static str {
        "Discord"
    }

    async fn send(
        &self,
        config: &NotificationConfig,
        title: &str,
        body: &str,
    ) -> anyhow::Result<()> {
        let webhook_url = config
            .field_str("webHookUrl")
            .ok_or_else(|| anyhow::anyhow!("Discord config '{}' has no webHookUrl", config.name))?;

        let payload = serde_json::json!({
            "content": format!("**{}**\n{}", title, body),
        });
        let response = self.http.post(&webhook_url).json(&payload).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Discord webhook returned HTTP {}", response.status());
        }
        Ok(())
    }
}

// ============================================================================
// Generic webhook
// ============================================================================

pub struct WebhookProvider {
    http: Arc<Client>,
}

impl WebhookProvider {
    pub fn new(http: Arc<Client>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl NotificationProvider for WebhookProvider {
    fn implementation(&self) -> &'static str {
        "Webhook"
    }

    async fn send(
        &self,
        config: &NotificationConfig,
        title: &str,
        body: &str,
    ) -> anyhow::Result<()> {
        let url = config
            .field_str("url")
            .ok_or_else(|| anyhow::anyhow!("Webhook config '{}' has no url", config.name))?;
        let method = config
            .field_str("method")
            .unwrap_or_else(|| "POST".to_string());
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| anyhow::anyhow!("Webhook config '{}' has invalid method", config.name))?;

        let payload = serde_json::json!({
            "title": title,
            "message": body,
            "eventType": "Download",
        });
        let response = self
            .http
            .request(method, &url)
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("Webhook returned HTTP {}", response.status());
        }
        Ok(())
    }
}

// ============================================================================
// Apprise
// ============================================================================

pub struct AppriseProvider {
    http: Arc<Client>,
}

impl AppriseProvider {
    pub fn new(http: Arc<Client>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl NotificationProvider for AppriseProvider {
    fn implementation(&self) -> &'static str {
        "Apprise"
    }

    async fn send(
        &self,
        config: &NotificationConfig,
        title: &str,
        body: &str,
    ) -> anyhow::Result<()> {
        let server_url = config
            .field_str("serverUrl")
            .ok_or_else(|| anyhow::anyhow!("Apprise config '{}' has no serverUrl", config.name))?;
        let endpoint = match config.field_str("configurationKey") {
            Some(key) => format!("{}/notify/{}", server_url.trim_end_matches('/'), key),
            None => format!("{}/notify/", server_url.trim_end_matches('/')),
        };

        let mut payload = serde_json::json!({
            "title": title,
            "body": body,
        });
        let urls = config.field_str_list("statelessUrls");
        if !urls.is_empty() {
            payload["urls"] = serde_json::json!(urls.join(","));
        }

        let response = self.http.post(&endpoint).json(&payload).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Apprise returned HTTP {}", response.status());
        }
        Ok(())
    }
}
