//! Webhook-based notification sender
//!
//! Sends Discord-style embed payloads to channel-keyed webhook URLs. An
//! unset channel is a successful no-op, and a failed send never propagates
//! an error to the caller — notifications are strictly best-effort.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::config::NotificationConfig;

use super::{Notifier, NotifySendResult};

/// One embed field
#[derive(Clone, Debug, Serialize)]
pub struct EmbedField {
    /// Field name
    pub name: String,
    /// Field value
    pub value: String,
    /// Render inline
    pub inline: bool,
}

/// A message embed
#[derive(Clone, Debug, Default, Serialize)]
pub struct Embed {
    /// Embed title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Embed body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Accent colour
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    /// Key/value fields
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub fields: Vec<EmbedField>,
}

impl Embed {
    /// Embed with a title and description
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            description: Some(description.into()),
            ..Default::default()
        }
    }

    /// Set the accent colour
    pub fn color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    /// Append a field
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    embeds: &'a [Embed],
}

/// Channel→URL webhook sender
pub struct WebhookNotifier {
    http: reqwest::Client,
    config: NotificationConfig,
}

impl WebhookNotifier {
    /// Create a sender over the configured channel map
    pub fn new(config: NotificationConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { http, config }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(
        &self,
        channel: &str,
        embeds: Vec<Embed>,
        content: Option<&str>,
    ) -> NotifySendResult {
        let Some(url) = self.config.url_for(channel) else {
            tracing::debug!(channel, "notification channel unset, skipping");
            return NotifySendResult::skipped();
        };

        let body = WebhookBody {
            content,
            embeds: &embeds,
        };

        match self.http.post(url).json(&body).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if response.status().is_success() {
                    tracing::debug!(channel, status, "notification sent");
                    NotifySendResult {
                        success: true,
                        status_code: Some(status),
                        error: None,
                    }
                } else {
                    let text = response.text().await.unwrap_or_default();
                    tracing::warn!(channel, status, body = %text, "notification rejected");
                    NotifySendResult {
                        success: false,
                        status_code: Some(status),
                        error: Some(format!("HTTP {status}: {text}")),
                    }
                }
            }
            Err(e) => {
                tracing::warn!(channel, error = %e, "notification send failed");
                NotifySendResult {
                    success: false,
                    status_code: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
