//! Chat delivery: Telegram bot API, Discord webhooks and plain JSON
//! webhooks.

use std::time::Duration;

use reqwest::{Client, Response};
use serde_json::json;
use tracing::{debug, instrument, warn};

use super::NotifyError;
use super::discord;
use crate::directory::SettingsStore;
use crate::{AlertEvent, AlertRule, Device};

pub const TELEGRAM_API: &str = "https://api.telegram.org";

/// Upper bound for one chat request, overridable with the `chat_timeout`
/// setting (seconds).
pub const DEFAULT_CHAT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, PartialEq, Eq)]
pub enum ChatProvider {
    Telegram { bot_token: String, chat_id: String },
    Discord { webhook_url: String },
    Webhook { webhook_url: String },
}

impl std::fmt::Debug for ChatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatProvider::Telegram { chat_id, .. } => write!(f, "Telegram(chat {chat_id})"),
            ChatProvider::Discord { .. } => write!(f, "Discord"),
            ChatProvider::Webhook { webhook_url } => write!(f, "Webhook({webhook_url})"),
        }
    }
}

impl ChatProvider {
    /// Provider selected by `chat_provider` (`telegram` when unset).
    pub fn from_settings(settings: &dyn SettingsStore) -> Result<Self, NotifyError> {
        let value = |key: &str| settings.get(key).filter(|v| !v.trim().is_empty());
        let provider = settings.get_or("chat_provider", "telegram").trim().to_lowercase();

        match provider.as_str() {
            "telegram" => match (value("telegram_bot_token"), value("telegram_chat_id")) {
                (Some(bot_token), Some(chat_id)) => Ok(ChatProvider::Telegram { bot_token, chat_id }),
                _ => Err(NotifyError::ConfigIncomplete("telegram".to_string())),
            },
            "discord" => value("chat_webhook_url")
                .map(|webhook_url| ChatProvider::Discord { webhook_url })
                .ok_or_else(|| NotifyError::ConfigIncomplete("discord".to_string())),
            "webhook" => value("chat_webhook_url")
                .map(|webhook_url| ChatProvider::Webhook { webhook_url })
                .ok_or_else(|| NotifyError::ConfigIncomplete("webhook".to_string())),
            other => Err(NotifyError::ConfigIncomplete(format!(
                "unknown chat provider {other}"
            ))),
        }
    }
}

/// Posts alert messages to the configured chat provider.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: Client,
    telegram_api: String,
}

impl Default for ChatClient {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_CHAT_TIMEOUT)
    }
}

impl ChatClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            telegram_api: TELEGRAM_API.to_string(),
        }
    }

    /// Client whose requests are abandoned after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("failed to build chat HTTP client: {e}");
                Client::default()
            });
        Self::new(client)
    }

    /// Client built from the `chat_timeout` setting.
    pub fn from_settings(settings: &dyn SettingsStore) -> Self {
        let seconds = settings.get_u64("chat_timeout", DEFAULT_CHAT_TIMEOUT.as_secs());
        Self::with_timeout(Duration::from_secs(seconds.max(1)))
    }

    /// Point Telegram requests at another API base URL.
    pub fn with_telegram_api(mut self, base: impl Into<String>) -> Self {
        self.telegram_api = base.into().trim_end_matches('/').to_string();
        self
    }

    #[instrument(skip_all, fields(provider = ?provider, rule = %rule.name))]
    pub async fn send(
        &self,
        provider: &ChatProvider,
        rule: &AlertRule,
        device: &Device,
        event: &AlertEvent,
        text: &str,
    ) -> Result<(), NotifyError> {
        let request = match provider {
            ChatProvider::Telegram { bot_token, chat_id } => self
                .client
                .post(format!("{}/bot{bot_token}/sendMessage", self.telegram_api))
                .json(&json!({ "chat_id": chat_id, "text": text })),
            ChatProvider::Discord { webhook_url } => self
                .client
                .post(webhook_url)
                .json(&discord::alert_message(rule, device, event, text)),
            ChatProvider::Webhook { webhook_url } => self.client.post(webhook_url).json(&json!({
                "text": text,
                "rule": rule.name,
                "device": device.name,
                "address": device.address,
                "event": event,
            })),
        };

        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.without_url().to_string()))?;

        check_status(response).await?;
        debug!("chat message delivered");
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<(), NotifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(NotifyError::Rejected {
        status: status.to_string(),
        body,
    })
}
