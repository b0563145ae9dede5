//! Alert notification delivery by email and chat.
//!
//! Channels are attempted independently: a failing mail server does not
//! keep the chat message from going out and vice versa. Delivery is at
//! least once; nothing here deduplicates.

pub mod chat;
pub mod discord;
pub mod email;
pub mod message;

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::directory::SettingsStore;
use crate::{AlertEvent, AlertRule, Device};

pub use chat::{ChatClient, ChatProvider};
pub use email::{LettreMailer, MailSettings, Mailer, OutgoingMail};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Required settings of a channel are missing; nothing was sent
    #[error("{0} settings are incomplete")]
    ConfigIncomplete(String),

    #[error("no email recipients specified")]
    NoRecipients,

    #[error("delivery failed: {0}")]
    Transport(String),

    /// The remote service answered with an error status
    #[error("delivery rejected with {status}: {body}")]
    Rejected { status: String, body: String },
}

/// Channels requested for one alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Channels {
    pub email: bool,
    pub chat: bool,
}

impl Channels {
    /// Channels a rule asks for that are also globally switched on through
    /// `email_enabled` and `chat_enabled`.
    pub fn for_rule(rule: &AlertRule, settings: &dyn SettingsStore) -> Self {
        Self {
            email: rule.notify_email && settings.get_bool("email_enabled", false),
            chat: rule.notify_chat && settings.get_bool("chat_enabled", false),
        }
    }

    pub fn any(&self) -> bool {
        self.email || self.chat
    }
}

#[derive(Debug)]
pub enum ChannelOutcome {
    /// The channel was not requested or is switched off
    Skipped,
    Delivered,
    Failed(NotifyError),
}

impl ChannelOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, ChannelOutcome::Delivered)
    }

    fn from_result(result: Result<(), NotifyError>) -> Self {
        match result {
            Ok(()) => ChannelOutcome::Delivered,
            Err(e) => ChannelOutcome::Failed(e),
        }
    }
}

/// Per channel result of one dispatch.
#[derive(Debug)]
pub struct DispatchReport {
    pub email: ChannelOutcome,
    pub chat: ChannelOutcome,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        [&self.email, &self.chat]
            .into_iter()
            .filter(|o| o.is_delivered())
            .count()
    }
}

pub struct Dispatcher {
    settings: Arc<dyn SettingsStore>,
    mailer: Arc<dyn Mailer>,
    chat: ChatClient,
}

impl Dispatcher {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        let chat = ChatClient::from_settings(settings.as_ref());
        Self {
            settings,
            mailer: Arc::new(LettreMailer),
            chat,
        }
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn with_chat_client(mut self, chat: ChatClient) -> Self {
        self.chat = chat;
        self
    }

    pub fn settings(&self) -> &dyn SettingsStore {
        self.settings.as_ref()
    }

    /// Render and deliver `event` on the requested channels.
    #[instrument(skip_all, fields(rule = %rule.name, device = %device.name))]
    pub async fn send(
        &self,
        event: &AlertEvent,
        rule: &AlertRule,
        device: &Device,
        channels: Channels,
    ) -> DispatchReport {
        let text = message::render(rule, device, event);

        let email = if channels.email {
            ChannelOutcome::from_result(self.send_email(rule, &text).await)
        } else {
            ChannelOutcome::Skipped
        };

        let chat = if channels.chat {
            ChannelOutcome::from_result(self.send_chat(rule, device, event, &text).await)
        } else {
            ChannelOutcome::Skipped
        };

        for (channel, outcome) in [("email", &email), ("chat", &chat)] {
            match outcome {
                ChannelOutcome::Delivered => info!("{channel} notification sent"),
                ChannelOutcome::Failed(e) => warn!("{channel} notification failed: {e}"),
                ChannelOutcome::Skipped => {}
            }
        }

        DispatchReport { email, chat }
    }

    async fn send_email(&self, rule: &AlertRule, text: &str) -> Result<(), NotifyError> {
        let settings = MailSettings::from_settings(self.settings.as_ref())?;
        let mail = OutgoingMail {
            to: email::recipients(rule, &settings)?,
            subject: message::subject(rule),
            body: text.to_string(),
        };
        self.mailer.send(&settings, &mail).await
    }

    async fn send_chat(
        &self,
        rule: &AlertRule,
        device: &Device,
        event: &AlertEvent,
        text: &str,
    ) -> Result<(), NotifyError> {
        let provider = ChatProvider::from_settings(self.settings.as_ref())?;
        self.chat.send(&provider, rule, device, event, text).await
    }
}
