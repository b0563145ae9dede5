//! Email delivery over SMTP.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, instrument};

use super::NotifyError;
use crate::AlertRule;
use crate::directory::SettingsStore;

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// SMTP settings read from the settings store.
#[derive(Clone)]
pub struct MailSettings {
    pub server: String,
    pub port: u16,
    pub use_tls: bool,
    pub username: String,
    pub password: String,
    pub from: String,
}

impl std::fmt::Debug for MailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailSettings")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .field("username", &self.username)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

impl MailSettings {
    /// `mail_server`, `mail_username`, `mail_password` and `mail_from` are
    /// required; `mail_port` defaults to 587 and `mail_use_tls` to true.
    pub fn from_settings(settings: &dyn SettingsStore) -> Result<Self, NotifyError> {
        let required = |key: &'static str| settings.get(key).filter(|v| !v.trim().is_empty());

        let server = required("mail_server");
        let username = required("mail_username");
        let password = required("mail_password");
        let from = required("mail_from");

        match (server, username, password, from) {
            (Some(server), Some(username), Some(password), Some(from)) => Ok(Self {
                server,
                port: settings
                    .get("mail_port")
                    .and_then(|p| p.trim().parse().ok())
                    .unwrap_or(DEFAULT_SMTP_PORT),
                use_tls: settings.get_bool("mail_use_tls", true),
                username,
                password,
                from,
            }),
            _ => Err(NotifyError::ConfigIncomplete("email".to_string())),
        }
    }
}

/// Recipients of a rule's alerts. The comma separated list on the rule, or
/// the SMTP username when the rule names none.
pub fn recipients(rule: &AlertRule, settings: &MailSettings) -> Result<Vec<String>, NotifyError> {
    let list = rule
        .email_recipients
        .as_deref()
        .filter(|r| !r.trim().is_empty())
        .unwrap_or(&settings.username);

    let recipients: Vec<String> = list
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect();

    if recipients.is_empty() {
        return Err(NotifyError::NoRecipients);
    }
    Ok(recipients)
}

/// A rendered plain text mail.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, settings: &MailSettings, mail: &OutgoingMail) -> Result<(), NotifyError>;
}

/// SMTP delivery through `lettre`.
#[derive(Debug, Clone, Default)]
pub struct LettreMailer;

impl LettreMailer {
    fn build_message(settings: &MailSettings, mail: &OutgoingMail) -> Result<Message, NotifyError> {
        let address = |value: &str| -> Result<Mailbox, NotifyError> {
            value
                .parse()
                .map_err(|e| NotifyError::Transport(format!("invalid address {value}: {e}")))
        };

        let mut builder = Message::builder()
            .from(address(&settings.from)?)
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_PLAIN);
        for recipient in &mail.to {
            builder = builder.to(address(recipient)?);
        }

        builder
            .body(mail.body.clone())
            .map_err(|e| NotifyError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Mailer for LettreMailer {
    #[instrument(skip_all, fields(server = %settings.server, recipients = mail.to.len()))]
    async fn send(&self, settings: &MailSettings, mail: &OutgoingMail) -> Result<(), NotifyError> {
        let message = Self::build_message(settings, mail)?;

        let builder = if settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.server)
                .map_err(|e| NotifyError::Transport(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.server)
        };

        let transport = builder
            .port(settings.port)
            .credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
            .build();

        let response = transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if !response.is_positive() {
            return Err(NotifyError::Rejected {
                status: response.code().to_string(),
                body: response.message().collect::<Vec<_>>().join(" "),
            });
        }

        debug!("alert mail accepted by {}", settings.server);
        Ok(())
    }
}
