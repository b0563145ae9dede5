//! Discord webhook payloads.

use serde::Serialize;

use crate::{AlertEvent, AlertRule, Device};

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl EmbedField {
    fn new(name: &str, value: impl ToString, inline: bool) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            inline,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

/// Red
const ALERT_COLOR: u32 = 15158332;

/// Webhook message for an alert: the rendered text as content plus an
/// embed with the breach details.
pub fn alert_message(rule: &AlertRule, device: &Device, event: &AlertEvent, text: &str) -> Message {
    let embed = Embed {
        title: Some(format!("🚨 {}", rule.name)),
        description: Some(format!(
            "Device **{}** breached `{} {} {}`",
            device.name, event.metric, event.operator, event.threshold
        )),
        color: Some(ALERT_COLOR),
        fields: vec![
            EmbedField::new("📟 Device", device.display(), true),
            EmbedField::new("📈 Current Value", event.value, true),
            EmbedField::new("⚠️ Threshold", format!("{} {}", event.operator, event.threshold), true),
            EmbedField::new("📊 Status", progress_bar(event.value, event.threshold), false),
        ],
        footer: Some(EmbedFooter {
            text: format!("Rule #{} | {}", rule.id, device.address),
        }),
        timestamp: Some(event.timestamp.to_rfc3339()),
    };

    MessageBuilder::new().content(text).add_embed(embed).build()
}

fn progress_bar(current: f64, limit: f64) -> String {
    if limit <= 0.0 {
        return format!("`{current}`");
    }

    let ratio = current / limit;
    let filled = ((ratio * 10.0).max(0.0) as usize).min(10);
    let bar = "█".repeat(filled) + &"░".repeat(10 - filled);
    let status_emoji = if ratio >= 1.0 {
        "🔴"
    } else if ratio >= 0.8 {
        "🟠"
    } else if ratio >= 0.6 {
        "🟡"
    } else {
        "🟢"
    };

    format!("{} `{}` {:.1}% of threshold", status_emoji, bar, ratio * 100.0)
}
