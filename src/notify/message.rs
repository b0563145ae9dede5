use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::{AlertEvent, AlertRule, Device};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z]+)\}").expect("valid regex"));

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

pub fn subject(rule: &AlertRule) -> String {
    format!("Device Monitor Alert: {}", rule.name)
}

/// Message body for an alert: the rule's template with placeholders
/// substituted, or the default multi-line summary.
///
/// Supported placeholders: `{rule}`, `{device}`, `{address}`, `{metric}`,
/// `{operator}`, `{threshold}`, `{value}`, `{time}`. Unknown braces are left
/// untouched.
pub fn render(rule: &AlertRule, device: &Device, event: &AlertEvent) -> String {
    match rule.message_template.as_deref().map(str::trim) {
        Some(template) if !template.is_empty() => fill_template(template, rule, device, event),
        _ => default_message(rule, device, event),
    }
}

/// Placeholders are substituted in one pass, so text inserted for one
/// placeholder is never scanned for another.
fn fill_template(template: &str, rule: &AlertRule, device: &Device, event: &AlertEvent) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| match &caps[1] {
            "rule" => rule.name.clone(),
            "device" => device.name.clone(),
            "address" => device.address.clone(),
            "metric" => event.metric.clone(),
            "operator" => event.operator.to_string(),
            "threshold" => event.threshold.to_string(),
            "value" => event.value.to_string(),
            "time" => event.timestamp.format(TIME_FORMAT).to_string(),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

pub fn default_message(rule: &AlertRule, device: &Device, event: &AlertEvent) -> String {
    format!(
        "ALERT: {}\nDevice: {} ({})\nMetric: {}\nCondition: {} {}\nCurrent Value: {}\nTime: {}\n",
        rule.name,
        device.name,
        device.address,
        event.metric,
        event.operator,
        event.threshold,
        event.value,
        event.timestamp.format(TIME_FORMAT)
    )
}
