use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;
use serde_json::json;
use url::Url;

use super::alert_queue::{AlertEvent, AlertSink};

const DISCORD_CONTENT_LIMIT: usize = 2000;

/// Fields placed first in an alert so an operator can find the delivery quickly.
const CORRELATION_FIELDS: [&str; 4] = ["event_id", "event_type", "order_id", "step"];

pub(crate) struct DiscordAlertSink {
    webhook_url: Url,
    client: Client,
}

impl DiscordAlertSink {
    pub(crate) fn new(webhook_url: Url) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(3)).build()?;

        Ok(Self {
            webhook_url,
            client,
        })
    }
}

pub(crate) fn render(alert: &AlertEvent) -> String {
    let mut lines = vec![format!(
        "**{}** `{}` `{}` `{}`",
        alert.service_name,
        alert.environment,
        alert.component,
        alert.level.as_str()
    )];

    lines.push(format!(
        "`{}` `{}`{}",
        alert.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        alert.target,
        alert
            .location
            .as_ref()
            .map(|location| format!(" `{location}`"))
            .unwrap_or_default()
    ));

    if let Some(message) = alert.message.as_deref().filter(|m| !m.trim().is_empty()) {
        lines.push(format!("> {}", message.trim()));
    }

    let field = |name: &str| {
        alert
            .fields
            .get(name)
            .or_else(|| alert.span_fields.get(name))
    };
    let correlation: Vec<String> = CORRELATION_FIELDS
        .iter()
        .filter_map(|&name| field(name).map(|value| format!("{name}=`{value}`")))
        .collect();
    if !correlation.is_empty() {
        lines.push(correlation.join(" "));
    }

    let rest: Vec<String> = alert
        .fields
        .iter()
        .chain(alert.span_fields.iter())
        .filter(|(name, _)| !CORRELATION_FIELDS.contains(&name.as_str()))
        .map(|(name, value)| format!("- `{name}` = `{value}`"))
        .collect();
    lines.extend(rest);

    truncate(lines.join("\n"))
}

fn truncate(content: String) -> String {
    const SUFFIX: &str = "\n(truncated)";

    if content.chars().count() <= DISCORD_CONTENT_LIMIT {
        return content;
    }

    let keep = DISCORD_CONTENT_LIMIT - SUFFIX.chars().count();
    let mut truncated: String = content.chars().take(keep).collect();
    truncated.push_str(SUFFIX);
    truncated
}

#[async_trait]
impl AlertSink for DiscordAlertSink {
    async fn deliver(&self, alert: &AlertEvent) -> Result<()> {
        let response = self
            .client
            .post(self.webhook_url.clone())
            .json(&json!({ "content": render(alert) }))
            .send()
            .await
            // reqwest errors embed the URL, which carries the webhook token.
            .map_err(|err| {
                if err.is_timeout() {
                    anyhow!("discord webhook request timed out")
                } else {
                    anyhow!("discord webhook request failed")
                }
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(anyhow!("discord webhook returned {}", response.status()))
        }
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}
