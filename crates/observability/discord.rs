use super::notifier::{AlertEvent, AlertSink};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use url::Url;

const DISCORD_CONTENT_LIMIT: usize = 2000;
const DISCORD_TIMEOUT: Duration = Duration::from_secs(3);

pub(crate) struct DiscordAlertSink {
    webhook_url: Url,
    client: Client,
}

impl DiscordAlertSink {
    pub(crate) fn new(webhook_url: Url) -> Result<Self> {
        let client = Client::builder().timeout(DISCORD_TIMEOUT).build()?;
        Ok(Self {
            webhook_url,
            client,
        })
    }
}

pub(crate) fn format_content(event: &AlertEvent) -> String {
    let mut lines = vec![format!(
        "**{}** `{}` `{}` `{}`{}",
        event.service_name,
        event.environment,
        event.component,
        event.level.as_str(),
        if event.operator_attention {
            " :rotating_light: operator attention"
        } else {
            ""
        }
    )];

    lines.push(format!(
        "`{}` `{}`{}",
        event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        event.target,
        event
            .location
            .as_ref()
            .map(|location| format!(" `{location}`"))
            .unwrap_or_default()
    ));

    if let Some(message) = event.message.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        lines.push(format!("> {message}"));
    }

    if !event.fields.is_empty() {
        lines.push("fields:".to_string());
        lines.extend(event.fields.iter().map(|(k, v)| format!("- `{k}` = `{v}`")));
    }

    for span in event.spans.iter().filter(|span| !span.fields.is_empty()) {
        lines.push(format!("span `{}`:", span.name));
        lines.extend(span.fields.iter().map(|(k, v)| format!("- `{k}` = `{v}`")));
    }

    truncate(lines.join("\n"), DISCORD_CONTENT_LIMIT)
}

#[async_trait]
impl AlertSink for DiscordAlertSink {
    async fn send(&self, event: &AlertEvent) -> Result<()> {
        let response = self
            .client
            .post(self.webhook_url.clone())
            .json(&json!({ "content": format_content(event) }))
            .send()
            .await
            .map_err(sanitize_reqwest_error)?;

        if response.status().is_success() {
            return Ok(());
        }

        Err(anyhow!(
            "discord webhook returned non-success status: {}",
            response.status()
        ))
    }

    fn sink_name(&self) -> &'static str {
        "discord"
    }
}

/// reqwest errors embed the request URL, which carries the webhook token.
fn sanitize_reqwest_error(error: reqwest::Error) -> anyhow::Error {
    if error.is_timeout() {
        anyhow!("discord webhook request timed out")
    } else if error.is_connect() {
        anyhow!("discord webhook connection failed")
    } else {
        anyhow!("discord webhook request failed")
    }
}

fn truncate(content: String, limit: usize) -> String {
    const SUFFIX: &str = "\n(truncated)";

    if content.chars().count() <= limit {
        return content;
    }

    let allowed = limit.saturating_sub(SUFFIX.chars().count());
    let mut truncated: String = content.chars().take(allowed).collect();
    truncated.push_str(SUFFIX);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tracing::Level;

    fn event(message: &str) -> AlertEvent {
        AlertEvent {
            level: Level::WARN,
            operator_attention: true,
            timestamp: Utc::now(),
            service_name: "entitlements".to_string(),
            environment: "production".to_string(),
            component: "backend".to_string(),
            target: "backend::usecases::webhook_reconciler".to_string(),
            location: Some("webhook_reconciler.rs:10".to_string()),
            message: Some(message.to_string()),
            fields: BTreeMap::from([("correlation_id".to_string(), "sub_1".to_string())]),
            spans: Vec::new(),
        }
    }

    #[test]
    fn content_flags_operator_attention() {
        let content = format_content(&event("invoice payment failed"));
        assert!(content.contains("operator attention"));
        assert!(content.contains("> invoice payment failed"));
        assert!(content.contains("`correlation_id` = `sub_1`"));
    }

    #[test]
    fn long_content_is_truncated_to_limit() {
        let content = format_content(&event(&"x".repeat(5000)));
        assert!(content.chars().count() <= DISCORD_CONTENT_LIMIT);
        assert!(content.ends_with("(truncated)"));
    }
}
