use super::config::ServiceContext;
use super::notifier::{AlertDispatcher, AlertEvent, SpanSummary};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

/// Field that escalates an event to the operator regardless of its level.
pub const OPERATOR_ATTENTION_FIELD: &str = "operator_attention";

const REDACTED: &str = "[REDACTED]";
const SENSITIVE_MARKERS: [&str; 6] = [
    "webhook",
    "secret",
    "password",
    "token",
    "authorization",
    "signature",
];

#[derive(Clone)]
pub(crate) struct AlertLayer {
    dispatcher: AlertDispatcher,
    service_context: ServiceContext,
    min_level: Level,
}

impl AlertLayer {
    pub(crate) fn new(
        dispatcher: AlertDispatcher,
        service_context: ServiceContext,
        min_level: Level,
    ) -> Self {
        Self {
            dispatcher,
            service_context,
            min_level,
        }
    }
}

/// `tracing` orders levels by verbosity, so "at least as severe" is `<=`.
pub(crate) fn should_alert(level: Level, min_level: Level, operator_attention: bool) -> bool {
    operator_attention || level <= min_level
}

#[derive(Default)]
struct FieldCollector {
    values: BTreeMap<String, String>,
    operator_attention: bool,
}

impl FieldCollector {
    fn insert(&mut self, field: &Field, value: String) {
        self.values
            .insert(field.name().to_string(), redact(field.name(), value));
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == OPERATOR_ATTENTION_FIELD {
            self.operator_attention = value;
        }
        self.insert(field, value.to_string());
    }
}

#[derive(Default)]
struct SpanFields {
    values: BTreeMap<String, String>,
}

impl<S> Layer<S> for AlertLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: Context<'_, S>,
    ) {
        let mut collector = FieldCollector::default();
        attrs.record(&mut collector);
        if collector.values.is_empty() {
            return;
        }

        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanFields {
                values: collector.values,
            });
        }
    }

    fn on_record(
        &self,
        id: &tracing::span::Id,
        values: &tracing::span::Record<'_>,
        ctx: Context<'_, S>,
    ) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        let mut collector = FieldCollector::default();
        values.record(&mut collector);
        if collector.values.is_empty() {
            return;
        }

        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<SpanFields>() {
            Some(existing) => existing.values.extend(collector.values),
            None => extensions.insert(SpanFields {
                values: collector.values,
            }),
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();

        let mut collector = FieldCollector::default();
        event.record(&mut collector);
        if !should_alert(level, self.min_level, collector.operator_attention) {
            return;
        }

        let message = collector
            .values
            .remove("message")
            .map(|raw| unquote_debug_string(&raw));

        let spans = ctx
            .event_span(event)
            .map(|span| {
                span.scope()
                    .from_root()
                    .map(|s| SpanSummary {
                        name: s.metadata().name().to_string(),
                        fields: s
                            .extensions()
                            .get::<SpanFields>()
                            .map(|fields| fields.values.clone())
                            .unwrap_or_default(),
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let location = match (metadata.file(), metadata.line()) {
            (Some(file), Some(line)) => Some(format!("{file}:{line}")),
            _ => None,
        };

        self.dispatcher.dispatch(AlertEvent {
            level,
            operator_attention: collector.operator_attention,
            timestamp: Utc::now(),
            service_name: self.service_context.service_name.clone(),
            environment: self.service_context.environment.clone(),
            component: self.service_context.component.clone(),
            target: metadata.target().to_string(),
            location,
            message,
            fields: collector.values,
            spans,
        });
    }
}

fn unquote_debug_string(input: &str) -> String {
    let trimmed = input.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(trimmed)
        .to_string()
}

fn redact(field_name: &str, value: String) -> String {
    let field = field_name.to_ascii_lowercase();
    if SENSITIVE_MARKERS.iter().any(|marker| field.contains(marker)) {
        return REDACTED.to_string();
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_at_or_above_min_level() {
        assert!(should_alert(Level::ERROR, Level::ERROR, false));
        assert!(should_alert(Level::ERROR, Level::WARN, false));
        assert!(!should_alert(Level::WARN, Level::ERROR, false));
        assert!(!should_alert(Level::INFO, Level::WARN, false));
    }

    #[test]
    fn operator_attention_overrides_level() {
        assert!(should_alert(Level::WARN, Level::ERROR, true));
        assert!(should_alert(Level::INFO, Level::ERROR, true));
    }

    #[test]
    fn redacts_secret_looking_fields() {
        assert_eq!(redact("stripe_signature", "t=1,v1=abc".to_string()), REDACTED);
        assert_eq!(redact("JWT_TOKEN", "abc".to_string()), REDACTED);
        assert_eq!(redact("user_id", "42".to_string()), "42");
    }

    #[test]
    fn unquotes_debug_strings() {
        assert_eq!(unquote_debug_string("\"hello\""), "hello");
        assert_eq!(unquote_debug_string("plain"), "plain");
        assert_eq!(unquote_debug_string("\""), "\"");
    }
}
