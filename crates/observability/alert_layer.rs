use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
    span,
};
use tracing_subscriber::{Layer, layer::Context, registry::LookupSpan};

use super::{
    alert_queue::{ALERT_INTERNAL_TARGET, AlertEvent, AlertQueue},
    config::ServiceContext,
};

const REDACTED: &str = "[REDACTED]";
const SENSITIVE_MARKERS: [&str; 7] = [
    "secret",
    "token",
    "signature",
    "authorization",
    "webhook",
    "password",
    "email",
];

/// Forwards events at or above `min_level` to the alert queue.
#[derive(Clone)]
pub(crate) struct AlertLayer {
    queue: AlertQueue,
    service_context: ServiceContext,
    min_level: Level,
}

impl AlertLayer {
    pub(crate) fn new(queue: AlertQueue, service_context: ServiceContext, min_level: Level) -> Self {
        Self {
            queue,
            service_context,
            min_level,
        }
    }
}

#[derive(Default)]
struct RedactingVisitor {
    values: BTreeMap<String, String>,
}

impl RedactingVisitor {
    fn insert(&mut self, field: &Field, value: String) {
        let name = field.name();
        let value = if is_sensitive(name) {
            REDACTED.to_string()
        } else {
            value
        };
        self.values.insert(name.to_string(), value);
    }
}

impl Visit for RedactingVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }
}

struct SpanFields(BTreeMap<String, String>);

impl<S> Layer<S> for AlertLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = RedactingVisitor::default();
        attrs.record(&mut visitor);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanFields(visitor.values));
        }
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = RedactingVisitor::default();
        values.record(&mut visitor);

        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<SpanFields>() {
            Some(fields) => fields.0.extend(visitor.values),
            None => extensions.insert(SpanFields(visitor.values)),
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.min_level || metadata.target() == ALERT_INTERNAL_TARGET {
            return;
        }

        let mut visitor = RedactingVisitor::default();
        event.record(&mut visitor);
        let message = visitor.values.remove("message");

        // Outer spans first so inner values win on name clashes.
        let mut span_fields = BTreeMap::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(fields) = span.extensions().get::<SpanFields>() {
                    span_fields.extend(fields.0.clone());
                }
            }
        }

        self.queue.push(AlertEvent {
            level: *metadata.level(),
            timestamp: Utc::now(),
            service_name: self.service_context.service_name.clone(),
            environment: self.service_context.environment.clone(),
            component: self.service_context.component.clone(),
            target: metadata.target().to_string(),
            location: metadata
                .file()
                .zip(metadata.line())
                .map(|(file, line)| format!("{file}:{line}")),
            message,
            fields: visitor.values,
            span_fields,
        });
    }
}

fn is_sensitive(field_name: &str) -> bool {
    let name = field_name.to_ascii_lowercase();
    SENSITIVE_MARKERS.iter().any(|marker| name.contains(marker))
}
