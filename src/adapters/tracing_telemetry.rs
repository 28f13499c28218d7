use std::time::Duration;

use metrics::{Label, counter, gauge, histogram};

use crate::ports::telemetry::{
    ActiveSpan, Labels, SpanHandle, SpanStatus, Telemetry, TraceContext,
};

/// Telemetry backed by `tracing` for spans and the `metrics` facade for
/// counters, gauges and histograms.
///
/// Spans are logged when they finish, with trace identifiers and duration as
/// structured fields, so any `tracing-subscriber` layer (JSON logs, OTLP
/// bridge) can pick them up.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TracingTelemetry {
    pub fn new() -> Self {
        Self
    }
}

struct TracingSpan {
    span: tracing::Span,
    name: String,
    context: TraceContext,
    tags: Vec<(String, String)>,
}

impl ActiveSpan for TracingSpan {
    fn set_tag(&mut self, key: &str, value: String) {
        self.tags.push((key.to_string(), value));
    }

    fn end(self: Box<Self>, status: SpanStatus, elapsed: Duration) {
        let _entered = self.span.enter();
        let duration_ms = elapsed.as_secs_f64() * 1000.0;
        match status {
            SpanStatus::Ok => tracing::debug!(
                span = %self.name,
                trace_id = %self.context.trace_id,
                span_id = %self.context.span_id,
                parent_span_id = ?self.context.parent_span_id,
                duration_ms,
                tags = ?self.tags,
                "span finished"
            ),
            SpanStatus::Error(message) => tracing::warn!(
                span = %self.name,
                trace_id = %self.context.trace_id,
                span_id = %self.context.span_id,
                parent_span_id = ?self.context.parent_span_id,
                duration_ms,
                tags = ?self.tags,
                error = %message,
                "span finished with error"
            ),
        }
    }
}

fn to_labels(labels: Labels<'_>) -> Vec<Label> {
    labels
        .iter()
        .map(|(key, value)| Label::new(*key, value.clone()))
        .collect()
}

impl Telemetry for TracingTelemetry {
    fn start_span(
        &self,
        name: &str,
        parent: Option<&TraceContext>,
        tags: &[(&str, String)],
    ) -> SpanHandle {
        let context = TraceContext::child_of(parent);
        let span = tracing::debug_span!(
            "telemetry",
            otel.name = name,
            trace_id = %context.trace_id,
            span_id = %context.span_id,
        );
        let inner = TracingSpan {
            span,
            name: name.to_string(),
            context: context.clone(),
            tags: tags
                .iter()
                .map(|(key, value)| ((*key).to_string(), value.clone()))
                .collect(),
        };
        SpanHandle::new(name, context, Box::new(inner))
    }

    fn increment_counter(&self, name: &'static str, labels: Labels<'_>, value: u64) {
        counter!(name, to_labels(labels)).increment(value);
    }

    fn set_gauge(&self, name: &'static str, labels: Labels<'_>, value: f64) {
        gauge!(name, to_labels(labels)).set(value);
    }

    fn record_histogram(&self, name: &'static str, labels: Labels<'_>, value: f64) {
        histogram!(name, to_labels(labels)).record(value);
    }
}
