use std::time::{Duration, Instant};

use uuid::Uuid;

/// Trace identifiers carried across protocol boundaries.
///
/// `span_id` may be empty when an upstream system only supplied a trace id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
}

impl TraceContext {
    /// Start a new trace with a fresh root span.
    pub fn new_root() -> Self {
        Self {
            trace_id: new_trace_id(),
            span_id: new_span_id(),
            parent_span_id: None,
        }
    }

    /// A new span in the same trace whose parent is this span.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
            parent_span_id: (!self.span_id.is_empty()).then(|| self.span_id.clone()),
        }
    }

    /// Child of `parent` when present, otherwise a new root.
    pub fn child_of(parent: Option<&TraceContext>) -> Self {
        parent.map_or_else(Self::new_root, Self::child)
    }
}

/// 32 lowercase hex characters.
pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// 16 lowercase hex characters.
pub fn new_span_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

/// Outcome recorded when a span is finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanStatus {
    Ok,
    Error(String),
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Ok => "ok",
            SpanStatus::Error(_) => "error",
        }
    }
}

/// Backend-specific half of an open span.
pub trait ActiveSpan: Send {
    fn set_tag(&mut self, key: &str, value: String);

    fn end(self: Box<Self>, status: SpanStatus, elapsed: Duration);
}

/// An open span returned by [`Telemetry::start_span`].
pub struct SpanHandle {
    name: String,
    context: TraceContext,
    started_at: Instant,
    inner: Box<dyn ActiveSpan>,
}

impl SpanHandle {
    pub fn new(name: impl Into<String>, context: TraceContext, inner: Box<dyn ActiveSpan>) -> Self {
        Self {
            name: name.into(),
            context,
            started_at: Instant::now(),
            inner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Trace context of this span, to be stamped on envelopes passed downstream.
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    pub fn set_tag(&mut self, key: &str, value: impl Into<String>) {
        self.inner.set_tag(key, value.into());
    }

    /// Close the span and return how long it was open.
    pub fn finish(self, status: SpanStatus) -> Duration {
        let elapsed = self.started_at.elapsed();
        self.inner.end(status, elapsed);
        elapsed
    }
}

impl std::fmt::Debug for SpanHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanHandle")
            .field("name", &self.name)
            .field("context", &self.context)
            .finish()
    }
}

/// Metric label list: static keys with owned values.
pub type Labels<'a> = &'a [(&'static str, String)];

/// Telemetry collaborator invoked by the runtime around adapter lifecycle,
/// dispatch and emit. Exporters live behind implementations of this trait.
pub trait Telemetry: Send + Sync + 'static {
    /// Open a span. The returned context is a child of `parent`, or a new
    /// root when there is no parent.
    fn start_span(
        &self,
        name: &str,
        parent: Option<&TraceContext>,
        tags: &[(&str, String)],
    ) -> SpanHandle;

    fn increment_counter(&self, name: &'static str, labels: Labels<'_>, value: u64);

    fn set_gauge(&self, name: &'static str, labels: Labels<'_>, value: f64);

    fn record_histogram(&self, name: &'static str, labels: Labels<'_>, value: f64);
}

struct NoopSpan;

impl ActiveSpan for NoopSpan {
    fn set_tag(&mut self, _key: &str, _value: String) {}

    fn end(self: Box<Self>, _status: SpanStatus, _elapsed: Duration) {}
}

/// Telemetry that keeps trace continuity but records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn start_span(
        &self,
        name: &str,
        parent: Option<&TraceContext>,
        _tags: &[(&str, String)],
    ) -> SpanHandle {
        SpanHandle::new(name, TraceContext::child_of(parent), Box::new(NoopSpan))
    }

    fn increment_counter(&self, _name: &'static str, _labels: Labels<'_>, _value: u64) {}

    fn set_gauge(&self, _name: &'static str, _labels: Labels<'_>, _value: f64) {}

    fn record_histogram(&self, _name: &'static str, _labels: Labels<'_>, _value: f64) {}
}
