//! Canonical protocol-agnostic message.
//!
//! Every inbound request and outbound call crosses the core as an [`Envelope`].
//! The type is plain data: adapters build it from wire traffic, handlers read
//! it and return new ones, and the runtime stamps trace fields on it. Nothing
//! here performs I/O or opens spans.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ports::telemetry::TraceContext;

/// JSON object used for bodies, data payloads, parameters and metadata.
pub type Payload = Map<String, Value>;

fn default_status_code() -> u16 {
    200
}

/// The message passed across every boundary of the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Routing / diagnostic identifier, usually the request path
    pub path: String,
    /// Protocol verb (e.g. `GET`), if the protocol has one
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub path_params: Payload,
    #[serde(default)]
    pub query_params: Payload,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Parsed inbound payload
    #[serde(default)]
    pub body: Option<Payload>,
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    /// Success payload
    #[serde(default)]
    pub data: Option<Payload>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Adapter-private extras
    #[serde(default)]
    pub metadata: Payload,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,
    #[serde(default)]
    pub parent_span_id: Option<String>,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            path: String::new(),
            method: None,
            path_params: Payload::new(),
            query_params: Payload::new(),
            headers: HashMap::new(),
            body: None,
            status_code: default_status_code(),
            data: None,
            error_message: None,
            metadata: Payload::new(),
            trace_id: None,
            span_id: None,
            parent_span_id: None,
        }
    }
}

impl Envelope {
    /// Create an envelope addressed to `path` with every other field defaulted.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Successful response carrying `data` (status 200).
    pub fn success(data: Payload) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// Error response with the given status code and message.
    pub fn error(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_body(mut self, body: Payload) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Copy the trace identifiers of `context` onto this envelope.
    pub fn with_trace_context(mut self, context: Option<TraceContext>) -> Self {
        self.set_trace_context(context.as_ref());
        self
    }

    /// Overwrite (or clear) the trace identifiers in place.
    pub fn set_trace_context(&mut self, context: Option<&TraceContext>) {
        match context {
            Some(ctx) => {
                self.trace_id = Some(ctx.trace_id.clone());
                self.span_id = (!ctx.span_id.is_empty()).then(|| ctx.span_id.clone());
                self.parent_span_id = ctx.parent_span_id.clone();
            }
            None => {
                self.trace_id = None;
                self.span_id = None;
                self.parent_span_id = None;
            }
        }
    }

    /// Trace context carried by this envelope, if it has a trace id.
    pub fn trace_context(&self) -> Option<TraceContext> {
        let trace_id = self.trace_id.as_ref().filter(|id| !id.is_empty())?;
        Some(TraceContext {
            trace_id: trace_id.clone(),
            span_id: self.span_id.clone().unwrap_or_default(),
            parent_span_id: self.parent_span_id.clone(),
        })
    }

    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status_code) && self.error_message.is_none()
    }

    pub fn is_error(&self) -> bool {
        !self.is_success()
    }
}
