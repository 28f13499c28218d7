//! Trace context carried in protocol headers.
//!
//! Outgoing traffic carries `x-trace-id`, `x-span-id` and `x-parent-span-id`,
//! plus a W3C `traceparent` when the identifiers have the W3C shape. Incoming
//! traffic is read from the `x-*` headers first and `traceparent` second.
//! Header names are matched case-insensitively.
use std::collections::HashMap;

use crate::ports::telemetry::TraceContext;

pub const TRACE_ID_HEADER: &str = "x-trace-id";
pub const SPAN_ID_HEADER: &str = "x-span-id";
pub const PARENT_SPAN_ID_HEADER: &str = "x-parent-span-id";
pub const TRACEPARENT_HEADER: &str = "traceparent";

fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// Read the remote trace context from request headers.
pub fn extract_trace_context(headers: &HashMap<String, String>) -> Option<TraceContext> {
    if let Some(trace_id) = header(headers, TRACE_ID_HEADER) {
        return Some(TraceContext {
            trace_id: trace_id.to_string(),
            span_id: header(headers, SPAN_ID_HEADER)
                .unwrap_or_default()
                .to_string(),
            parent_span_id: header(headers, PARENT_SPAN_ID_HEADER).map(str::to_string),
        });
    }

    header(headers, TRACEPARENT_HEADER).and_then(parse_traceparent)
}

/// Whether `name` is one of the carrier headers written by [`trace_headers`].
/// Forwarded header sets drop these so the injected context is the only one.
pub fn is_trace_header(name: &str) -> bool {
    [
        TRACE_ID_HEADER,
        SPAN_ID_HEADER,
        PARENT_SPAN_ID_HEADER,
        TRACEPARENT_HEADER,
    ]
    .iter()
    .any(|carrier| name.eq_ignore_ascii_case(carrier))
}

/// Headers announcing `context` to the next hop.
pub fn trace_headers(context: &TraceContext) -> Vec<(&'static str, String)> {
    let mut headers = vec![(TRACE_ID_HEADER, context.trace_id.clone())];
    if !context.span_id.is_empty() {
        headers.push((SPAN_ID_HEADER, context.span_id.clone()));
    }
    if let Some(parent) = &context.parent_span_id {
        headers.push((PARENT_SPAN_ID_HEADER, parent.clone()));
    }
    if let Some(traceparent) = format_traceparent(context) {
        headers.push((TRACEPARENT_HEADER, traceparent));
    }
    headers
}

/// Parse `00-<32 hex trace id>-<16 hex span id>-<2 hex flags>`.
pub fn parse_traceparent(value: &str) -> Option<TraceContext> {
    let mut parts = value.trim().split('-');
    let version = parts.next()?;
    let trace_id = parts.next()?;
    let span_id = parts.next()?;
    let flags = parts.next()?;

    if version.len() != 2 || version == "ff" || !is_hex(version) {
        return None;
    }
    if flags.len() != 2 || !is_hex(flags) {
        return None;
    }
    // Version 00 has exactly four fields
    if version == "00" && parts.next().is_some() {
        return None;
    }
    if !is_valid_id(trace_id, 32) || !is_valid_id(span_id, 16) {
        return None;
    }

    Some(TraceContext {
        trace_id: trace_id.to_ascii_lowercase(),
        span_id: span_id.to_ascii_lowercase(),
        parent_span_id: None,
    })
}

/// `traceparent` value for `context`, when its identifiers fit the W3C format.
pub fn format_traceparent(context: &TraceContext) -> Option<String> {
    if is_valid_id(&context.trace_id, 32) && is_valid_id(&context.span_id, 16) {
        Some(format!(
            "00-{}-{}-01",
            context.trace_id.to_ascii_lowercase(),
            context.span_id.to_ascii_lowercase()
        ))
    } else {
        None
    }
}

fn is_hex(value: &str) -> bool {
    value.bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_valid_id(value: &str, len: usize) -> bool {
    value.len() == len && is_hex(value) && value.bytes().any(|b| b != b'0')
}
