use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::models::{LogFormat, LoggingConfig};

/// Initialize logging from the `[logging]` section.
///
/// `RUST_LOG`, when set, overrides the configured level. Installing a second
/// global subscriber is an error.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .wrap_err_with(|| format!("Invalid log level: {}", config.level))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    match config.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init(),
    }
    .wrap_err("Failed to install tracing subscriber")?;

    tracing::info!(
        level = %config.level,
        format = ?config.format,
        "HexSwitch logging initialized"
    );
    Ok(())
}

/// Span wrapping one dispatch into a port
pub fn create_dispatch_span(port: &str, path: &str, trace_id: &str) -> tracing::Span {
    tracing::info_span!(
        "dispatch",
        port = port,
        envelope.path = path,
        trace_id = trace_id,
    )
}

/// Span wrapping one emit through an outbound adapter
pub fn create_emit_span(port: &str, adapter: &str, trace_id: &str) -> tracing::Span {
    tracing::info_span!("emit", port = port, adapter = adapter, trace_id = trace_id)
}

/// Span wrapping an adapter lifecycle call
pub fn create_adapter_span(name: &str, adapter_type: &str, direction: &str) -> tracing::Span {
    tracing::info_span!(
        "adapter",
        adapter.name = name,
        adapter.kind = adapter_type,
        adapter.direction = direction,
    )
}

/// Span for one inbound protocol request
pub fn create_request_span(method: &str, path: &str, trace_id: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = path,
        trace_id = trace_id,
        port = tracing::field::Empty,
        http.status_code = tracing::field::Empty,
    )
}
