//! Runtime metric names and helpers.
//!
//! The runtime never talks to a metrics backend directly: it records through
//! the [`Telemetry`] collaborator, and [`crate::adapters::TracingTelemetry`]
//! forwards to the `metrics` crate macros. Any compatible recorder installed
//! by the application receives the values.
//!
//! Provided metrics (labels vary by family):
//! * `runtime_adapter_starts_total` (counter: adapter, type, direction, outcome)
//! * `runtime_adapter_start_duration_seconds` (histogram: adapter, type, direction)
//! * `runtime_adapter_stops_total` (counter: adapter, type, direction, outcome)
//! * `runtime_dispatch_total` (counter: port, outcome)
//! * `runtime_dispatch_duration_seconds` (histogram: port)
//! * `runtime_emit_total` (counter: port, outcome)
//! * `runtime_emit_duration_seconds` (histogram: port)
//! * `runtime_running_adapters` (gauge)
//! * `runtime_state` (gauge, see `RuntimeState::gauge_value`)
use std::{sync::Arc, time::Instant};

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::Lazy;

use crate::ports::telemetry::Telemetry;

pub const RUNTIME_ADAPTER_STARTS_TOTAL: &str = "runtime_adapter_starts_total";
pub const RUNTIME_ADAPTER_START_DURATION_SECONDS: &str = "runtime_adapter_start_duration_seconds";
pub const RUNTIME_ADAPTER_STOPS_TOTAL: &str = "runtime_adapter_stops_total";
pub const RUNTIME_DISPATCH_TOTAL: &str = "runtime_dispatch_total";
pub const RUNTIME_DISPATCH_DURATION_SECONDS: &str = "runtime_dispatch_duration_seconds";
pub const RUNTIME_EMIT_TOTAL: &str = "runtime_emit_total";
pub const RUNTIME_EMIT_DURATION_SECONDS: &str = "runtime_emit_duration_seconds";
pub const RUNTIME_RUNNING_ADAPTERS: &str = "runtime_running_adapters";
pub const RUNTIME_STATE: &str = "runtime_state";

// Forcing this registers every description exactly once
static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        RUNTIME_ADAPTER_STARTS_TOTAL,
        Unit::Count,
        "Adapter start/connect attempts, labelled by outcome."
    );
    describe_histogram!(
        RUNTIME_ADAPTER_START_DURATION_SECONDS,
        Unit::Seconds,
        "Time taken by adapter start/connect."
    );
    describe_counter!(
        RUNTIME_ADAPTER_STOPS_TOTAL,
        Unit::Count,
        "Adapter stop/disconnect attempts, labelled by outcome."
    );
    describe_counter!(
        RUNTIME_DISPATCH_TOTAL,
        Unit::Count,
        "Envelopes dispatched into ports."
    );
    describe_histogram!(
        RUNTIME_DISPATCH_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of port dispatch including handler execution."
    );
    describe_counter!(
        RUNTIME_EMIT_TOTAL,
        Unit::Count,
        "Envelopes emitted through outbound adapters."
    );
    describe_histogram!(
        RUNTIME_EMIT_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of outbound delivery."
    );
    describe_gauge!(
        RUNTIME_RUNNING_ADAPTERS,
        "Number of adapters currently started or connected."
    );
    describe_gauge!(RUNTIME_STATE, "Current runtime lifecycle state.");
});

/// Register metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    tracing::info!("Initializing HexSwitch metrics descriptions");
    Lazy::force(&DESCRIPTIONS);
    Ok(())
}

/// RAII helper recording a stage duration histogram through telemetry.
pub struct StageTimer {
    start: Instant,
    telemetry: Arc<dyn Telemetry>,
    metric: &'static str,
    labels: Vec<(&'static str, String)>,
}

impl StageTimer {
    pub fn new(
        telemetry: Arc<dyn Telemetry>,
        metric: &'static str,
        labels: Vec<(&'static str, String)>,
    ) -> Self {
        Self {
            start: Instant::now(),
            telemetry,
            metric,
            labels,
        }
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        self.telemetry.record_histogram(
            self.metric,
            &self.labels,
            self.start.elapsed().as_secs_f64(),
        );
    }
}
