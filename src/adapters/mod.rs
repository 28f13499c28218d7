pub mod http_inbound;
pub mod http_outbound;
pub mod trace_propagation;
pub mod tracing_telemetry;

pub use http_inbound::{HttpInboundAdapter, HttpInboundSettings};
pub use http_outbound::{HttpOutboundAdapter, HttpOutboundSettings};
pub use tracing_telemetry::TracingTelemetry;

use crate::core::factory::AdapterFactory;

/// Register every adapter type shipped with the crate.
pub fn register_builtin(factory: &AdapterFactory) {
    http_inbound::register(factory);
    http_outbound::register(factory);
}
