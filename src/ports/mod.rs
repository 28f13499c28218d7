pub mod adapter;
pub mod handler;
pub mod telemetry;

pub use adapter::{AdapterDirection, AdapterError, AdapterResult, InboundAdapter, OutboundAdapter};
pub use handler::{Handler, HandlerError, HandlerResult, handler_fn};
pub use telemetry::{NoopTelemetry, SpanHandle, SpanStatus, Telemetry, TraceContext};
