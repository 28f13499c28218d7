//! HexSwitch - a protocol-agnostic message routing runtime.
//!
//! HexSwitch implements a **hexagonal architecture**: protocol adapters at
//! the edges convert wire traffic into a canonical [`Envelope`], the core
//! routes envelopes through named ports to business handlers, and handlers
//! reach external systems back through outbound adapters bound to ports.
//! The core never sees a protocol.
//!
//! # Building blocks
//! - [`Envelope`]: the message crossing every boundary
//! - [`PortRegistry`]: named ports, each with ordered handlers and a [`RoutingStrategy`]
//!   (`first`, `broadcast`, `round_robin`)
//! - [`Runtime`]: starts adapters from an [`ExecutionPlan`], rolls back on failure,
//!   drains on shutdown, and exposes `dispatch` / `emit`
//! - [`AdapterFactory`]: adapter-type name to constructor, filled by adapter modules
//! - [`ports`]: the traits adapters, handlers and telemetry backends implement
//!
//! # Quick Example
//! ```no_run
//! use hexswitch::{Envelope, ExecutionPlan, Runtime, ports::handler::handler_fn};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let runtime = Runtime::builder(ExecutionPlan::new()).build();
//! runtime.registry().register_handler(
//!     "echo",
//!     handler_fn("echo", |envelope: Envelope| async move {
//!         Ok(Some(Envelope::success(envelope.body.unwrap_or_default())))
//!     }),
//! );
//!
//! runtime.start().await?;
//! let results = runtime.dispatch("echo", Envelope::new("/echo")).await?;
//! assert_eq!(results.len(), 1);
//! runtime.shutdown().await?;
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Library APIs return typed `thiserror` errors ([`RuntimeError`],
//! [`RoutingError`], [`AdapterError`]). The binary and the config loader use
//! `eyre::Result` with context attached.
//!
//! # Observability
//! Logs go through `tracing`; see [`tracing_setup`]. Spans and metrics are
//! recorded through the [`Telemetry`] port, by default
//! [`TracingTelemetry`], which forwards metrics to the `metrics` facade.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::TracingTelemetry,
    config::{ExecutionPlan, HexSwitchConfig},
    core::{
        AdapterFactory, AdapterStatus, Envelope, Payload, PortRegistry, RoutingError,
        RoutingStrategy, Runtime, RuntimeBuilder, RuntimeError, RuntimeHandle, RuntimeState,
    },
    ports::{
        AdapterError, Handler, HandlerError, InboundAdapter, OutboundAdapter, Telemetry,
        TraceContext,
    },
    utils::GracefulShutdown,
};
