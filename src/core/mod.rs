pub mod envelope;
pub mod factory;
pub mod lifecycle;
pub mod registry;
pub mod routing;
pub mod runtime;

pub use envelope::{Envelope, Payload};
pub use factory::{AdapterFactory, InboundConstructor, OutboundConstructor};
pub use lifecycle::RuntimeState;
pub use registry::PortRegistry;
pub use routing::{RoutingError, RoutingResult, RoutingStrategy};
pub use runtime::{
    AdapterStatus, DEFAULT_SHUTDOWN_GRACE, Runtime, RuntimeBuilder, RuntimeError, RuntimeHandle,
    RuntimeResult,
};
