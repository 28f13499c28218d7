use async_trait::async_trait;
use thiserror::Error;

use crate::core::envelope::Envelope;

/// Errors raised by protocol adapters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AdapterError {
    /// Inbound adapter could not begin accepting work
    #[error("adapter '{adapter}' failed to start: {message}")]
    Start { adapter: String, message: String },

    #[error("adapter '{adapter}' failed to stop: {message}")]
    Stop { adapter: String, message: String },

    /// Outbound adapter could not reach its target
    #[error("adapter '{adapter}' failed to connect: {message}")]
    Connect { adapter: String, message: String },

    #[error("adapter '{adapter}' failed to disconnect: {message}")]
    Disconnect { adapter: String, message: String },

    /// Protocol call made by `deliver` failed
    #[error("adapter '{adapter}' failed to deliver: {message}")]
    Deliver { adapter: String, message: String },

    #[error("adapter '{adapter}' is not connected")]
    NotConnected { adapter: String },

    /// Descriptor settings could not be interpreted by the adapter
    #[error("adapter '{adapter}' has invalid settings: {message}")]
    InvalidSettings { adapter: String, message: String },
}

/// Result type for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Which side of the hexagon an adapter sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterDirection {
    Inbound,
    Outbound,
}

impl AdapterDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterDirection::Inbound => "inbound",
            AdapterDirection::Outbound => "outbound",
        }
    }
}

impl std::fmt::Display for AdapterDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter that accepts protocol traffic and dispatches it into the runtime.
///
/// `start` spawns the adapter's own concurrency unit (task or thread) and
/// returns once it is accepting work. Protocol → [`Envelope`] conversion must
/// extract `trace_id` / `span_id` / `parent_span_id` from the protocol's
/// native carrier when present.
#[async_trait]
pub trait InboundAdapter: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn start(&self) -> AdapterResult<()>;

    /// Ask the adapter to stop accepting new work. Completion is observed
    /// through [`InboundAdapter::is_running`].
    async fn stop(&self) -> AdapterResult<()>;

    fn is_running(&self) -> bool;
}

/// Adapter that performs protocol calls on behalf of `Runtime::emit`.
///
/// `deliver` must inject the envelope's trace fields into the outgoing
/// protocol carrier before sending.
#[async_trait]
pub trait OutboundAdapter: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn connect(&self) -> AdapterResult<()>;

    async fn disconnect(&self) -> AdapterResult<()>;

    fn is_connected(&self) -> bool;

    async fn deliver(&self, envelope: Envelope) -> AdapterResult<Envelope>;
}
