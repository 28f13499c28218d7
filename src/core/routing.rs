use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Instrument;

use crate::{core::envelope::Envelope, ports::handler::Handler};

/// Errors returned by routing calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RoutingError {
    /// Nothing was ever registered under this port name
    #[error("port '{0}' is not registered")]
    PortNotFound(String),

    /// The port exists but has zero handlers
    #[error("port '{0}' has no registered handlers")]
    NoHandler(String),
}

/// Result type for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;

/// Selects which handler(s) of a port run for one route call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Invoke the first registered handler
    #[default]
    First,
    /// Invoke every handler in registration order
    Broadcast,
    /// Rotate through handlers using the port's cursor
    RoundRobin,
}

impl RoutingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingStrategy::First => "first",
            RoutingStrategy::Broadcast => "broadcast",
            RoutingStrategy::RoundRobin => "round_robin",
        }
    }

    /// Run the strategy over a port snapshot.
    ///
    /// Handler failures never surface as `Err`: each failing slot holds a
    /// 500 error envelope instead.
    pub async fn execute(
        &self,
        port: &PortSnapshot,
        envelope: Envelope,
    ) -> RoutingResult<Vec<Envelope>> {
        if port.handlers.is_empty() {
            return Err(RoutingError::NoHandler(port.name.clone()));
        }

        match self {
            RoutingStrategy::First => {
                let handler = &port.handlers[0];
                Ok(invoke_isolated(&port.name, handler, envelope)
                    .await
                    .into_iter()
                    .collect())
            }
            RoutingStrategy::Broadcast => {
                let mut results = Vec::with_capacity(port.handlers.len());
                for handler in &port.handlers {
                    if let Some(result) =
                        invoke_isolated(&port.name, handler, envelope.clone()).await
                    {
                        results.push(result);
                    }
                }
                Ok(results)
            }
            RoutingStrategy::RoundRobin => {
                let handler = &port.handlers[port.next_index()];
                Ok(invoke_isolated(&port.name, handler, envelope)
                    .await
                    .into_iter()
                    .collect())
            }
        }
    }
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handlers, strategy and cursor of a port captured under the registry lock.
#[derive(Clone)]
pub struct PortSnapshot {
    pub name: String,
    pub handlers: Vec<Arc<dyn Handler>>,
    pub strategy: RoutingStrategy,
    pub cursor: Arc<AtomicUsize>,
}

impl PortSnapshot {
    /// Atomically advance the round-robin cursor and map it onto the handler list.
    fn next_index(&self) -> usize {
        let count = self.cursor.fetch_add(1, Ordering::SeqCst);
        count % self.handlers.len()
    }
}

/// Invoke one handler, turning `Err` and panics into a tagged 500 envelope.
async fn invoke_isolated(
    port: &str,
    handler: &Arc<dyn Handler>,
    envelope: Envelope,
) -> Option<Envelope> {
    let handler_name = handler.name().to_string();
    let path = envelope.path.clone();
    let span = tracing::debug_span!("handler", port = port, handler = %handler_name);

    let outcome = AssertUnwindSafe(handler.handle(envelope))
        .catch_unwind()
        .instrument(span)
        .await;

    let message = match outcome {
        Ok(Ok(result)) => return result,
        Ok(Err(err)) => err.message,
        Err(payload) => format!("handler panicked: {}", panic_message(payload.as_ref())),
    };

    tracing::warn!(
        port = port,
        handler = %handler_name,
        error = %message,
        "Handler failed; converted to error envelope"
    );

    let mut failure = Envelope::error(500, message)
        .with_metadata("handler", handler_name)
        .with_metadata("port", port);
    failure.path = path;
    Some(failure)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
