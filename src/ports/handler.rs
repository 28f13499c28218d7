use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::core::envelope::Envelope;

/// Failure raised by a handler. Routing converts it into a 500 error envelope
/// and never lets it escape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// `Ok(None)` means the handler produced no response.
pub type HandlerResult = Result<Option<Envelope>, HandlerError>;

/// Business logic attached to a port.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Identity used to tag error envelopes and diagnostics
    fn name(&self) -> &str;

    async fn handle(&self, envelope: Envelope) -> HandlerResult;
}

/// Handler backed by an async closure.
pub struct FnHandler<F> {
    name: String,
    func: F,
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, envelope: Envelope) -> HandlerResult {
        (self.func)(envelope).await
    }
}

/// Wrap an async closure as a shareable handler.
///
/// ```
/// use hexswitch::{Envelope, ports::handler::{Handler, handler_fn}};
///
/// let echo = handler_fn("echo", |envelope: Envelope| async move {
///     Ok(Some(Envelope::success(envelope.body.unwrap_or_default())))
/// });
/// assert_eq!(echo.name(), "echo");
/// ```
pub fn handler_fn<F, Fut>(name: impl Into<String>, func: F) -> Arc<dyn Handler>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        func,
    })
}
