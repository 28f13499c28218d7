use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use eyre::Result;
use tokio::{signal, sync::broadcast};

/// Why a drain was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// `Runtime::request_shutdown` or an adapter stop
    Requested,
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

/// One-shot shutdown signal shared between the runtime, its signal handler
/// and long-running adapter tasks.
///
/// The first trigger wins; later triggers are ignored. Waiters that subscribe
/// after the trigger still observe it.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<ShutdownReason>>>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Reason of the first trigger, if any
    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.reason.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Trigger shutdown. Returns `false` if it was already triggered.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) -> bool {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(?reason, "Shutdown already initiated, ignoring trigger");
            return false;
        }

        *self.reason.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
        tracing::info!("Shutdown triggered: {:?}", reason);
        // No receivers is fine: late waiters read the stored reason
        let _ = self.shutdown_tx.send(reason);
        true
    }

    /// Listen for SIGINT / SIGTERM and trigger shutdown on the first one.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("Signal handler started. Listening for SIGINT and SIGTERM");

        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
                self.trigger_shutdown(ShutdownReason::Interrupt);
            }
            _ = wait_for_sigterm() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                self.trigger_shutdown(ShutdownReason::Terminate);
            }
        }

        Ok(())
    }

    /// Wait until shutdown is triggered, returning the reason.
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        self.shutdown_token().wait_for_shutdown().await
    }

    /// Detached waiter usable from spawned tasks
    pub fn shutdown_token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.shutdown_tx.subscribe(),
            reason: self.reason.clone(),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

/// A receiver of the shutdown signal
pub struct ShutdownToken {
    receiver: broadcast::Receiver<ShutdownReason>,
    reason: Arc<Mutex<Option<ShutdownReason>>>,
}

impl Clone for ShutdownToken {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.resubscribe(),
            reason: self.reason.clone(),
        }
    }
}

impl ShutdownToken {
    pub fn is_shutdown_initiated(&self) -> bool {
        self.triggered().is_some()
    }

    fn triggered(&self) -> Option<ShutdownReason> {
        *self.reason.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn wait_for_shutdown(mut self) -> ShutdownReason {
        // Subscribed before this check, so a trigger in between is still received
        if let Some(reason) = self.triggered() {
            return reason;
        }
        match self.receiver.recv().await {
            Ok(reason) => reason,
            Err(_) => self.triggered().unwrap_or(ShutdownReason::Requested),
        }
    }
}
