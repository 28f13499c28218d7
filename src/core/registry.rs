//! Named-port routing table.
//!
//! The registry maps port names to an ordered handler list plus a
//! [`RoutingStrategy`]. A single lock guards the map; it is held only to
//! mutate the map or to snapshot a port, never while handlers run. Handlers
//! can therefore call back into the registry (directly or through
//! `Runtime::emit`) without deadlocking, and a slow handler on one port never
//! blocks routing on another.
use std::{
    collections::HashMap,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{
    core::{
        envelope::Envelope,
        routing::{PortSnapshot, RoutingError, RoutingResult, RoutingStrategy},
    },
    ports::handler::Handler,
};

/// A named slot holding handlers and the strategy used to pick among them.
struct Port {
    handlers: Vec<Arc<dyn Handler>>,
    strategy: RoutingStrategy,
    cursor: Arc<AtomicUsize>,
}

impl Port {
    fn new(strategy: RoutingStrategy) -> Self {
        Self {
            handlers: Vec::new(),
            strategy,
            cursor: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn snapshot(&self, name: &str) -> PortSnapshot {
        PortSnapshot {
            name: name.to_string(),
            handlers: self.handlers.clone(),
            strategy: self.strategy,
            cursor: self.cursor.clone(),
        }
    }
}

/// Concurrent map of port name to port. Build one per runtime and inject it;
/// there is no process-wide instance.
#[derive(Default)]
pub struct PortRegistry {
    ports: RwLock<HashMap<String, Port>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to `port`, creating the port with
    /// [`RoutingStrategy::First`] if it does not exist yet. An existing port
    /// keeps its strategy.
    pub fn register_handler(&self, port: &str, handler: Arc<dyn Handler>) {
        self.register(port, handler, None);
    }

    /// Append `handler` to `port` and set the port's strategy explicitly.
    pub fn register_handler_with_strategy(
        &self,
        port: &str,
        handler: Arc<dyn Handler>,
        strategy: RoutingStrategy,
    ) {
        self.register(port, handler, Some(strategy));
    }

    fn register(&self, port: &str, handler: Arc<dyn Handler>, strategy: Option<RoutingStrategy>) {
        let handler_name = handler.name().to_string();
        let mut ports = self.ports.write().unwrap_or_else(PoisonError::into_inner);
        let entry = ports
            .entry(port.to_string())
            .or_insert_with(|| Port::new(strategy.unwrap_or_default()));
        if let Some(strategy) = strategy {
            entry.strategy = strategy;
        }
        entry.handlers.push(handler);

        tracing::debug!(
            port = port,
            handler = %handler_name,
            strategy = %entry.strategy,
            handlers = entry.handlers.len(),
            "Handler registered"
        );
    }

    /// Create `port` with no handlers if it does not exist. Routing to a
    /// declared but empty port fails with [`RoutingError::NoHandler`].
    pub fn declare_port(&self, port: &str, strategy: RoutingStrategy) {
        let mut ports = self.ports.write().unwrap_or_else(PoisonError::into_inner);
        ports
            .entry(port.to_string())
            .or_insert_with(|| Port::new(strategy));
    }

    /// Route `envelope` through `port` and collect the handler results.
    ///
    /// Never creates the port: routing to an unknown name is a configuration
    /// error and fails with [`RoutingError::PortNotFound`].
    pub async fn route(&self, port: &str, envelope: Envelope) -> RoutingResult<Vec<Envelope>> {
        let snapshot = self.snapshot(port)?;
        snapshot.strategy.execute(&snapshot, envelope).await
    }

    fn snapshot(&self, port: &str) -> RoutingResult<PortSnapshot> {
        let ports = self.ports.read().unwrap_or_else(PoisonError::into_inner);
        ports
            .get(port)
            .map(|entry| entry.snapshot(port))
            .ok_or_else(|| RoutingError::PortNotFound(port.to_string()))
    }

    pub fn contains_port(&self, port: &str) -> bool {
        self.ports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(port)
    }

    /// Registered port names, sorted.
    pub fn port_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .ports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn port_count(&self) -> usize {
        self.ports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn handler_count(&self, port: &str) -> Option<usize> {
        self.ports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(port)
            .map(|entry| entry.handlers.len())
    }

    pub fn strategy(&self, port: &str) -> Option<RoutingStrategy> {
        self.ports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(port)
            .map(|entry| entry.strategy)
    }

    /// Current value of a port's round-robin cursor (diagnostics).
    pub fn round_robin_cursor(&self, port: &str) -> Option<usize> {
        self.ports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(port)
            .map(|entry| entry.cursor.load(Ordering::SeqCst))
    }
}
