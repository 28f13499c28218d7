//! Runtime orchestration.
//!
//! The [`Runtime`] turns an [`ExecutionPlan`] into running adapters:
//! * resolves every descriptor through the [`AdapterFactory`] (unknown types fail fast)
//! * connects outbound adapters and fills the outbound routing table
//! * starts inbound adapters, each on its own task or thread
//! * rolls back everything already brought up when any adapter fails
//! * drains adapters within a bounded grace period on shutdown
//!
//! Adapters and handlers talk to the runtime through a cloneable
//! [`RuntimeHandle`], which exposes `dispatch` (inbound routing through the
//! [`PortRegistry`]) and `emit` (outbound delivery through the bound adapter).
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::Duration,
};

use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle, time::Instant};
use tracing::Instrument;

use crate::{
    config::models::ExecutionPlan,
    core::{
        envelope::Envelope,
        factory::AdapterFactory,
        lifecycle::{LifecycleState, RuntimeState},
        registry::PortRegistry,
        routing::RoutingError,
    },
    metrics::{
        RUNTIME_ADAPTER_START_DURATION_SECONDS, RUNTIME_ADAPTER_STARTS_TOTAL,
        RUNTIME_ADAPTER_STOPS_TOTAL, RUNTIME_DISPATCH_DURATION_SECONDS, RUNTIME_DISPATCH_TOTAL,
        RUNTIME_EMIT_DURATION_SECONDS, RUNTIME_EMIT_TOTAL, RUNTIME_RUNNING_ADAPTERS,
        RUNTIME_STATE, StageTimer,
    },
    ports::{
        adapter::{AdapterDirection, AdapterError, InboundAdapter, OutboundAdapter},
        telemetry::{SpanStatus, Telemetry},
    },
    tracing_setup::{create_adapter_span, create_dispatch_span, create_emit_span},
    utils::graceful_shutdown::{GracefulShutdown, ShutdownReason},
};

/// Grace period used when none is configured.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// How often draining re-checks `is_running` / `is_connected`
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

// One quarter of the grace period is held back for disconnecting outbound adapters
const OUTBOUND_DRAIN_SHARE: u32 = 4;

/// Errors surfaced by the runtime.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RuntimeError {
    /// `emit` to a port with no bound outbound adapter
    #[error("port '{0}' has no bound outbound adapter")]
    PortNotFound(String),

    /// `dispatch` failed in the port registry
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// The factory has no constructor for a descriptor's type
    #[error("unknown {direction} adapter type '{adapter_type}' for adapter '{adapter}'")]
    UnknownAdapterType {
        adapter: String,
        adapter_type: String,
        direction: AdapterDirection,
    },

    /// An adapter failed during startup; everything already started was rolled back
    #[error("startup failed at adapter '{adapter}': {source}")]
    Startup {
        adapter: String,
        #[source]
        source: AdapterError,
    },

    #[error("runtime is {actual}, expected {expected}")]
    InvalidState {
        expected: RuntimeState,
        actual: RuntimeState,
    },

    /// The bound outbound adapter failed to deliver
    #[error(transparent)]
    Delivery(#[from] AdapterError),
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

struct RuntimeShared {
    registry: Arc<PortRegistry>,
    // Written only during startup/shutdown, read on every emit
    outbound_routes: RwLock<HashMap<String, Arc<dyn OutboundAdapter>>>,
    telemetry: Arc<dyn Telemetry>,
}

/// Cheap, cloneable access to `dispatch` and `emit`, handed to adapters and
/// captured by handlers that need to call outbound ports.
#[derive(Clone)]
pub struct RuntimeHandle {
    shared: Arc<RuntimeShared>,
}

impl RuntimeHandle {
    pub fn registry(&self) -> &Arc<PortRegistry> {
        &self.shared.registry
    }

    pub fn telemetry(&self) -> &Arc<dyn Telemetry> {
        &self.shared.telemetry
    }

    /// Route `envelope` through the named port.
    ///
    /// The envelope continues the trace it carries (or starts a new one): it
    /// reaches handlers with the dispatch span as `span_id` and the caller's
    /// span as `parent_span_id`. Results without trace fields inherit the
    /// dispatch context.
    pub async fn dispatch(
        &self,
        port: &str,
        mut envelope: Envelope,
    ) -> RuntimeResult<Vec<Envelope>> {
        let telemetry = &self.shared.telemetry;
        let parent = envelope.trace_context();
        let mut span = telemetry.start_span(
            "runtime.dispatch",
            parent.as_ref(),
            &[("port", port.to_string()), ("path", envelope.path.clone())],
        );
        let context = span.context().clone();
        envelope.set_trace_context(Some(&context));

        let _timer = StageTimer::new(
            telemetry.clone(),
            RUNTIME_DISPATCH_DURATION_SECONDS,
            vec![("port", port.to_string())],
        );
        let log_span = create_dispatch_span(port, &envelope.path, &context.trace_id);

        match self
            .shared
            .registry
            .route(port, envelope)
            .instrument(log_span)
            .await
        {
            Ok(mut results) => {
                for result in results.iter_mut().filter(|r| r.trace_id.is_none()) {
                    result.set_trace_context(Some(&context));
                }
                span.set_tag("results", results.len().to_string());
                span.finish(SpanStatus::Ok);
                telemetry.increment_counter(
                    RUNTIME_DISPATCH_TOTAL,
                    &[("port", port.to_string()), ("outcome", "ok".to_string())],
                    1,
                );
                Ok(results)
            }
            Err(err) => {
                tracing::debug!(port = port, error = %err, "Dispatch failed");
                span.finish(SpanStatus::Error(err.to_string()));
                telemetry.increment_counter(
                    RUNTIME_DISPATCH_TOTAL,
                    &[("port", port.to_string()), ("outcome", "error".to_string())],
                    1,
                );
                Err(err.into())
            }
        }
    }

    /// Deliver `envelope` through the outbound adapter bound to `port` and
    /// wait for its response. No timeout or retry is applied here.
    pub async fn emit(&self, port: &str, mut envelope: Envelope) -> RuntimeResult<Envelope> {
        let telemetry = &self.shared.telemetry;
        let Some(adapter) = self.outbound_for(port) else {
            telemetry.increment_counter(
                RUNTIME_EMIT_TOTAL,
                &[("port", port.to_string()), ("outcome", "unbound".to_string())],
                1,
            );
            return Err(RuntimeError::PortNotFound(port.to_string()));
        };

        let parent = envelope.trace_context();
        let mut span = telemetry.start_span(
            "runtime.emit",
            parent.as_ref(),
            &[
                ("port", port.to_string()),
                ("adapter", adapter.name().to_string()),
            ],
        );
        let context = span.context().clone();
        envelope.set_trace_context(Some(&context));

        let _timer = StageTimer::new(
            telemetry.clone(),
            RUNTIME_EMIT_DURATION_SECONDS,
            vec![("port", port.to_string())],
        );
        let log_span = create_emit_span(port, adapter.name(), &context.trace_id);

        match adapter.deliver(envelope).instrument(log_span).await {
            Ok(response) => {
                span.set_tag("status_code", response.status_code.to_string());
                span.finish(SpanStatus::Ok);
                telemetry.increment_counter(
                    RUNTIME_EMIT_TOTAL,
                    &[("port", port.to_string()), ("outcome", "ok".to_string())],
                    1,
                );
                Ok(response)
            }
            Err(err) => {
                tracing::warn!(port = port, adapter = adapter.name(), error = %err, "Emit failed");
                span.finish(SpanStatus::Error(err.to_string()));
                telemetry.increment_counter(
                    RUNTIME_EMIT_TOTAL,
                    &[("port", port.to_string()), ("outcome", "error".to_string())],
                    1,
                );
                Err(err.into())
            }
        }
    }

    /// Ports currently bound to an outbound adapter, sorted.
    pub fn bound_ports(&self) -> Vec<String> {
        let mut ports: Vec<String> = self
            .shared
            .outbound_routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ports.sort();
        ports
    }

    fn outbound_for(&self, port: &str) -> Option<Arc<dyn OutboundAdapter>> {
        self.shared
            .outbound_routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(port)
            .cloned()
    }

    fn bind(&self, port: &str, adapter: Arc<dyn OutboundAdapter>) {
        self.shared
            .outbound_routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(port.to_string(), adapter);
    }

    fn clear_bindings(&self) {
        self.shared
            .outbound_routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[derive(Clone)]
struct ManagedInbound {
    name: String,
    adapter_type: String,
    adapter: Arc<dyn InboundAdapter>,
}

#[derive(Clone)]
struct ManagedOutbound {
    name: String,
    adapter_type: String,
    bound_ports: Vec<String>,
    adapter: Arc<dyn OutboundAdapter>,
}

/// Point-in-time view of one managed adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterStatus {
    pub name: String,
    pub adapter_type: String,
    pub direction: AdapterDirection,
    /// Inbound: `is_running`; outbound: `is_connected`
    pub running: bool,
}

// A stop/disconnect in flight during draining or rollback
struct DrainUnit {
    name: String,
    adapter_type: String,
    direction: AdapterDirection,
    // Ok(false): stop returned but the adapter still reported running at the deadline
    task: JoinHandle<Result<bool, AdapterError>>,
}

/// Builder for [`Runtime`]; every collaborator is injectable.
pub struct RuntimeBuilder {
    plan: ExecutionPlan,
    registry: Option<Arc<PortRegistry>>,
    factory: Option<Arc<AdapterFactory>>,
    telemetry: Option<Arc<dyn Telemetry>>,
    shutdown_grace: Duration,
}

impl RuntimeBuilder {
    pub fn registry(mut self, registry: Arc<PortRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn factory(mut self, factory: Arc<AdapterFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Defaults: fresh registry, factory with built-in adapters, `TracingTelemetry`.
    pub fn build(self) -> Runtime {
        let shared = Arc::new(RuntimeShared {
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(PortRegistry::new())),
            outbound_routes: RwLock::new(HashMap::new()),
            telemetry: self
                .telemetry
                .unwrap_or_else(|| Arc::new(crate::adapters::TracingTelemetry::new())),
        });

        let core = RuntimeCore {
            plan: self.plan,
            factory: self
                .factory
                .unwrap_or_else(|| Arc::new(AdapterFactory::with_builtin_adapters())),
            handle: RuntimeHandle { shared },
            state: LifecycleState::new(),
            shutdown_grace: self.shutdown_grace,
            shutdown: Arc::new(GracefulShutdown::new()),
            stopped: watch::channel(false).0,
            inbound: Mutex::new(Vec::new()),
            outbound: Mutex::new(Vec::new()),
        };

        Runtime {
            core: Arc::new(core),
            watcher: Mutex::new(None),
        }
    }
}

/// Orchestrates adapter lifecycles for one execution plan.
///
/// Once running, a watcher task drains the runtime as soon as shutdown is
/// requested, whether through [`Runtime::request_shutdown`], an OS signal
/// handled by [`Runtime::run_until_shutdown`], or [`Runtime::shutdown`].
pub struct Runtime {
    core: Arc<RuntimeCore>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

// State shared with the shutdown watcher
struct RuntimeCore {
    plan: ExecutionPlan,
    factory: Arc<AdapterFactory>,
    handle: RuntimeHandle,
    state: LifecycleState,
    shutdown_grace: Duration,
    shutdown: Arc<GracefulShutdown>,
    // Flips to true once a drain has reached STOPPED
    stopped: watch::Sender<bool>,
    inbound: Mutex<Vec<ManagedInbound>>,
    outbound: Mutex<Vec<ManagedOutbound>>,
}

impl Runtime {
    pub fn builder(plan: ExecutionPlan) -> RuntimeBuilder {
        RuntimeBuilder {
            plan,
            registry: None,
            factory: None,
            telemetry: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.core.handle.clone()
    }

    pub fn registry(&self) -> &Arc<PortRegistry> {
        self.core.handle.registry()
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.core.plan
    }

    pub fn state(&self) -> RuntimeState {
        self.core.state.get()
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.core.shutdown_grace
    }

    pub async fn dispatch(&self, port: &str, envelope: Envelope) -> RuntimeResult<Vec<Envelope>> {
        self.core.handle.dispatch(port, envelope).await
    }

    pub async fn emit(&self, port: &str, envelope: Envelope) -> RuntimeResult<Envelope> {
        self.core.handle.emit(port, envelope).await
    }

    pub fn bound_ports(&self) -> Vec<String> {
        self.core.handle.bound_ports()
    }

    /// Live status of every adapter built from the plan.
    pub fn adapter_statuses(&self) -> Vec<AdapterStatus> {
        self.core.adapter_statuses()
    }

    pub fn running_adapter_count(&self) -> usize {
        self.core.running_adapter_count()
    }

    /// Bring up every adapter in the plan.
    ///
    /// Outbound adapters are connected first so that handlers can emit as
    /// soon as inbound traffic arrives. If anything fails, every adapter
    /// already brought up is stopped again, the state becomes
    /// [`RuntimeState::Failed`] and a single error names the culprit.
    pub async fn start(&self) -> RuntimeResult<()> {
        self.core.start().await?;

        let core = self.core.clone();
        let token = self.core.shutdown.shutdown_token();
        let watcher = tokio::spawn(async move {
            let reason = token.wait_for_shutdown().await;
            tracing::debug!(?reason, "Shutdown watcher woke up");
            match core.drain().await {
                Ok(()) | Err(RuntimeError::InvalidState { .. }) => {}
                Err(err) => tracing::error!(error = %err, "Draining after shutdown request failed"),
            }
        });
        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(watcher);
        Ok(())
    }

    /// Ask the runtime to drain. Returns immediately; the drain runs on the
    /// shutdown watcher and [`Runtime::stopped`] resolves when it is done.
    /// Safe from any thread; repeated calls are ignored.
    pub fn request_shutdown(&self) {
        self.core.shutdown.trigger_shutdown(ShutdownReason::Requested);
    }

    /// Stop inbound adapters, then disconnect outbound adapters, within the
    /// grace period. Adapters that do not report stopped in time are
    /// abandoned with a warning. If a drain is already in progress this
    /// waits for it instead of starting another.
    pub async fn shutdown(&self) -> RuntimeResult<()> {
        self.core.drain().await
    }

    /// Resolve once a drain has brought the runtime to [`RuntimeState::Stopped`].
    pub async fn stopped(&self) {
        self.core.wait_stopped().await;
    }

    /// Start, block until `request_shutdown` or SIGINT/SIGTERM, then drain.
    pub async fn run_until_shutdown(&self) -> RuntimeResult<()> {
        self.start().await?;

        let signals = self.core.shutdown.clone();
        let signal_task = tokio::spawn(async move {
            if let Err(e) = signals.run_signal_handler().await {
                tracing::error!("Signal handler error: {}", e);
            }
        });

        let reason = self.core.shutdown.wait_for_shutdown_signal().await;
        tracing::info!(?reason, "Shutdown requested");
        signal_task.abort();

        self.stopped().await;
        Ok(())
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // A drain already under way is left to finish
        if self.core.shutdown.is_shutdown_initiated() {
            return;
        }
        // Otherwise the watcher would wait forever on a request that cannot come
        let watcher = self
            .watcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            watcher.abort();
        }
    }
}

impl RuntimeCore {
    fn adapter_statuses(&self) -> Vec<AdapterStatus> {
        let inbound = self.inbound.lock().unwrap_or_else(PoisonError::into_inner);
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);

        inbound
            .iter()
            .map(|managed| AdapterStatus {
                name: managed.name.clone(),
                adapter_type: managed.adapter_type.clone(),
                direction: AdapterDirection::Inbound,
                running: managed.adapter.is_running(),
            })
            .chain(outbound.iter().map(|managed| AdapterStatus {
                name: managed.name.clone(),
                adapter_type: managed.adapter_type.clone(),
                direction: AdapterDirection::Outbound,
                running: managed.adapter.is_connected(),
            }))
            .collect()
    }

    fn running_adapter_count(&self) -> usize {
        self.adapter_statuses()
            .iter()
            .filter(|status| status.running)
            .count()
    }

    async fn start(&self) -> RuntimeResult<()> {
        self.transition(RuntimeState::Init, RuntimeState::Starting)?;
        tracing::info!(
            inbound = self.plan.inbound.len(),
            outbound = self.plan.outbound.len(),
            "Starting HexSwitch runtime"
        );

        let (inbound, outbound) = match self.build_adapters() {
            Ok(built) => built,
            Err(err) => {
                tracing::error!(error = %err, "Failed to build adapters from execution plan");
                self.fail();
                return Err(err);
            }
        };
        *self.inbound.lock().unwrap_or_else(PoisonError::into_inner) = inbound.clone();
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = outbound.clone();

        let mut connected: Vec<ManagedOutbound> = Vec::new();
        for managed in &outbound {
            if let Err(source) = self.connect_outbound(managed).await {
                self.abort_startup(&[], &connected).await;
                return Err(RuntimeError::Startup {
                    adapter: managed.name.clone(),
                    source,
                });
            }
            for port in &managed.bound_ports {
                self.handle.bind(port, managed.adapter.clone());
            }
            connected.push(managed.clone());
        }

        let mut started: Vec<ManagedInbound> = Vec::new();
        for managed in &inbound {
            if let Err(source) = self.start_inbound(managed).await {
                self.abort_startup(&started, &connected).await;
                return Err(RuntimeError::Startup {
                    adapter: managed.name.clone(),
                    source,
                });
            }
            started.push(managed.clone());
        }

        self.transition(RuntimeState::Starting, RuntimeState::Running)?;
        self.record_running_adapters();
        tracing::info!(
            inbound = started.len(),
            outbound = connected.len(),
            bound_ports = ?self.handle.bound_ports(),
            "HexSwitch runtime running"
        );
        Ok(())
    }

    /// Run the `RUNNING → DRAINING → STOPPED` sequence exactly once.
    async fn drain(&self) -> RuntimeResult<()> {
        match self.transition(RuntimeState::Running, RuntimeState::Draining) {
            Ok(()) => {}
            Err(RuntimeError::InvalidState {
                actual: RuntimeState::Draining,
                ..
            }) => {
                self.wait_stopped().await;
                return Ok(());
            }
            Err(err) => return Err(err),
        }
        self.shutdown.trigger_shutdown(ShutdownReason::Requested);
        tracing::info!(grace = ?self.shutdown_grace, "Draining HexSwitch runtime");

        let (inbound_deadline, outbound_deadline) =
            drain_deadlines(Instant::now(), self.shutdown_grace);
        let inbound = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let outbound = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        self.await_units(
            self.stop_inbound_units(&inbound, inbound_deadline),
            inbound_deadline,
        )
        .await;
        self.await_units(
            self.disconnect_outbound_units(&outbound, outbound_deadline),
            outbound_deadline,
        )
        .await;
        self.handle.clear_bindings();

        self.transition(RuntimeState::Draining, RuntimeState::Stopped)?;
        self.record_running_adapters();
        self.stopped.send_replace(true);
        tracing::info!("HexSwitch runtime stopped");
        Ok(())
    }

    async fn wait_stopped(&self) {
        let mut stopped = self.stopped.subscribe();
        // The sender lives as long as `self`, so this only returns once stopped
        let _ = stopped.wait_for(|done| *done).await;
    }

    fn transition(&self, from: RuntimeState, to: RuntimeState) -> RuntimeResult<()> {
        self.state
            .transition(from, to)
            .map_err(|actual| RuntimeError::InvalidState {
                expected: from,
                actual,
            })?;
        tracing::debug!(from = %from, to = %to, "Runtime state changed");
        self.handle
            .telemetry()
            .set_gauge(RUNTIME_STATE, &[], to.gauge_value());
        Ok(())
    }

    fn fail(&self) {
        if let Err(err) = self.transition(RuntimeState::Starting, RuntimeState::Failed) {
            tracing::error!(error = %err, "Could not mark runtime as failed");
        }
        self.record_running_adapters();
    }

    fn record_running_adapters(&self) {
        let running = self.running_adapter_count();
        self.handle
            .telemetry()
            .set_gauge(RUNTIME_RUNNING_ADAPTERS, &[], running as f64);
    }
    /// Resolve constructors for the whole plan before constructing anything.
    fn build_adapters(&self) -> RuntimeResult<(Vec<ManagedInbound>, Vec<ManagedOutbound>)> {
        let mut inbound_ctors = Vec::with_capacity(self.plan.inbound.len());
        for spec in &self.plan.inbound {
            let ctor = self
                .factory
                .inbound_constructor(&spec.adapter_type)
                .ok_or_else(|| RuntimeError::UnknownAdapterType {
                    adapter: spec.name.clone(),
                    adapter_type: spec.adapter_type.clone(),
                    direction: AdapterDirection::Inbound,
                })?;
            inbound_ctors.push((spec, ctor));
        }

        let mut outbound_ctors = Vec::with_capacity(self.plan.outbound.len());
        for spec in &self.plan.outbound {
            let ctor = self
                .factory
                .outbound_constructor(&spec.adapter_type)
                .ok_or_else(|| RuntimeError::UnknownAdapterType {
                    adapter: spec.name.clone(),
                    adapter_type: spec.adapter_type.clone(),
                    direction: AdapterDirection::Outbound,
                })?;
            outbound_ctors.push((spec, ctor));
        }

        let mut bound_by: HashMap<&str, &str> = HashMap::new();
        for spec in &self.plan.outbound {
            for port in &spec.bound_ports {
                if let Some(owner) = bound_by.insert(port.as_str(), spec.name.as_str()) {
                    return Err(RuntimeError::Startup {
                        adapter: spec.name.clone(),
                        source: AdapterError::InvalidSettings {
                            adapter: spec.name.clone(),
                            message: format!("port '{port}' is already bound to adapter '{owner}'"),
                        },
                    });
                }
            }
        }

        let mut outbound = Vec::with_capacity(outbound_ctors.len());
        for (spec, ctor) in outbound_ctors {
            let adapter = ctor(spec).map_err(|source| RuntimeError::Startup {
                adapter: spec.name.clone(),
                source,
            })?;
            outbound.push(ManagedOutbound {
                name: spec.name.clone(),
                adapter_type: spec.adapter_type.clone(),
                bound_ports: spec.bound_ports.clone(),
                adapter,
            });
        }

        let mut inbound = Vec::with_capacity(inbound_ctors.len());
        for (spec, ctor) in inbound_ctors {
            let adapter = ctor(spec, self.handle.clone()).map_err(|source| {
                RuntimeError::Startup {
                    adapter: spec.name.clone(),
                    source,
                }
            })?;
            inbound.push(ManagedInbound {
                name: spec.name.clone(),
                adapter_type: spec.adapter_type.clone(),
                adapter,
            });
        }

        Ok((inbound, outbound))
    }

    async fn connect_outbound(&self, managed: &ManagedOutbound) -> Result<(), AdapterError> {
        let result = self
            .bring_up(
                "adapter.connect",
                &managed.name,
                &managed.adapter_type,
                AdapterDirection::Outbound,
                managed.adapter.connect(),
            )
            .await;
        if result.is_ok() {
            tracing::info!(
                adapter = %managed.name,
                bound_ports = ?managed.bound_ports,
                "Outbound adapter connected"
            );
        }
        result
    }

    async fn start_inbound(&self, managed: &ManagedInbound) -> Result<(), AdapterError> {
        let result = self
            .bring_up(
                "adapter.start",
                &managed.name,
                &managed.adapter_type,
                AdapterDirection::Inbound,
                managed.adapter.start(),
            )
            .await;
        if result.is_ok() {
            tracing::info!(adapter = %managed.name, "Inbound adapter started");
        }
        result
    }

    /// Time one start/connect call and report it through telemetry.
    async fn bring_up(
        &self,
        span_name: &str,
        name: &str,
        adapter_type: &str,
        direction: AdapterDirection,
        operation: impl Future<Output = Result<(), AdapterError>>,
    ) -> Result<(), AdapterError> {
        let telemetry = self.handle.telemetry();
        let mut span = telemetry.start_span(
            span_name,
            None,
            &[
                ("adapter", name.to_string()),
                ("type", adapter_type.to_string()),
                ("direction", direction.to_string()),
            ],
        );

        let result = operation
            .instrument(create_adapter_span(name, adapter_type, direction.as_str()))
            .await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        span.set_tag("outcome", outcome);
        let elapsed = match &result {
            Ok(()) => span.finish(SpanStatus::Ok),
            Err(err) => {
                tracing::error!(adapter = name, error = %err, "Adapter bring-up failed");
                span.finish(SpanStatus::Error(err.to_string()))
            }
        };

        telemetry.increment_counter(
            RUNTIME_ADAPTER_STARTS_TOTAL,
            &[
                ("adapter", name.to_string()),
                ("type", adapter_type.to_string()),
                ("direction", direction.to_string()),
                ("outcome", outcome.to_string()),
            ],
            1,
        );
        telemetry.record_histogram(
            RUNTIME_ADAPTER_START_DURATION_SECONDS,
            &[
                ("adapter", name.to_string()),
                ("type", adapter_type.to_string()),
                ("direction", direction.to_string()),
            ],
            elapsed.as_secs_f64(),
        );
        result
    }

    /// Undo a partial startup and mark the runtime failed.
    async fn abort_startup(&self, started: &[ManagedInbound], connected: &[ManagedOutbound]) {
        tracing::warn!(
            started_inbound = started.len(),
            connected_outbound = connected.len(),
            "Rolling back partially started runtime"
        );
        let (inbound_deadline, outbound_deadline) =
            drain_deadlines(Instant::now(), self.shutdown_grace);
        self.await_units(
            self.stop_inbound_units(started, inbound_deadline),
            inbound_deadline,
        )
        .await;
        self.await_units(
            self.disconnect_outbound_units(connected, outbound_deadline),
            outbound_deadline,
        )
        .await;
        self.handle.clear_bindings();
        self.fail();
    }

    fn stop_inbound_units(&self, adapters: &[ManagedInbound], deadline: Instant) -> Vec<DrainUnit> {
        adapters
            .iter()
            .rev()
            .map(|managed| {
                let adapter = managed.adapter.clone();
                let telemetry = self.handle.telemetry().clone();
                let name = managed.name.clone();
                let task = tokio::spawn(async move {
                    let span = telemetry.start_span("adapter.stop", None, &[("adapter", name)]);
                    let result = match adapter.stop().await {
                        Ok(()) => Ok(wait_until(deadline, || !adapter.is_running()).await),
                        Err(err) => Err(err),
                    };
                    span.finish(drain_status(&result));
                    result
                });
                DrainUnit {
                    name: managed.name.clone(),
                    adapter_type: managed.adapter_type.clone(),
                    direction: AdapterDirection::Inbound,
                    task,
                }
            })
            .collect()
    }

    fn disconnect_outbound_units(
        &self,
        adapters: &[ManagedOutbound],
        deadline: Instant,
    ) -> Vec<DrainUnit> {
        adapters
            .iter()
            .rev()
            .map(|managed| {
                let adapter = managed.adapter.clone();
                let telemetry = self.handle.telemetry().clone();
                let name = managed.name.clone();
                let task = tokio::spawn(async move {
                    let span =
                        telemetry.start_span("adapter.disconnect", None, &[("adapter", name)]);
                    let result = match adapter.disconnect().await {
                        Ok(()) => Ok(wait_until(deadline, || !adapter.is_connected()).await),
                        Err(err) => Err(err),
                    };
                    span.finish(drain_status(&result));
                    result
                });
                DrainUnit {
                    name: managed.name.clone(),
                    adapter_type: managed.adapter_type.clone(),
                    direction: AdapterDirection::Outbound,
                    task,
                }
            })
            .collect()
    }

    /// Await stop/disconnect tasks until `deadline`. Failures are logged and
    /// counted, never returned. Stragglers are abandoned: the runtime stops
    /// waiting but their tasks are left to finish on their own.
    async fn await_units(&self, units: Vec<DrainUnit>, deadline: Instant) {
        let telemetry = self.handle.telemetry();
        for unit in units {
            let outcome = match tokio::time::timeout_at(deadline, unit.task).await {
                Ok(Ok(Ok(true))) => {
                    tracing::info!(
                        adapter = %unit.name,
                        direction = %unit.direction,
                        "Adapter stopped"
                    );
                    "ok"
                }
                Ok(Ok(Ok(false))) | Err(_) => {
                    tracing::warn!(
                        adapter = %unit.name,
                        direction = %unit.direction,
                        "Adapter did not stop within the grace period; abandoning it"
                    );
                    "abandoned"
                }
                Ok(Ok(Err(err))) => {
                    tracing::warn!(adapter = %unit.name, error = %err, "Adapter stop failed");
                    "error"
                }
                Ok(Err(join_err)) => {
                    tracing::error!(
                        adapter = %unit.name,
                        error = %join_err,
                        "Adapter stop task panicked"
                    );
                    "error"
                }
            };
            telemetry.increment_counter(
                RUNTIME_ADAPTER_STOPS_TOTAL,
                &[
                    ("adapter", unit.name.clone()),
                    ("type", unit.adapter_type.clone()),
                    ("direction", unit.direction.to_string()),
                    ("outcome", outcome.to_string()),
                ],
                1,
            );
        }
    }
}

/// Split the grace period starting at `now` into the inbound and outbound
/// drain deadlines. Outbound adapters always keep their reserved share, even
/// when an inbound straggler holds on until its own deadline.
fn drain_deadlines(now: Instant, grace: Duration) -> (Instant, Instant) {
    let reserve = grace / OUTBOUND_DRAIN_SHARE;
    (now + (grace - reserve), now + grace)
}

/// Poll `done` until it holds or `deadline` passes; returns whether it held.
async fn wait_until(deadline: Instant, done: impl Fn() -> bool) -> bool {
    while !done() {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
    true
}

fn drain_status(result: &Result<bool, AdapterError>) -> SpanStatus {
    match result {
        Ok(true) => SpanStatus::Ok,
        Ok(false) => SpanStatus::Error("grace period exceeded".to_string()),
        Err(err) => SpanStatus::Error(err.to_string()),
    }
}
