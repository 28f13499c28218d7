// Startup rollback, fail-fast and bounded draining of the runtime
#[cfg(test)]
mod test {
    use std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, Ordering},
        },
        time::{Duration, Instant},
    };

    use async_trait::async_trait;
    use hexswitch::{
        AdapterError, AdapterFactory, Envelope, ExecutionPlan, InboundAdapter, OutboundAdapter,
        Runtime, RuntimeError, RuntimeHandle, RuntimeState, Telemetry, TraceContext,
        config::{InboundAdapterSpec, OutboundAdapterSpec},
        metrics::RUNTIME_ADAPTER_STOPS_TOTAL,
        ports::{AdapterResult, NoopTelemetry, SpanHandle, telemetry::Labels},
    };

    type EventLog = Arc<Mutex<Vec<String>>>;

    /// Keeps `adapter:outcome` for every stop/disconnect the runtime counts.
    #[derive(Default)]
    struct StopOutcomes {
        outcomes: Mutex<Vec<String>>,
    }

    impl StopOutcomes {
        fn outcome_of(&self, adapter: &str) -> Option<String> {
            let prefix = format!("{adapter}:");
            self.outcomes
                .lock()
                .unwrap()
                .iter()
                .find_map(|entry| entry.strip_prefix(&prefix).map(str::to_string))
        }
    }

    impl Telemetry for StopOutcomes {
        fn start_span(
            &self,
            name: &str,
            parent: Option<&TraceContext>,
            tags: &[(&str, String)],
        ) -> SpanHandle {
            NoopTelemetry.start_span(name, parent, tags)
        }

        fn increment_counter(&self, name: &'static str, labels: Labels<'_>, _value: u64) {
            if name != RUNTIME_ADAPTER_STOPS_TOTAL {
                return;
            }
            let label = |key: &str| {
                labels
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default()
            };
            self.outcomes
                .lock()
                .unwrap()
                .push(format!("{}:{}", label("adapter"), label("outcome")));
        }

        fn set_gauge(&self, _name: &'static str, _labels: Labels<'_>, _value: f64) {}

        fn record_histogram(&self, _name: &'static str, _labels: Labels<'_>, _value: f64) {}
    }

    /// Inbound adapter whose behavior is selected by its name:
    /// `fail*` refuses to start, `stuck*` never reports stopped.
    struct ScriptedInbound {
        name: String,
        running: AtomicBool,
        events: EventLog,
    }

    #[async_trait]
    impl InboundAdapter for ScriptedInbound {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self) -> AdapterResult<()> {
            if self.name.starts_with("fail") {
                return Err(AdapterError::Start {
                    adapter: self.name.clone(),
                    message: "port already in use".to_string(),
                });
            }
            self.running.store(true, Ordering::SeqCst);
            self.events.lock().unwrap().push(format!("start:{}", self.name));
            Ok(())
        }

        async fn stop(&self) -> AdapterResult<()> {
            self.events.lock().unwrap().push(format!("stop:{}", self.name));
            if !self.name.starts_with("stuck") {
                self.running.store(false, Ordering::SeqCst);
            }
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }

    struct ScriptedOutbound {
        name: String,
        connected: AtomicBool,
        events: EventLog,
    }

    #[async_trait]
    impl OutboundAdapter for ScriptedOutbound {
        fn name(&self) -> &str {
            &self.name
        }

        async fn connect(&self) -> AdapterResult<()> {
            self.connected.store(true, Ordering::SeqCst);
            self.events.lock().unwrap().push(format!("connect:{}", self.name));
            Ok(())
        }

        async fn disconnect(&self) -> AdapterResult<()> {
            self.connected.store(false, Ordering::SeqCst);
            self.events.lock().unwrap().push(format!("disconnect:{}", self.name));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn deliver(&self, envelope: Envelope) -> AdapterResult<Envelope> {
            Ok(envelope)
        }
    }

    fn scripted_factory(events: &EventLog) -> Arc<AdapterFactory> {
        let factory = AdapterFactory::new();
        let inbound_events = events.clone();
        factory.register_inbound(
            "scripted",
            move |spec: &InboundAdapterSpec, _runtime: RuntimeHandle| {
                Ok(Arc::new(ScriptedInbound {
                    name: spec.name.clone(),
                    running: AtomicBool::new(false),
                    events: inbound_events.clone(),
                }) as Arc<dyn InboundAdapter>)
            },
        );
        let outbound_events = events.clone();
        factory.register_outbound("scripted", move |spec: &OutboundAdapterSpec| {
            Ok(Arc::new(ScriptedOutbound {
                name: spec.name.clone(),
                connected: AtomicBool::new(false),
                events: outbound_events.clone(),
            }) as Arc<dyn OutboundAdapter>)
        });
        Arc::new(factory)
    }

    fn runtime(plan: ExecutionPlan, events: &EventLog, grace: Duration) -> Runtime {
        Runtime::builder(plan)
            .factory(scripted_factory(events))
            .telemetry(Arc::new(NoopTelemetry))
            .shutdown_grace(grace)
            .build()
    }

    #[tokio::test]
    async fn test_one_failing_adapter_rolls_back_everything() {
        let events: EventLog = Arc::default();
        let plan = ExecutionPlan::new()
            .outbound(OutboundAdapterSpec::new("scripted", "billing").bind_port("billing"))
            .inbound(InboundAdapterSpec::new("scripted", "first"))
            .inbound(InboundAdapterSpec::new("scripted", "fail-second"))
            .inbound(InboundAdapterSpec::new("scripted", "third"));
        let runtime = runtime(plan, &events, Duration::from_secs(1));

        let err = runtime.start().await.unwrap_err();
        match err {
            RuntimeError::Startup { adapter, source } => {
                assert_eq!(adapter, "fail-second");
                assert!(matches!(source, AdapterError::Start { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(runtime.state(), RuntimeState::Failed);
        assert_eq!(runtime.running_adapter_count(), 0);
        assert!(runtime.bound_ports().is_empty());

        let events = events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec!["connect:billing", "start:first", "stop:first", "disconnect:billing"]
        );
    }

    #[tokio::test]
    async fn test_unknown_type_starts_nothing() {
        let events: EventLog = Arc::default();
        let plan = ExecutionPlan::new()
            .inbound(InboundAdapterSpec::new("scripted", "first"))
            .outbound(OutboundAdapterSpec::new("smtp", "mailer").bind_port("mail"));
        let runtime = runtime(plan, &events, Duration::from_secs(1));

        let err = runtime.start().await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::UnknownAdapterType { ref adapter, ref adapter_type, .. }
                if adapter == "mailer" && adapter_type == "smtp"
        ));
        assert_eq!(runtime.state(), RuntimeState::Failed);
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_abandons_stragglers_after_grace() {
        let events: EventLog = Arc::default();
        let outcomes = Arc::new(StopOutcomes::default());
        let plan = ExecutionPlan::new()
            .inbound(InboundAdapterSpec::new("scripted", "polite"))
            .inbound(InboundAdapterSpec::new("scripted", "stuck-listener"))
            .outbound(OutboundAdapterSpec::new("scripted", "billing").bind_port("billing"));
        let runtime = Runtime::builder(plan)
            .factory(scripted_factory(&events))
            .telemetry(outcomes.clone())
            .shutdown_grace(Duration::from_millis(200))
            .build();

        runtime.start().await.unwrap();
        assert_eq!(runtime.state(), RuntimeState::Running);
        assert_eq!(runtime.running_adapter_count(), 3);
        assert_eq!(runtime.bound_ports(), vec!["billing"]);

        let started = Instant::now();
        runtime.shutdown().await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(runtime.state(), RuntimeState::Stopped);
        assert!(elapsed >= Duration::from_millis(150), "returned before grace: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "grace not enforced: {elapsed:?}");

        let statuses = runtime.adapter_statuses();
        let stuck = statuses.iter().find(|s| s.name == "stuck-listener").unwrap();
        assert!(stuck.running);
        let polite = statuses.iter().find(|s| s.name == "polite").unwrap();
        assert!(!polite.running);
        // The straggler does not eat into the outbound share of the grace period
        let billing = statuses.iter().find(|s| s.name == "billing").unwrap();
        assert!(!billing.running);
        assert!(runtime.bound_ports().is_empty());

        assert_eq!(outcomes.outcome_of("stuck-listener").as_deref(), Some("abandoned"));
        assert_eq!(outcomes.outcome_of("polite").as_deref(), Some("ok"));
        assert_eq!(outcomes.outcome_of("billing").as_deref(), Some("ok"));

        let events = events.lock().unwrap().clone();
        assert!(events.contains(&"stop:stuck-listener".to_string()));
        assert!(events.contains(&"disconnect:billing".to_string()));
    }

    #[tokio::test]
    async fn test_request_shutdown_without_run_loop() {
        let events: EventLog = Arc::default();
        let plan = ExecutionPlan::new()
            .inbound(InboundAdapterSpec::new("scripted", "listener"))
            .outbound(OutboundAdapterSpec::new("scripted", "billing").bind_port("billing"));
        let runtime = runtime(plan, &events, Duration::from_secs(1));

        runtime.start().await.unwrap();
        runtime.request_shutdown();

        let deadline = Instant::now() + Duration::from_secs(2);
        while runtime.state() != RuntimeState::Stopped {
            assert!(Instant::now() < deadline, "still {}", runtime.state());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(runtime.running_adapter_count(), 0);
        assert!(runtime.bound_ports().is_empty());

        let events = events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec!["connect:billing", "start:listener", "stop:listener", "disconnect:billing"]
        );
    }

    #[tokio::test]
    async fn test_emit_uses_bound_adapter() {
        let events: EventLog = Arc::default();
        let plan = ExecutionPlan::new()
            .outbound(OutboundAdapterSpec::new("scripted", "billing").bind_port("billing"));
        let runtime = runtime(plan, &events, Duration::from_secs(1));

        runtime.start().await.unwrap();
        let reply = runtime.emit("billing", Envelope::new("/invoices")).await.unwrap();
        assert_eq!(reply.path, "/invoices");
        assert!(reply.trace_id.is_some());

        assert!(matches!(
            runtime.emit("shipping", Envelope::new("/x")).await,
            Err(RuntimeError::PortNotFound(_))
        ));
        runtime.shutdown().await.unwrap();

        assert!(matches!(
            runtime.shutdown().await,
            Err(RuntimeError::InvalidState { .. })
        ));
    }
}
