// Trace identifiers flowing from an inbound request through handlers to outbound adapters
#[cfg(test)]
mod test {
    use std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use hexswitch::{
        AdapterFactory, Envelope, ExecutionPlan, HandlerError, InboundAdapter, OutboundAdapter,
        Payload, Runtime, RuntimeHandle, Telemetry, TraceContext,
        adapters::{HttpInboundAdapter, http_outbound},
        config::{InboundAdapterSpec, OutboundAdapterSpec, RouteSpec},
        metrics::{RUNTIME_ADAPTER_STARTS_TOTAL, RUNTIME_DISPATCH_TOTAL, RUNTIME_EMIT_TOTAL},
        ports::{
            AdapterResult,
            handler::handler_fn,
            telemetry::{ActiveSpan, Labels, SpanHandle, SpanStatus},
        },
    };
    use serde_json::{Value, json};

    struct QuietSpan;

    impl ActiveSpan for QuietSpan {
        fn set_tag(&mut self, _key: &str, _value: String) {}

        fn end(self: Box<Self>, _status: SpanStatus, _elapsed: Duration) {}
    }

    #[derive(Default)]
    struct RecordingTelemetry {
        spans: Mutex<Vec<(String, TraceContext)>>,
        counters: Mutex<Vec<(&'static str, Vec<(&'static str, String)>)>>,
    }

    impl RecordingTelemetry {
        fn span_names(&self) -> Vec<String> {
            self.spans.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
        }

        fn counted(&self, name: &str, outcome: &str) -> bool {
            self.counters.lock().unwrap().iter().any(|(counter, labels)| {
                *counter == name
                    && labels
                        .iter()
                        .any(|(key, value)| *key == "outcome" && value == outcome)
            })
        }
    }

    impl Telemetry for RecordingTelemetry {
        fn start_span(
            &self,
            name: &str,
            parent: Option<&TraceContext>,
            _tags: &[(&str, String)],
        ) -> SpanHandle {
            let context = TraceContext::child_of(parent);
            self.spans
                .lock()
                .unwrap()
                .push((name.to_string(), context.clone()));
            SpanHandle::new(name, context, Box::new(QuietSpan))
        }

        fn increment_counter(&self, name: &'static str, labels: Labels<'_>, _value: u64) {
            self.counters.lock().unwrap().push((name, labels.to_vec()));
        }

        fn set_gauge(&self, _name: &'static str, _labels: Labels<'_>, _value: f64) {}

        fn record_histogram(&self, _name: &'static str, _labels: Labels<'_>, _value: f64) {}
    }

    /// Outbound adapter that keeps every envelope it is asked to deliver.
    struct RecordingOutbound {
        name: String,
        connected: AtomicBool,
        delivered: Arc<Mutex<Vec<Envelope>>>,
    }

    #[async_trait]
    impl OutboundAdapter for RecordingOutbound {
        fn name(&self) -> &str {
            &self.name
        }

        async fn connect(&self) -> AdapterResult<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> AdapterResult<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn deliver(&self, envelope: Envelope) -> AdapterResult<Envelope> {
            self.delivered.lock().unwrap().push(envelope);
            let mut data = Payload::new();
            data.insert("reserved".to_string(), Value::Bool(true));
            Ok(Envelope::success(data))
        }
    }

    struct Fixture {
        factory: Arc<AdapterFactory>,
        delivered: Arc<Mutex<Vec<Envelope>>>,
        http: Arc<Mutex<Option<Arc<HttpInboundAdapter>>>>,
    }

    fn fixture() -> Fixture {
        let factory = AdapterFactory::new();
        let delivered: Arc<Mutex<Vec<Envelope>>> = Arc::default();
        let http: Arc<Mutex<Option<Arc<HttpInboundAdapter>>>> = Arc::default();

        let sink = delivered.clone();
        factory.register_outbound("recording", move |spec: &OutboundAdapterSpec| {
            Ok(Arc::new(RecordingOutbound {
                name: spec.name.clone(),
                connected: AtomicBool::new(false),
                delivered: sink.clone(),
            }) as Arc<dyn OutboundAdapter>)
        });

        // Same HTTP adapter, but the test keeps a handle to learn the bound address
        let slot = http.clone();
        factory.register_inbound(
            "http-observed",
            move |spec: &InboundAdapterSpec, runtime: RuntimeHandle| {
                let adapter = Arc::new(HttpInboundAdapter::from_spec(spec, runtime)?);
                *slot.lock().unwrap() = Some(adapter.clone());
                Ok(adapter as Arc<dyn InboundAdapter>)
            },
        );

        Fixture {
            factory: Arc::new(factory),
            delivered,
            http,
        }
    }

    /// Handler on `orders` that reserves stock through the `inventory` port.
    fn register_orders_handler(runtime: &Runtime, seen: Arc<Mutex<Option<Envelope>>>) {
        let handle = runtime.handle();
        runtime.registry().register_handler(
            "orders",
            handler_fn("reserve-stock", move |envelope: Envelope| {
                let handle = handle.clone();
                let seen = seen.clone();
                async move {
                    *seen.lock().unwrap() = Some(envelope.clone());
                    let request =
                        Envelope::new("/stock").with_trace_context(envelope.trace_context());
                    let reply = handle
                        .emit("inventory", request)
                        .await
                        .map_err(|e| HandlerError::new(e.to_string()))?;

                    let mut data = reply.data.unwrap_or_default();
                    if let Some(order) = envelope.path_params.get("id") {
                        data.insert("order".to_string(), order.clone());
                    }
                    Ok(Some(Envelope::success(data)))
                }
            }),
        );
    }

    #[tokio::test]
    async fn test_dispatch_to_emit_keeps_one_trace() {
        let fixture = fixture();
        let telemetry = Arc::new(RecordingTelemetry::default());
        let plan = ExecutionPlan::new().outbound(
            OutboundAdapterSpec::new("recording", "stock-service").bind_port("inventory"),
        );
        let runtime = Runtime::builder(plan)
            .factory(fixture.factory.clone())
            .telemetry(telemetry.clone())
            .build();

        let seen: Arc<Mutex<Option<Envelope>>> = Arc::default();
        register_orders_handler(&runtime, seen.clone());
        runtime.start().await.unwrap();

        let upstream = TraceContext::new_root();
        let request = Envelope::new("/orders/7").with_trace_context(Some(upstream.clone()));
        let results = runtime.dispatch("orders", request).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].trace_id.as_deref(), Some(upstream.trace_id.as_str()));
        assert_eq!(results[0].data.as_ref().unwrap()["reserved"], true);

        // Handler runs inside the dispatch span, a child of the caller's span
        let seen = seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.trace_id.as_deref(), Some(upstream.trace_id.as_str()));
        assert_eq!(seen.parent_span_id.as_deref(), Some(upstream.span_id.as_str()));
        assert_ne!(seen.span_id.as_deref(), Some(upstream.span_id.as_str()));

        // The outbound adapter sees the emit span, a child of the dispatch span
        let delivered = fixture.delivered.lock().unwrap().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].trace_id, seen.trace_id);
        assert_eq!(delivered[0].parent_span_id, seen.span_id);

        let names = telemetry.span_names();
        assert!(names.contains(&"adapter.connect".to_string()));
        assert!(names.contains(&"runtime.dispatch".to_string()));
        assert!(names.contains(&"runtime.emit".to_string()));
        assert!(telemetry.counted(RUNTIME_ADAPTER_STARTS_TOTAL, "ok"));
        assert!(telemetry.counted(RUNTIME_DISPATCH_TOTAL, "ok"));
        assert!(telemetry.counted(RUNTIME_EMIT_TOTAL, "ok"));

        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_http_request_trace_reaches_outbound() {
        let fixture = fixture();
        let plan = ExecutionPlan::new()
            .outbound(
                OutboundAdapterSpec::new("recording", "stock-service").bind_port("inventory"),
            )
            .inbound(
                InboundAdapterSpec::new("http-observed", "api")
                    .with_setting("listen_addr", "127.0.0.1:0")
                    .with_route(RouteSpec::new("/orders/{id}", "orders").with_method("GET")),
            );
        let runtime = Runtime::builder(plan)
            .factory(fixture.factory.clone())
            .telemetry(Arc::new(RecordingTelemetry::default()))
            .build();

        let seen: Arc<Mutex<Option<Envelope>>> = Arc::default();
        register_orders_handler(&runtime, seen.clone());
        runtime.start().await.unwrap();

        let addr = fixture
            .http
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|adapter| adapter.local_addr())
            .unwrap();
        let client = reqwest::Client::new();

        let trace_id = "4bf92f3577b34da6a3ce929d0e0e4736";
        let response = client
            .get(format!("http://{addr}/orders/7"))
            .header("x-trace-id", trace_id)
            .header("x-span-id", "00f067aa0ba902b7")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["x-trace-id"], trace_id);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["order"], "7");
        assert_eq!(body["reserved"], true);

        let seen = seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.parent_span_id.as_deref(), Some("00f067aa0ba902b7"));

        // No incoming headers: the runtime starts a trace and still carries it outbound
        let response = client
            .get(format!("http://{addr}/orders/8"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let fresh = response.headers()["x-trace-id"].to_str().unwrap().to_string();
        assert_eq!(fresh.len(), 32);
        assert_ne!(fresh, trace_id);

        let delivered = fixture.delivered.lock().unwrap().clone();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].trace_id.as_deref(), Some(trace_id));
        assert_eq!(delivered[1].trace_id.as_deref(), Some(fresh.as_str()));

        runtime.shutdown().await.unwrap();
        assert!(!fixture.http.lock().unwrap().as_ref().unwrap().is_running());
    }

    // Reports every trace carrier value it received
    async fn spawn_stock_service() -> String {
        fn values(headers: &axum::http::HeaderMap, name: &str) -> Vec<String> {
            headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(str::to_string)
                .collect()
        }

        let app = axum::Router::new().fallback(|headers: axum::http::HeaderMap| async move {
            axum::Json(json!({
                "trace_ids": values(&headers, "x-trace-id"),
                "span_ids": values(&headers, "x-span-id"),
                "traceparents": values(&headers, "traceparent"),
            }))
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_traceparent_forwarded_over_http_once() {
        let fixture = fixture();
        http_outbound::register(&fixture.factory);
        let stock_url = spawn_stock_service().await;

        let plan = ExecutionPlan::new()
            .outbound(
                OutboundAdapterSpec::new("http", "stock-service")
                    .with_setting("base_url", stock_url)
                    .bind_port("inventory"),
            )
            .inbound(
                InboundAdapterSpec::new("http-observed", "api")
                    .with_setting("listen_addr", "127.0.0.1:0")
                    .with_route(RouteSpec::new("/orders/{id}", "orders")),
            );
        let runtime = Runtime::builder(plan)
            .factory(fixture.factory.clone())
            .telemetry(Arc::new(RecordingTelemetry::default()))
            .build();

        // Forwards the inbound envelope as is, carrier headers included
        let handle = runtime.handle();
        runtime.registry().register_handler(
            "orders",
            handler_fn("forward", move |envelope: Envelope| {
                let handle = handle.clone();
                async move {
                    let reply = handle
                        .emit("inventory", envelope)
                        .await
                        .map_err(|e| HandlerError::new(e.to_string()))?;
                    Ok(Some(Envelope::success(reply.data.unwrap_or_default())))
                }
            }),
        );
        runtime.start().await.unwrap();

        let addr = fixture
            .http
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|adapter| adapter.local_addr())
            .unwrap();
        let trace_id = "4bf92f3577b34da6a3ce929d0e0e4736";
        let caller_span = "00f067aa0ba902b7";
        let response = reqwest::Client::new()
            .get(format!("http://{addr}/orders/7"))
            .header("traceparent", format!("00-{trace_id}-{caller_span}-01"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let seen: Value = response.json().await.unwrap();

        assert_eq!(seen["trace_ids"], json!([trace_id]));
        let span_ids = seen["span_ids"].as_array().unwrap();
        assert_eq!(span_ids.len(), 1);
        assert_ne!(span_ids[0], caller_span);

        let traceparents = seen["traceparents"].as_array().unwrap();
        assert_eq!(traceparents.len(), 1);
        let traceparent = traceparents[0].as_str().unwrap();
        assert_eq!(
            traceparent,
            format!("00-{trace_id}-{}-01", span_ids[0].as_str().unwrap())
        );

        runtime.shutdown().await.unwrap();
    }
}
