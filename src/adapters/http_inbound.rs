//! HTTP inbound adapter.
//!
//! Serves an axum router on `listen_addr`. Each request is matched against the
//! configured routes (method plus a `matchit` path pattern), converted into an
//! [`Envelope`], dispatched into the mapped port, and the first result is
//! written back as JSON.
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use http_body_util::LengthLimitError;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::{net::TcpListener, task::JoinHandle};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::{
    adapters::trace_propagation::{extract_trace_context, trace_headers},
    config::models::{InboundAdapterSpec, RouteSpec},
    core::{
        envelope::{Envelope, Payload},
        factory::AdapterFactory,
        routing::RoutingError,
        runtime::{RuntimeError, RuntimeHandle},
    },
    ports::{
        adapter::{AdapterError, AdapterResult, InboundAdapter},
        telemetry::TraceContext,
    },
    tracing_setup::create_request_span,
    utils::graceful_shutdown::{GracefulShutdown, ShutdownReason},
};

/// Factory key
pub const ADAPTER_TYPE: &str = "http";

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpInboundSettings {
    /// `host:port`; port 0 picks a free port
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone)]
struct RouteTarget {
    method: Option<String>,
    port: String,
}

enum RouteMatch {
    Found { port: String, params: Payload },
    MethodNotAllowed,
    NotFound,
}

/// Path patterns to ports, with per-path method lists.
struct RouteTable {
    router: matchit::Router<Vec<RouteTarget>>,
}

impl RouteTable {
    fn build(routes: &[RouteSpec]) -> Result<Self, String> {
        // matchit rejects duplicate patterns, so group methods per path first
        let mut grouped: Vec<(String, Vec<RouteTarget>)> = Vec::new();
        for route in routes {
            let target = RouteTarget {
                method: route.method.as_ref().map(|m| m.to_ascii_uppercase()),
                port: route.port.clone(),
            };
            match grouped.iter_mut().find(|(path, _)| *path == route.path) {
                Some((_, targets)) => targets.push(target),
                None => grouped.push((route.path.clone(), vec![target])),
            }
        }

        let mut router = matchit::Router::new();
        for (path, targets) in grouped {
            router
                .insert(path.as_str(), targets)
                .map_err(|e| format!("invalid route '{path}': {e}"))?;
        }
        Ok(Self { router })
    }

    fn resolve(&self, method: &str, path: &str) -> RouteMatch {
        let Ok(matched) = self.router.at(path) else {
            return RouteMatch::NotFound;
        };
        let target = matched.value.iter().find(|target| {
            target
                .method
                .as_deref()
                .is_none_or(|m| m.eq_ignore_ascii_case(method))
        });
        match target {
            Some(target) => RouteMatch::Found {
                port: target.port.clone(),
                params: matched
                    .params
                    .iter()
                    .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
                    .collect(),
            },
            None => RouteMatch::MethodNotAllowed,
        }
    }
}

struct InboundState {
    adapter: String,
    routes: RouteTable,
    runtime: RuntimeHandle,
    max_body_bytes: usize,
}

struct ServerTask {
    shutdown: GracefulShutdown,
    task: JoinHandle<()>,
}

pub struct HttpInboundAdapter {
    name: String,
    listen_addr: String,
    state: Arc<InboundState>,
    running: Arc<AtomicBool>,
    local_addr: Mutex<Option<SocketAddr>>,
    server: tokio::sync::Mutex<Option<ServerTask>>,
}

impl HttpInboundAdapter {
    pub fn from_spec(spec: &InboundAdapterSpec, runtime: RuntimeHandle) -> AdapterResult<Self> {
        let invalid = |message: String| AdapterError::InvalidSettings {
            adapter: spec.name.clone(),
            message,
        };
        let settings: HttpInboundSettings = spec
            .settings_as()
            .map_err(|e| invalid(e.to_string()))?;
        let routes = RouteTable::build(&spec.routes).map_err(invalid)?;

        Ok(Self {
            name: spec.name.clone(),
            listen_addr: settings.listen_addr,
            state: Arc::new(InboundState {
                adapter: spec.name.clone(),
                routes,
                runtime,
                max_body_bytes: settings.max_body_bytes,
            }),
            running: Arc::new(AtomicBool::new(false)),
            local_addr: Mutex::new(None),
            server: tokio::sync::Mutex::new(None),
        })
    }

    /// Bound address once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Register the `http` inbound constructor.
pub fn register(factory: &AdapterFactory) {
    factory.register_inbound(ADAPTER_TYPE, |spec: &InboundAdapterSpec, runtime: RuntimeHandle| {
        let adapter = HttpInboundAdapter::from_spec(spec, runtime)?;
        Ok(Arc::new(adapter) as Arc<dyn InboundAdapter>)
    });
}

#[async_trait]
impl InboundAdapter for HttpInboundAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> AdapterResult<()> {
        let start_error = |message: String| AdapterError::Start {
            adapter: self.name.clone(),
            message,
        };

        let mut server = self.server.lock().await;
        if server.is_some() {
            return Err(start_error("already started".to_string()));
        }

        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|e| start_error(format!("failed to bind {}: {e}", self.listen_addr)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| start_error(e.to_string()))?;
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(local_addr);

        let app = Router::new()
            .fallback(handle_request)
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        let shutdown = GracefulShutdown::new();
        let token = shutdown.shutdown_token();
        let running = self.running.clone();
        let name = self.name.clone();

        running.store(true, Ordering::SeqCst);
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    token.wait_for_shutdown().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(adapter = %name, "HTTP server error: {}", e);
            }
            running.store(false, Ordering::SeqCst);
            tracing::info!(adapter = %name, "HTTP server stopped");
        });

        tracing::info!(adapter = %self.name, %local_addr, "HTTP inbound adapter listening");
        *server = Some(ServerTask { shutdown, task });
        Ok(())
    }

    async fn stop(&self) -> AdapterResult<()> {
        let Some(server) = self.server.lock().await.take() else {
            return Ok(());
        };
        server.shutdown.trigger_shutdown(ShutdownReason::Requested);
        server.task.await.map_err(|e| AdapterError::Stop {
            adapter: self.name.clone(),
            message: e.to_string(),
        })
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

async fn handle_request(State(state): State<Arc<InboundState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let method = parts.method.as_str().to_string();
    let path = parts.uri.path().to_string();

    let headers: HashMap<String, String> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();
    let remote = extract_trace_context(&headers);

    let (port, path_params) = match state.routes.resolve(&method, &path) {
        RouteMatch::Found { port, params } => (port, params),
        RouteMatch::MethodNotAllowed => {
            return error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "method not allowed",
                remote.as_ref(),
            );
        }
        RouteMatch::NotFound => {
            return error_response(StatusCode::NOT_FOUND, "no route", remote.as_ref());
        }
    };

    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(adapter = %state.adapter, "Failed to read request body: {}", e);
            let (status, message) = body_error_status(e);
            return error_response(status, message, remote.as_ref());
        }
    };
    let body = match parse_body(&bytes) {
        Ok(body) => body,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid JSON body: {e}"),
                remote.as_ref(),
            );
        }
    };

    let query_params: Payload = parts
        .uri
        .query()
        .map(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
                .collect()
        })
        .unwrap_or_default();

    let envelope = Envelope {
        path: path.clone(),
        method: Some(method.clone()),
        path_params,
        query_params,
        headers,
        body,
        ..Envelope::default()
    }
    .with_metadata("adapter", state.adapter.clone())
    .with_trace_context(remote.clone());

    let trace_id = envelope.trace_id.clone().unwrap_or_default();
    let span = create_request_span(&method, &path, &trace_id);
    span.record("port", port.as_str());

    let response = match state
        .runtime
        .dispatch(&port, envelope)
        .instrument(span.clone())
        .await
    {
        Ok(results) => match results.into_iter().next() {
            Some(result) => envelope_response(&result),
            None => {
                let mut response = StatusCode::NO_CONTENT.into_response();
                insert_trace_headers(&mut response, remote.as_ref());
                response
            }
        },
        Err(RuntimeError::Routing(RoutingError::PortNotFound(port))) => error_response(
            StatusCode::NOT_FOUND,
            &format!("port '{port}' not found"),
            remote.as_ref(),
        ),
        Err(RuntimeError::Routing(RoutingError::NoHandler(port))) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &format!("no handler registered for port '{port}'"),
            remote.as_ref(),
        ),
        Err(e) => {
            tracing::error!(adapter = %state.adapter, port = %port, "Dispatch failed: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error",
                remote.as_ref(),
            )
        }
    };

    span.record("http.status_code", response.status().as_u16());
    response
}

/// Only an exceeded body limit is a 413; any other read failure is the client's fault.
fn body_error_status(err: axum::Error) -> (StatusCode, &'static str) {
    let inner = err.into_inner();
    let root: &(dyn std::error::Error + 'static) = &*inner;
    let mut cause = Some(root);
    while let Some(e) = cause {
        if e.is::<LengthLimitError>() {
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
        cause = e.source();
    }
    (StatusCode::BAD_REQUEST, "failed to read request body")
}

fn parse_body(bytes: &[u8]) -> Result<Option<Payload>, serde_json::Error> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(match serde_json::from_slice::<Value>(bytes)? {
        Value::Object(map) => map,
        other => Payload::from_iter([("value".to_string(), other)]),
    }))
}

fn envelope_response(envelope: &Envelope) -> Response {
    let status =
        StatusCode::from_u16(envelope.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match (&envelope.error_message, &envelope.data) {
        (Some(message), _) => Some(json!({ "error": message })),
        (None, Some(data)) => Some(Value::Object(data.clone())),
        (None, None) => None,
    };

    let mut response = match body {
        Some(body) => (status, Json(body)).into_response(),
        None => status.into_response(),
    };
    insert_trace_headers(&mut response, envelope.trace_context().as_ref());
    response
}

fn error_response(status: StatusCode, message: &str, trace: Option<&TraceContext>) -> Response {
    let mut response = (status, Json(json!({ "error": message }))).into_response();
    insert_trace_headers(&mut response, trace);
    response
}

fn insert_trace_headers(response: &mut Response, trace: Option<&TraceContext>) {
    let Some(context) = trace else {
        return;
    };
    for (name, value) in trace_headers(context) {
        if let Ok(value) = HeaderValue::from_str(&value) {
            response.headers_mut().insert(name, value);
        }
    }
}
