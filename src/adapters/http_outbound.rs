//! HTTP outbound adapter backed by `reqwest`.
use std::{
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::{
    adapters::trace_propagation::{is_trace_header, trace_headers},
    config::models::OutboundAdapterSpec,
    core::{
        envelope::{Envelope, Payload},
        factory::AdapterFactory,
    },
    ports::adapter::{AdapterError, AdapterResult, OutboundAdapter},
};

pub const ADAPTER_TYPE: &str = "http";

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpOutboundSettings {
    /// Prefix for every delivered path, e.g. `http://billing:9000/api`
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Delivers envelopes as JSON HTTP requests to `base_url + envelope.path`.
///
/// `connect` validates the base URL and builds the client; `deliver` fails
/// with [`AdapterError::NotConnected`] before that.
pub struct HttpOutboundAdapter {
    name: String,
    settings: HttpOutboundSettings,
    client: RwLock<Option<(Client, Url)>>,
    connected: AtomicBool,
}

impl HttpOutboundAdapter {
    pub fn from_spec(spec: &OutboundAdapterSpec) -> AdapterResult<Self> {
        let settings: HttpOutboundSettings =
            spec.settings_as().map_err(|e| AdapterError::InvalidSettings {
                adapter: spec.name.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            name: spec.name.clone(),
            settings,
            client: RwLock::new(None),
            connected: AtomicBool::new(false),
        })
    }

    fn connection(&self) -> AdapterResult<(Client, Url)> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| AdapterError::NotConnected {
                adapter: self.name.clone(),
            })
    }

    fn deliver_error(&self, message: impl Into<String>) -> AdapterError {
        AdapterError::Deliver {
            adapter: self.name.clone(),
            message: message.into(),
        }
    }
}

/// Register the `http` outbound constructor.
pub fn register(factory: &AdapterFactory) {
    factory.register_outbound(ADAPTER_TYPE, |spec: &OutboundAdapterSpec| {
        let adapter = HttpOutboundAdapter::from_spec(spec)?;
        Ok(Arc::new(adapter) as Arc<dyn OutboundAdapter>)
    });
}

#[async_trait]
impl OutboundAdapter for HttpOutboundAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> AdapterResult<()> {
        let connect_error = |message: String| AdapterError::Connect {
            adapter: self.name.clone(),
            message,
        };

        let base_url = Url::parse(&self.settings.base_url).map_err(|e| {
            connect_error(format!(
                "invalid base_url '{}': {e}",
                self.settings.base_url
            ))
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(connect_error(format!(
                "unsupported scheme '{}'",
                base_url.scheme()
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(self.settings.timeout_secs))
            .build()
            .map_err(|e| connect_error(e.to_string()))?;

        *self.client.write().unwrap_or_else(PoisonError::into_inner) = Some((client, base_url));
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(
            adapter = %self.name,
            base_url = %self.settings.base_url,
            "HTTP outbound adapter connected"
        );
        Ok(())
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        self.client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn deliver(&self, envelope: Envelope) -> AdapterResult<Envelope> {
        let (client, base_url) = self.connection()?;

        let mut url = join_path(&base_url, &envelope.path)
            .map_err(|e| self.deliver_error(format!("invalid path '{}': {e}", envelope.path)))?;
        if !envelope.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &envelope.query_params {
                pairs.append_pair(key, &value_to_string(value));
            }
        }

        let method = match &envelope.method {
            Some(method) => Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|e| self.deliver_error(format!("invalid method '{method}': {e}")))?,
            None => Method::POST,
        };

        let mut request = client.request(method.clone(), url.clone());
        for (name, value) in &envelope.headers {
            if !is_hop_header(name) && !is_trace_header(name) {
                request = request.header(name.as_str(), value.as_str());
            }
        }
        if let Some(context) = envelope.trace_context() {
            for (name, value) in trace_headers(&context) {
                request = request.header(name, value);
            }
        }
        if let Some(body) = &envelope.body {
            request = request.json(body);
        }

        tracing::debug!(adapter = %self.name, %method, %url, "Delivering envelope over HTTP");
        let response = request
            .send()
            .await
            .map_err(|e| self.deliver_error(e.to_string()))?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.deliver_error(e.to_string()))?;
        let data = parse_response_body(&bytes);

        let failed = status.is_client_error() || status.is_server_error();
        let error_message = failed.then(|| {
            data.as_ref()
                .and_then(|d| d.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!(
                        "upstream returned {}",
                        status.canonical_reason().unwrap_or(status.as_str())
                    )
                })
        });

        let mut reply = Envelope {
            path: envelope.path.clone(),
            method: Some(method.to_string()),
            headers,
            status_code: status.as_u16(),
            data,
            error_message,
            ..Envelope::default()
        }
        .with_metadata("adapter", self.name.clone());
        reply.set_trace_context(envelope.trace_context().as_ref());
        Ok(reply)
    }
}

fn join_path(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// Connection-level headers are the client's business
fn is_hop_header(name: &str) -> bool {
    ["host", "content-length", "connection", "transfer-encoding"]
        .iter()
        .any(|hop| name.eq_ignore_ascii_case(hop))
}

fn parse_response_body(bytes: &[u8]) -> Option<Payload> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    let payload = match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => map,
        Ok(other) => Payload::from_iter([("value".to_string(), other)]),
        Err(_) => Payload::from_iter([(
            "text".to_string(),
            Value::String(String::from_utf8_lossy(bytes).into_owned()),
        )]),
    };
    Some(payload)
}
