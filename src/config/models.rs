//! Configuration data structures for HexSwitch.
//!
//! [`HexSwitchConfig`] maps directly onto TOML (also JSON / YAML) files. The
//! runtime never sees it: [`HexSwitchConfig::execution_plan`] reduces it to an
//! [`ExecutionPlan`], the adapter-agnostic description of what to start.
use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::core::routing::RoutingStrategy;

/// Free-form adapter settings, interpreted by the adapter itself.
pub type Settings = Map<String, Value>;

fn default_shutdown_grace() -> String {
    "5s".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Maps an inbound protocol route onto a port.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    /// Protocol path pattern, e.g. `/orders/{id}`
    pub path: String,
    /// Protocol verb; `None` matches any
    #[serde(default)]
    pub method: Option<String>,
    /// Port receiving the dispatched envelope
    pub port: String,
}

impl RouteSpec {
    pub fn new(path: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: None,
            port: port.into(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }
}

/// Descriptor of one inbound adapter.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InboundAdapterSpec {
    /// Factory key, e.g. `http`
    #[serde(rename = "type")]
    pub adapter_type: String,
    pub name: String,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
}

impl InboundAdapterSpec {
    pub fn new(adapter_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            adapter_type: adapter_type.into(),
            name: name.into(),
            settings: Settings::new(),
            routes: Vec::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn with_route(mut self, route: RouteSpec) -> Self {
        self.routes.push(route);
        self
    }

    /// Deserialize the settings map into an adapter-specific type.
    pub fn settings_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.settings.clone()))
    }
}

/// Descriptor of one outbound adapter and the ports it serves.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OutboundAdapterSpec {
    #[serde(rename = "type")]
    pub adapter_type: String,
    pub name: String,
    #[serde(default)]
    pub settings: Settings,
    /// Port names that `Runtime::emit` resolves to this adapter
    #[serde(default)]
    pub bound_ports: Vec<String>,
}

impl OutboundAdapterSpec {
    pub fn new(adapter_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            adapter_type: adapter_type.into(),
            name: name.into(),
            settings: Settings::new(),
            bound_ports: Vec::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn bind_port(mut self, port: impl Into<String>) -> Self {
        self.bound_ports.push(port.into());
        self
    }

    pub fn settings_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.settings.clone()))
    }
}

/// Ordered list of adapters to bring up. Produced by the config loader (or
/// built in code) and consumed by `Runtime`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ExecutionPlan {
    #[serde(default)]
    pub inbound: Vec<InboundAdapterSpec>,
    #[serde(default)]
    pub outbound: Vec<OutboundAdapterSpec>,
}

impl ExecutionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inbound(mut self, spec: InboundAdapterSpec) -> Self {
        self.inbound.push(spec);
        self
    }

    pub fn outbound(mut self, spec: OutboundAdapterSpec) -> Self {
        self.outbound.push(spec);
        self
    }

    /// Every port referenced by an inbound route, in first-seen order.
    pub fn routed_ports(&self) -> Vec<String> {
        let mut ports: Vec<String> = Vec::new();
        for route in self.inbound.iter().flat_map(|spec| spec.routes.iter()) {
            if !ports.contains(&route.port) {
                ports.push(route.port.clone());
            }
        }
        ports
    }

    pub fn adapter_count(&self) -> usize {
        self.inbound.len() + self.outbound.len()
    }
}

/// Strategy declaration for a port.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub name: String,
    #[serde(default)]
    pub strategy: RoutingStrategy,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeSettings {
    /// How long draining waits for adapters, humantime syntax (`5s`, `1m`)
    pub shutdown_grace: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

impl RuntimeSettings {
    pub fn shutdown_grace(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.shutdown_grace)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directive, e.g. `info` or `hexswitch=debug`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct HexSwitchConfig {
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    #[serde(default)]
    pub inbound: Vec<InboundAdapterSpec>,
    #[serde(default)]
    pub outbound: Vec<OutboundAdapterSpec>,
}

impl HexSwitchConfig {
    /// Reduce the file model to what the runtime consumes.
    pub fn execution_plan(&self) -> ExecutionPlan {
        ExecutionPlan {
            inbound: self.inbound.clone(),
            outbound: self.outbound.clone(),
        }
    }
}
