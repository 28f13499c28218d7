//! Adapter constructor registry.
//!
//! Protocol adapter modules register a constructor under a type name
//! (`"http"`, `"nats"`, ...). The runtime resolves execution plan descriptors
//! through this table, so it never names a concrete adapter type.
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use crate::{
    config::models::{InboundAdapterSpec, OutboundAdapterSpec},
    core::runtime::RuntimeHandle,
    ports::adapter::{AdapterResult, InboundAdapter, OutboundAdapter},
};

/// Builds an inbound adapter from its descriptor. The handle is how the
/// adapter dispatches envelopes into the runtime.
pub type InboundConstructor = Arc<
    dyn Fn(&InboundAdapterSpec, RuntimeHandle) -> AdapterResult<Arc<dyn InboundAdapter>>
        + Send
        + Sync,
>;

/// Builds an outbound adapter from its descriptor.
pub type OutboundConstructor =
    Arc<dyn Fn(&OutboundAdapterSpec) -> AdapterResult<Arc<dyn OutboundAdapter>> + Send + Sync>;

/// Registry of adapter-type name to constructor.
#[derive(Default)]
pub struct AdapterFactory {
    inbound: RwLock<HashMap<String, InboundConstructor>>,
    outbound: RwLock<HashMap<String, OutboundConstructor>>,
}

impl AdapterFactory {
    /// Empty factory; callers register every adapter type they need.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory with the adapters shipped in this crate already registered.
    pub fn with_builtin_adapters() -> Self {
        let factory = Self::new();
        crate::adapters::register_builtin(&factory);
        factory
    }

    /// Register (or replace) the inbound constructor for `type_name`.
    pub fn register_inbound<F>(&self, type_name: &str, constructor: F)
    where
        F: Fn(&InboundAdapterSpec, RuntimeHandle) -> AdapterResult<Arc<dyn InboundAdapter>>
            + Send
            + Sync
            + 'static,
    {
        let replaced = self
            .inbound
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(type_name.to_string(), Arc::new(constructor))
            .is_some();
        if replaced {
            tracing::warn!(adapter_type = type_name, "Inbound adapter constructor replaced");
        } else {
            tracing::debug!(adapter_type = type_name, "Inbound adapter type registered");
        }
    }

    /// Register (or replace) the outbound constructor for `type_name`.
    pub fn register_outbound<F>(&self, type_name: &str, constructor: F)
    where
        F: Fn(&OutboundAdapterSpec) -> AdapterResult<Arc<dyn OutboundAdapter>>
            + Send
            + Sync
            + 'static,
    {
        let replaced = self
            .outbound
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(type_name.to_string(), Arc::new(constructor))
            .is_some();
        if replaced {
            tracing::warn!(adapter_type = type_name, "Outbound adapter constructor replaced");
        } else {
            tracing::debug!(adapter_type = type_name, "Outbound adapter type registered");
        }
    }

    pub fn inbound_constructor(&self, type_name: &str) -> Option<InboundConstructor> {
        self.inbound
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
            .cloned()
    }

    pub fn outbound_constructor(&self, type_name: &str) -> Option<OutboundConstructor> {
        self.outbound
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
            .cloned()
    }

    /// Registered inbound type names, sorted.
    pub fn inbound_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .inbound
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    /// Registered outbound type names, sorted.
    pub fn outbound_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .outbound
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }
}
