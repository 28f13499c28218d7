use std::collections::{HashMap, HashSet};

use regex::Regex;
use tracing_subscriber::EnvFilter;

use crate::{
    config::models::{HexSwitchConfig, InboundAdapterSpec, OutboundAdapterSpec},
    core::factory::AdapterFactory,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

const NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$";

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Duplicate {kind} name '{name}'")]
    DuplicateName { kind: String, name: String },

    #[error("Port '{port}' is bound to both '{first}' and '{second}'")]
    PortBoundTwice {
        port: String,
        first: String,
        second: String,
    },

    #[error("Unknown {direction} adapter type '{adapter_type}' for adapter '{adapter}'")]
    UnknownAdapterType {
        adapter: String,
        adapter_type: String,
        direction: String,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Checks a [`HexSwitchConfig`] before it is turned into an execution plan.
///
/// Every problem found is collected; a single `ValidationFailed` error lists
/// them all.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate structure and cross references.
    pub fn validate(config: &HexSwitchConfig) -> ValidationResult<()> {
        Self::finish(Self::collect_errors(config))
    }

    /// [`validate`](Self::validate), plus check that every adapter type is
    /// known to `factory`.
    pub fn validate_with_factory(
        config: &HexSwitchConfig,
        factory: &AdapterFactory,
    ) -> ValidationResult<()> {
        let mut errors = Self::collect_errors(config);

        for spec in &config.inbound {
            if factory.inbound_constructor(&spec.adapter_type).is_none() {
                errors.push(ValidationError::UnknownAdapterType {
                    adapter: spec.name.clone(),
                    adapter_type: spec.adapter_type.clone(),
                    direction: "inbound".to_string(),
                });
            }
        }
        for spec in &config.outbound {
            if factory.outbound_constructor(&spec.adapter_type).is_none() {
                errors.push(ValidationError::UnknownAdapterType {
                    adapter: spec.name.clone(),
                    adapter_type: spec.adapter_type.clone(),
                    direction: "outbound".to_string(),
                });
            }
        }

        Self::finish(errors)
    }

    fn collect_errors(config: &HexSwitchConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let name_regex = match Regex::new(NAME_PATTERN) {
            Ok(regex) => regex,
            Err(e) => {
                return vec![ValidationError::ValidationFailed {
                    message: format!("name pattern failed to compile: {e}"),
                }];
            }
        };

        if let Err(e) = config.runtime.shutdown_grace() {
            errors.push(ValidationError::InvalidField {
                field: "runtime.shutdown_grace".to_string(),
                message: format!("'{}' is not a duration: {e}", config.runtime.shutdown_grace),
            });
        }

        if let Err(e) = EnvFilter::try_new(&config.logging.level) {
            errors.push(ValidationError::InvalidField {
                field: "logging.level".to_string(),
                message: format!("'{}' is not a valid filter: {e}", config.logging.level),
            });
        }

        let mut port_names = HashSet::new();
        for (i, port) in config.ports.iter().enumerate() {
            Self::check_name(&name_regex, &port.name, &format!("ports[{i}].name"), &mut errors);
            if !port_names.insert(port.name.as_str()) {
                errors.push(ValidationError::DuplicateName {
                    kind: "port".to_string(),
                    name: port.name.clone(),
                });
            }
        }

        let mut adapter_names = HashSet::new();
        for (i, spec) in config.inbound.iter().enumerate() {
            Self::validate_inbound(&name_regex, i, spec, &mut errors);
            if !adapter_names.insert(spec.name.as_str()) {
                errors.push(ValidationError::DuplicateName {
                    kind: "adapter".to_string(),
                    name: spec.name.clone(),
                });
            }
        }

        let mut bound_by: HashMap<&str, &str> = HashMap::new();
        for (i, spec) in config.outbound.iter().enumerate() {
            Self::validate_outbound(&name_regex, i, spec, &mut errors);
            if !adapter_names.insert(spec.name.as_str()) {
                errors.push(ValidationError::DuplicateName {
                    kind: "adapter".to_string(),
                    name: spec.name.clone(),
                });
            }
            for port in &spec.bound_ports {
                if let Some(first) = bound_by.insert(port.as_str(), spec.name.as_str()) {
                    errors.push(ValidationError::PortBoundTwice {
                        port: port.clone(),
                        first: first.to_string(),
                        second: spec.name.clone(),
                    });
                }
            }
        }

        errors
    }

    fn validate_inbound(
        name_regex: &Regex,
        index: usize,
        spec: &InboundAdapterSpec,
        errors: &mut Vec<ValidationError>,
    ) {
        let context = format!("inbound[{index}]");
        Self::check_name(name_regex, &spec.name, &format!("{context}.name"), errors);
        if spec.adapter_type.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("{context}.type"),
            });
        }

        for (j, route) in spec.routes.iter().enumerate() {
            if !route.path.starts_with('/') {
                errors.push(ValidationError::InvalidField {
                    field: format!("{context}.routes[{j}].path"),
                    message: format!("Route path '{}' must start with '/'", route.path),
                });
            }
            if route.port.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("{context}.routes[{j}].port"),
                });
            }
        }
    }

    fn validate_outbound(
        name_regex: &Regex,
        index: usize,
        spec: &OutboundAdapterSpec,
        errors: &mut Vec<ValidationError>,
    ) {
        let context = format!("outbound[{index}]");
        Self::check_name(name_regex, &spec.name, &format!("{context}.name"), errors);
        if spec.adapter_type.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("{context}.type"),
            });
        }
        if spec.bound_ports.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: format!("{context}.bound_ports"),
                message: "Outbound adapters must bind at least one port".to_string(),
            });
        }
        for port in spec.bound_ports.iter().filter(|p| p.trim().is_empty()) {
            errors.push(ValidationError::InvalidField {
                field: format!("{context}.bound_ports"),
                message: format!("Invalid port name '{port}'"),
            });
        }
    }

    fn check_name(name_regex: &Regex, name: &str, field: &str, errors: &mut Vec<ValidationError>) {
        if name.is_empty() {
            errors.push(ValidationError::MissingField {
                field: field.to_string(),
            });
        } else if !name_regex.is_match(name) {
            errors.push(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!(
                    "'{name}' must start with a letter or digit and contain only \
                     letters, digits, '_', '-' or '.'"
                ),
            });
        }
    }

    fn finish(errors: Vec<ValidationError>) -> ValidationResult<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
