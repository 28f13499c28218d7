pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{DEFAULT_CONFIG_TEMPLATE, load_config, load_config_str};
pub use models::*;
pub use validation::{ConfigValidator, ValidationError, ValidationResult};

pub use ::config::FileFormat;
