use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::HexSwitchConfig;

/// Starter configuration written by `hexswitch init`.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# HexSwitch configuration

[runtime]
shutdown_grace = "5s"

[logging]
level = "info"
format = "json"   # json | pretty

[[ports]]
name = "echo"
strategy = "first"   # first | broadcast | round_robin

[[inbound]]
type = "http"
name = "public-api"
settings = { listen_addr = "127.0.0.1:8080" }
routes = [
    { path = "/echo", method = "POST", port = "echo" },
    { path = "/health", method = "GET", port = "health" },
]

# [[outbound]]
# type = "http"
# name = "billing"
# bound_ports = ["billing"]
# settings = { base_url = "http://localhost:9000", timeout_secs = 10 }
"#;

fn format_for(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        _ => FileFormat::Toml,
    }
}

/// Load configuration from a TOML, YAML or JSON file (by extension, TOML otherwise).
pub fn load_config(config_path: impl AsRef<Path>) -> Result<HexSwitchConfig> {
    let config_path = config_path.as_ref();
    let path_str = config_path
        .to_str()
        .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?;

    let settings = Config::builder()
        .add_source(File::new(path_str, format_for(config_path)))
        .build()
        .with_context(|| format!("Failed to read config from {}", config_path.display()))?;

    settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })
}

/// Parse configuration from an in-memory string.
pub fn load_config_str(content: &str, format: FileFormat) -> Result<HexSwitchConfig> {
    Config::builder()
        .add_source(File::from_str(content, format))
        .build()
        .wrap_err("Failed to parse config")?
        .try_deserialize()
        .wrap_err("Failed to deserialize config")
}
