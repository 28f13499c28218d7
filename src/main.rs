use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use hexswitch::{
    AdapterFactory, Envelope, PortRegistry, Runtime,
    config::{ConfigValidator, DEFAULT_CONFIG_TEMPLATE, HexSwitchConfig, load_config},
    metrics,
    ports::handler::handler_fn,
    tracing_setup,
};
use serde_json::{Value, json};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "hexswitch.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start the runtime (default)
    Run {
        /// Configuration file to use
        #[clap(short, long, default_value = "hexswitch.toml")]
        config: String,
    },
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "hexswitch.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "hexswitch.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config),
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Run { config }) => run_command(&config).await,
        None => run_command(&args.config).await,
    }
}

async fn run_command(config_path: &str) -> Result<()> {
    let config = load_config(config_path)
        .with_context(|| format!("Failed to load configuration from {config_path}"))?;

    tracing_setup::init_tracing(&config.logging)?;
    metrics::init_metrics()?;

    let factory = Arc::new(AdapterFactory::with_builtin_adapters());
    ConfigValidator::validate_with_factory(&config, &factory)
        .map_err(|e| eyre!("Configuration validation failed: {e}"))?;

    let registry = Arc::new(PortRegistry::new());
    for port in &config.ports {
        registry.declare_port(&port.name, port.strategy);
    }
    register_builtin_handlers(&config, &registry);

    let grace = config
        .runtime
        .shutdown_grace()
        .wrap_err("Invalid runtime.shutdown_grace")?;

    let runtime = Runtime::builder(config.execution_plan())
        .registry(registry)
        .factory(factory)
        .shutdown_grace(grace)
        .build();

    tracing::info!(
        config = config_path,
        ports = ?runtime.registry().port_names(),
        "Starting HexSwitch"
    );
    runtime
        .run_until_shutdown()
        .await
        .wrap_err("HexSwitch runtime failed")?;

    tracing::info!("HexSwitch shut down cleanly");
    Ok(())
}

/// Install the `echo` and `health` handlers on ports the plan routes to.
fn register_builtin_handlers(config: &HexSwitchConfig, registry: &PortRegistry) {
    let routed = config.execution_plan().routed_ports();

    if routed.iter().any(|port| port == "echo") {
        registry.register_handler(
            "echo",
            handler_fn("echo", |envelope: Envelope| async move {
                Ok(Some(Envelope::success(envelope.body.unwrap_or_default())))
            }),
        );
        tracing::info!("Registered built-in handler on port 'echo'");
    }

    if routed.iter().any(|port| port == "health") {
        registry.register_handler(
            "health",
            handler_fn("health", |_envelope: Envelope| async move {
                let mut data = hexswitch::Payload::new();
                data.insert("status".to_string(), Value::from("ok"));
                data.insert("version".to_string(), json!(env!("CARGO_PKG_VERSION")));
                Ok(Some(Envelope::success(data)))
            }),
        );
        tracing::info!("Registered built-in handler on port 'health'");
    }
}

fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path) {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    let factory = AdapterFactory::with_builtin_adapters();
    match ConfigValidator::validate_with_factory(&config, &factory) {
        Ok(()) => {
            let plan = config.execution_plan();
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Inbound adapters: {}", plan.inbound.len());
            println!("   • Outbound adapters: {}", plan.outbound.len());
            println!("   • Declared ports: {}", config.ports.len());
            println!("   • Routed ports: {}", plan.routed_ports().join(", "));
            println!("   • Shutdown grace: {}", config.runtime.shutdown_grace);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    tokio::fs::write(path, DEFAULT_CONFIG_TEMPLATE)
        .await
        .with_context(|| format!("Failed to write {config_path}"))?;

    println!("✅ Created configuration file: {config_path}");
    println!("   Run it with: hexswitch run --config {config_path}");
    Ok(())
}
