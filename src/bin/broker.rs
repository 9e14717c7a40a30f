/// opsclaw broker daemon: accepts device WebSocket connections and routes
/// tool calls from callers to devices.
use std::sync::Arc;

use clap::Parser;

use opsclaw::broker::start_broker;
use opsclaw::config::load_default_config;
use opsclaw::tools::{ToolRegistry, register_builtin_tools};

#[derive(Parser, Debug)]
#[command(
    name = "opsclaw-broker",
    about = "opsclaw broker daemon",
    version
)]
struct Cli {
    /// Bind host (overrides config and OPSCLAW_BROKER_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides config and OPSCLAW_BROKER_PORT).
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut config = load_default_config();
    opsclaw::logging::init(&config.logging.level);

    if let Some(host) = cli.host {
        config.broker.host = host;
    }
    if let Some(port) = cli.port {
        config.broker.port = port;
    }

    let mut registry = ToolRegistry::new();
    if let Err(e) = register_builtin_tools(&mut registry) {
        eprintln!("failed to register built-in tools: {e}");
        std::process::exit(1);
    }

    if let Err(e) = start_broker(config, Arc::new(registry)).await {
        eprintln!("broker failed: {e}");
        std::process::exit(1);
    }
}
