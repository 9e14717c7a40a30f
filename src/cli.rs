/// opsclaw endpoint agent: enrolls this device with a broker and holds
/// the persistent WebSocket over which tool calls arrive.
///
/// With no flag the agent runs its connection loop until the broker orders
/// a disconnect. Exit codes: 0 on success, 1 when the device is not
/// enrolled or enrollment fails.
use std::sync::Arc;

use clap::Parser;

use opsclaw::agent::AgentRuntime;
use opsclaw::audit::AuditLog;
use opsclaw::config::load_default_config;
use opsclaw::executor::{Executor, ExecutorConfig};
use opsclaw::identity::{IdentityStore, enroll};
use opsclaw::tools::{ToolRegistry, register_builtin_tools};

#[derive(Parser, Debug)]
#[command(
    name = "opsclaw",
    about = "opsclaw endpoint agent",
    version,
    long_about = "Endpoint agent for the opsclaw tool-execution fabric.\n\
                  Run without flags to connect to the enrolled broker."
)]
struct Cli {
    /// Enroll this device using a one-time code from the broker operator.
    #[arg(long, value_name = "CODE")]
    enroll: Option<String>,

    /// Delete the persisted device identity.
    #[arg(long)]
    reset: bool,

    /// Report whether this device is enrolled.
    #[arg(long)]
    status: bool,

    /// Broker URL used for enrollment (defaults to the configured one).
    #[arg(long, value_name = "URL")]
    broker_url: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_default_config();
    opsclaw::logging::init(&config.logging.level);

    let identity_dir = config
        .identity
        .dir
        .clone()
        .unwrap_or_else(IdentityStore::default_dir);
    let store = IdentityStore::new(identity_dir);

    let code = run(cli, &store, config).await;
    std::process::exit(code);
}

async fn run(cli: Cli, store: &IdentityStore, config: opsclaw::config::AppConfig) -> i32 {
    if cli.reset {
        return match store.clear() {
            Ok(()) => {
                println!("device identity cleared");
                0
            }
            Err(e) => {
                eprintln!("failed to clear identity: {e}");
                1
            }
        };
    }

    if cli.status {
        return match store.load() {
            Ok(identity) => {
                println!(
                    "enrolled as {} (broker {})",
                    identity.device_id, identity.broker_url
                );
                0
            }
            Err(_) => {
                println!("not enrolled");
                1
            }
        };
    }

    if let Some(enroll_code) = &cli.enroll {
        let broker_url = cli
            .broker_url
            .clone()
            .unwrap_or_else(|| config.endpoint.broker_url.clone());
        return match enroll(&broker_url, enroll_code).await {
            Ok(identity) => match store.save(&identity) {
                Ok(()) => {
                    println!("enrolled as {}", identity.device_id);
                    0
                }
                Err(e) => {
                    eprintln!("enrollment succeeded but saving identity failed: {e}");
                    1
                }
            },
            Err(e) => {
                eprintln!("enrollment failed: {e}");
                1
            }
        };
    }

    // Default: run the agent runtime.
    let identity = match store.load() {
        Ok(identity) => identity,
        Err(_) => {
            eprintln!("device is not enrolled; run `opsclaw --enroll CODE` first");
            return 1;
        }
    };

    let mut registry = ToolRegistry::new();
    if let Err(e) = register_builtin_tools(&mut registry) {
        eprintln!("failed to register built-in tools: {e}");
        return 1;
    }

    let executor = Arc::new(Executor::new(
        Arc::new(registry),
        ExecutorConfig {
            command_timeout_secs: config.executor.command_timeout_secs,
            max_output_bytes: config.executor.max_output_bytes,
            rate_limit_requests: config.executor.rate_limit_requests,
            rate_limit_window_secs: config.executor.rate_limit_window_secs,
        },
    ));

    let audit = match AuditLog::new(config.log_dir()) {
        Ok(audit) => Arc::new(audit),
        Err(e) => {
            eprintln!("failed to open audit log: {e}");
            return 1;
        }
    };

    let runtime = AgentRuntime::new(identity, executor, audit, config.endpoint.clone());
    match runtime.run().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("agent stopped: {e}");
            1
        }
    }
}
