//! calc-node: hosts or calls a small calculator service.
//!
//! ```text
//! calc-node serve --port 7400
//! calc-node call --addr 127.0.0.1:7400 --a 2 --b 3
//! ```

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use courier_runtime::courier_core::NodeAddress;
use courier_runtime::discovery::MemoryDiscovery;
use courier_runtime::telemetry::{init_tracing, LogFormat};
use courier_runtime::{
    handler_fn, CourierConfig, CourierNode, InvokeArgs, MethodDefinition, ServerSettings,
    ServiceDefinition, ServiceDiscovery,
};

courier_runtime::service_client! {
    /// Typed client for the `Calc` service.
    pub struct CalcClient = "Calc" {
        fn add(a: i64, b: i64) -> i64 = "Add";
        fn sub(a: i64, b: i64) -> i64 = "Sub";
    }
}

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "calc-node", about = "Courier calculator demo node")]
struct Cli {
    /// JSON config file; command-line flags override its server and client
    /// sections.
    #[arg(long, env = "COURIER_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Host the `Calc` service until Ctrl-C.
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        #[arg(long, default_value_t = 7400)]
        port: u16,
    },
    /// Call `Calc/Add` and `Calc/Sub` on a running node.
    Call {
        /// Address of the serving node, `host:port`.
        #[arg(long, default_value = "127.0.0.1:7400")]
        addr: NodeAddress,

        #[arg(long)]
        a: i64,

        #[arg(long)]
        b: i64,
    },
}

// =============================================================================
// Service
// =============================================================================

fn calc_service(with_handlers: bool) -> ServiceDefinition {
    let mut add = MethodDefinition::new("Add").param("a", "i64").param("b", "i64");
    let mut sub = MethodDefinition::new("Sub").param("a", "i64").param("b", "i64");
    if with_handlers {
        add = add.handler(handler_fn(|args: InvokeArgs, _meta| async move {
            Ok::<_, anyhow::Error>(args.get::<i64>(0)? + args.get::<i64>(1)?)
        }));
        sub = sub.handler(handler_fn(|args: InvokeArgs, _meta| async move {
            Ok::<_, anyhow::Error>(args.get::<i64>(0)? - args.get::<i64>(1)?)
        }));
    }
    ServiceDefinition::new("Calc").method(add).method(sub)
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<CourierConfig> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            CourierConfig::from_json_str(&json)
        }
        None => Ok(CourierConfig::default()),
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_tracing("info", format)?;
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { host, port } => {
            let mut server: ServerSettings = config.server.take().unwrap_or_default();
            server.host = host;
            server.port = port;
            config.server = Some(server);

            let mut node = CourierNode::builder(config)
                .service(calc_service(true))
                .build()?;
            let address = node.start().await?;
            info!(address = ?address, "calc node ready, press Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            info!("shutting down");
            node.shutdown().await?;
        }
        Command::Call { addr, a, b } => {
            config.server = None;
            config.client.dependency_services.push("Calc".to_string());

            let discovery = Arc::new(MemoryDiscovery::new());
            discovery.register("Calc", addr).await?;

            let mut node = CourierNode::builder(config)
                .service(calc_service(false))
                .discovery(discovery)
                .build()?;
            node.start().await?;

            let calc = CalcClient::new(node.invoker());
            let sum = calc.add(a, b).await;
            let difference = calc.sub(a, b).await;
            node.shutdown().await?;

            println!("{a} + {b} = {}", sum?);
            println!("{a} - {b} = {}", difference?);
        }
    }
    Ok(())
}
