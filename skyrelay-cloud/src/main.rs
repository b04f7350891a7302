//! Cloud WebSocket relay for SkyRelay.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use skyrelay_framework::{RelayArgs, RelayConfig, RelayRunner, parse_with_default_config};

use skyrelay_cloud::{CloudConfig, CloudServer, SessionRegistry};

#[derive(Parser, Debug)]
#[command(name = "skyrelay-cloud")]
#[command(about = "Relay bridge telemetry to remote viewers by session")]
#[command(version)]
struct Args {
    #[command(flatten)]
    relay: RelayArgs,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Args = parse_with_default_config("skyrelay-cloud.json5");

    // Load configuration; without a file the defaults apply
    let from_file = args.relay.config.exists();
    let mut config = if from_file {
        CloudConfig::load(&args.relay.config).map_err(|e| anyhow::anyhow!("{}", e))?
    } else {
        CloudConfig::default()
    };

    // Override listen address from CLI
    if let Some(listen) = args.listen {
        config.listen = listen;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
    }

    let mut runner = RelayRunner::new_with_args("skyrelay-cloud", config, Some(&args.relay))
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    if !from_file {
        tracing::info!(path = %args.relay.config.display(), "No config file, using defaults");
    }

    let registry = Arc::new(SessionRegistry::new(runner.config().session_idle()));
    let server = CloudServer::bind(runner.config(), registry, runner.shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", runner.config().listen, e))?;

    runner.spawn_with_error("http", server.run(runner.shutdown_signal()));

    // Run until Ctrl+C (handles shutdown gracefully)
    runner.run().await.map_err(|e| anyhow::anyhow!("{}", e))
}
