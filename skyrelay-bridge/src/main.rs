//! Flight-simulator telemetry bridge.
//!
//! Samples the simulator at a fixed rate and relays each sample to local
//! WebSocket consumers or to a cloud relay session.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use skyrelay_framework::{RelayArgs, RelayConfig, RelayRunner, parse_with_default_config};

use skyrelay_bridge::builder::SampleBuilder;
use skyrelay_bridge::config::{BridgeConfig, TransportMode};
use skyrelay_bridge::hub::DistributionHub;
use skyrelay_bridge::relay::RelayLoop;
use skyrelay_bridge::sensor;
use skyrelay_bridge::transport::SampleSink;
use skyrelay_bridge::transport::client::{
    ClientSettings, ClientSink, RelayClient, WsConnector, relay_url,
};
use skyrelay_bridge::transport::server::WsServer;

#[derive(Parser, Debug)]
#[command(about = "Flight-simulator telemetry bridge")]
struct Args {
    #[command(flatten)]
    relay: RelayArgs,

    /// Store this session id in the session file before starting.
    #[arg(long)]
    session_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args: Args = parse_with_default_config("skyrelay-bridge.json5");

    // Load configuration using the framework's RelayConfig trait
    let config = BridgeConfig::load(&args.relay.config).map_err(|e| anyhow::anyhow!("{}", e))?;

    // Create the runner (initializes logging)
    let mut runner = RelayRunner::new_with_args("skyrelay-bridge", config, Some(&args.relay))
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    let relay_settings = runner.config().relay.clone();
    let transport = runner.config().transport.clone();

    // Without a sensor there is nothing to relay
    let sensor = match sensor::open(&runner.config().sensor, relay_settings.rate_hz) {
        Ok(sensor) => sensor,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize sensor");
            return Err(e.into());
        }
    };

    let sink: Arc<dyn SampleSink> = match transport.mode {
        TransportMode::Server => {
            let hub = Arc::new(DistributionHub::new());
            let server = WsServer::bind(&transport.server, hub.clone())
                .await
                .map_err(|e| anyhow::anyhow!("binding {}: {}", transport.server.listen, e))?;
            runner.spawn_with_error("ws-server", server.run(runner.shutdown_signal()));
            hub as Arc<dyn SampleSink>
        }
        TransportMode::Client => {
            let session = transport
                .client
                .resolve_session(args.session_id.as_deref())
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            let url = relay_url(&transport.client.endpoint, session.session_id())?;
            tracing::info!(
                endpoint = %transport.client.endpoint,
                session = %session.session_id(),
                "Client role"
            );

            let (sink, samples) = ClientSink::new();
            let client = RelayClient::new(
                WsConnector,
                url,
                ClientSettings::from(&transport.client),
            );
            runner.spawn_with_error("relay-client", client.run(samples, runner.shutdown_signal()));
            Arc::new(sink)
        }
    };

    let relay = RelayLoop::new(
        sensor,
        SampleBuilder::new(relay_settings.angle_units),
        sink,
        relay_settings.period(),
        relay_settings.format,
    );
    runner.spawn("relay-loop", relay.run(runner.shutdown_signal()));

    // Run until Ctrl+C (handles shutdown gracefully)
    runner.run().await.map_err(|e| anyhow::anyhow!("{}", e))
}
