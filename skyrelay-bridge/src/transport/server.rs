//! Server role: accept local WebSocket consumers and feed them from the hub.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

use skyrelay_common::ControlMessage;

use super::TransportError;
use crate::config::ServerConfig;
use crate::hub::{ConsumerChannel, DistributionHub, OutboxChannel};

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on the WebSocket upgrade of a new connection.
const UPGRADE_TIMEOUT: Duration = Duration::from_secs(5);

/// Any routable address works; nothing is sent to it.
const ROUTE_PROBE_ADDR: &str = "8.8.8.8:80";

/// Address of the interface the default route leaves through.
///
/// Connecting a UDP socket only selects a route, so this works offline as
/// long as a default route exists.
pub async fn lan_address() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket.connect(ROUTE_PROBE_ADDR).await.ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// The URL consumers on the LAN should use for a server bound to `bound`.
pub fn consumer_url(bound: SocketAddr, lan: Option<IpAddr>) -> String {
    let addr = match lan {
        Some(ip) if bound.ip().is_unspecified() => SocketAddr::new(ip, bound.port()),
        _ => bound,
    };
    format!("ws://{}", addr)
}

/// Listening WebSocket server.
pub struct WsServer {
    listener: TcpListener,
    hub: Arc<DistributionHub>,
    greeting: Arc<str>,
}

impl WsServer {
    /// Bind the listening socket.
    pub async fn bind(
        config: &ServerConfig,
        hub: Arc<DistributionHub>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(&config.listen).await?;
        let bound = listener.local_addr()?;
        let lan = if bound.ip().is_unspecified() {
            lan_address().await
        } else {
            None
        };
        tracing::info!(
            listen = %bound,
            url = %consumer_url(bound, lan),
            "WebSocket server listening"
        );
        Ok(Self {
            listener,
            hub,
            greeting: Arc::from(config.greeting.as_str()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept consumers until shutdown, then close every attached channel.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), TransportError> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let hub = self.hub.clone();
                        let greeting = self.greeting.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_consumer(stream, peer, hub, greeting, shutdown).await {
                                tracing::warn!(peer = %peer, error = %e, "Consumer connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        self.hub.close_all();
        tracing::info!("WebSocket server stopped");
        Ok(())
    }
}

async fn handle_consumer(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<DistributionHub>,
    greeting: Arc<str>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TransportError> {
    let ws = tokio::time::timeout(UPGRADE_TIMEOUT, tokio_tungstenite::accept_async(stream))
        .await
        .map_err(|_| TransportError::ConnectTimeout(UPGRADE_TIMEOUT))??;
    let (mut write, mut read) = ws.split();

    let id = hub.next_channel_id();
    let (channel, mut outbox) = OutboxChannel::new(id);
    tracing::debug!(peer = %peer, channel = id, "Consumer handshaking");

    write
        .send(Message::Text(ControlMessage::hello(&*greeting).to_json()))
        .await?;
    channel.mark_open();

    if !hub.attach(channel.clone()) {
        // Shutdown raced the handshake.
        let _ = write.send(Message::Close(None)).await;
        channel.mark_closed();
        return Ok(());
    }

    let result = loop {
        tokio::select! {
            frame = outbox.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = write.send(frame.into_message()).await {
                        break Err(e.into());
                    }
                    channel.write_done();
                }
                None => {
                    // Hub closed the channel.
                    let _ = write.send(Message::Close(None)).await;
                    break Ok(());
                }
            },
            msg = read.next() => match msg {
                None | Some(Ok(Message::Close(_))) => break Ok(()),
                Some(Err(e)) => break Err(e.into()),
                Some(Ok(_)) => {}
            },
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                break Ok(());
            }
        }
    };

    hub.detach(channel.id());
    channel.mark_closed();
    tracing::info!(peer = %peer, channel = id, "Consumer disconnected");
    result
}
