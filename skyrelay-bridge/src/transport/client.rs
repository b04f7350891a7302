//! Client role: a single outbound connection to a cloud relay session.
//!
//! The connection state, including the pending retry deadline, lives in
//! [`Reconnect`]. The supervisor loop asks it what to do next and waits on
//! the tokio timer, so backoff runs on virtual time under test.

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use skyrelay_common::ControlMessage;

use super::{Frame, SampleSink, TransportError};
use crate::config::ClientConfig;

/// Connection state of the client role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not connected. With `retry_at` set, no attempt is made before it.
    Disconnected { retry_at: Option<Instant> },
    Connecting,
    Connected,
}

/// What the supervisor should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Connect,
    WaitUntil(Instant),
    /// A connection is in progress or established.
    Busy,
}

/// Reconnect state machine.
#[derive(Debug)]
pub struct Reconnect {
    state: LinkState,
    delay: Duration,
}

impl Reconnect {
    pub fn new(delay: Duration) -> Self {
        Self {
            state: LinkState::Disconnected { retry_at: None },
            delay,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn next_step(&self, now: Instant) -> Step {
        match self.state {
            LinkState::Disconnected { retry_at: None } => Step::Connect,
            LinkState::Disconnected { retry_at: Some(at) } if now >= at => Step::Connect,
            LinkState::Disconnected { retry_at: Some(at) } => Step::WaitUntil(at),
            LinkState::Connecting | LinkState::Connected => Step::Busy,
        }
    }

    /// Enter `Connecting`. Returns `false` if a connection is already in
    /// progress or established.
    pub fn begin_connect(&mut self) -> bool {
        match self.state {
            LinkState::Disconnected { .. } => {
                self.state = LinkState::Connecting;
                true
            }
            _ => false,
        }
    }

    pub fn connected(&mut self) {
        self.state = LinkState::Connected;
    }

    /// The connection failed or was lost; schedule the next attempt.
    pub fn lost(&mut self, now: Instant) -> Instant {
        let retry_at = now + self.delay;
        self.state = LinkState::Disconnected {
            retry_at: Some(retry_at),
        };
        retry_at
    }
}

/// Opens links to the relay.
pub trait Connector: Send + Sync + 'static {
    type Link: Link;

    fn connect(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Self::Link, TransportError>> + Send;
}

/// An open connection to the relay.
pub trait Link: Send + 'static {
    fn send(&mut self, frame: Frame) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Next inbound text message. `Ok(None)` once the peer has closed.
    fn recv(&mut self) -> impl Future<Output = Result<Option<String>, TransportError>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// [`Connector`] over tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

pub struct WsLink {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Connector for WsConnector {
    type Link = WsLink;

    async fn connect(&self, url: &str) -> Result<WsLink, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
        Ok(WsLink { ws })
    }
}

impl Link for WsLink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.ws.send(frame.into_message()).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.ws.next().await {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Timing knobs for the client role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    pub reconnect_delay: Duration,
    pub handshake_timeout: Duration,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for ClientSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            handshake_timeout: Duration::from_millis(config.handshake_timeout_ms),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            send_timeout: Duration::from_millis(config.send_timeout_ms),
        }
    }
}

/// Build the relay URL for a bridge joining `session_id`.
pub fn relay_url(endpoint: &str, session_id: &str) -> Result<String, TransportError> {
    let mut url =
        url::Url::parse(endpoint).map_err(|e| TransportError::Endpoint(e.to_string()))?;
    url.query_pairs_mut()
        .append_pair("role", "bridge")
        .append_pair("sessionId", session_id);
    Ok(url.into())
}

/// Latest-value slot between the relay loop and the client supervisor.
///
/// Samples overwrite each other; whatever the client has not sent by the
/// time the next one arrives is dropped.
pub struct ClientSink {
    tx: watch::Sender<Option<Frame>>,
}

impl ClientSink {
    pub fn new() -> (Self, watch::Receiver<Option<Frame>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }
}

impl SampleSink for ClientSink {
    fn deliver(&self, frame: Frame) {
        self.tx.send_replace(Some(frame));
    }
}

enum SessionEnd {
    Shutdown,
    Lost(TransportError),
}

/// Supervisor for the outbound connection.
pub struct RelayClient<C: Connector> {
    connector: C,
    url: String,
    settings: ClientSettings,
}

impl<C: Connector> RelayClient<C> {
    pub fn new(connector: C, url: impl Into<String>, settings: ClientSettings) -> Self {
        Self {
            connector,
            url: url.into(),
            settings,
        }
    }

    /// Keep a connection up and stream samples over it until shutdown.
    pub async fn run(
        self,
        mut samples: watch::Receiver<Option<Frame>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        let mut reconnect = Reconnect::new(self.settings.reconnect_delay);

        loop {
            match reconnect.next_step(Instant::now()) {
                Step::WaitUntil(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                Step::Busy => {
                    reconnect.lost(Instant::now());
                }
                Step::Connect => {
                    reconnect.begin_connect();
                    tracing::info!(url = %self.url, "Connecting to relay");

                    let attempt = tokio::select! {
                        r = tokio::time::timeout(
                            self.settings.connect_timeout,
                            self.connector.connect(&self.url),
                        ) => r,
                        _ = shutdown.changed() => break,
                    };

                    let mut link = match attempt {
                        Ok(Ok(link)) => link,
                        Ok(Err(e)) => {
                            self.schedule_retry(&mut reconnect, &e);
                            continue;
                        }
                        Err(_) => {
                            let e = TransportError::ConnectTimeout(self.settings.connect_timeout);
                            self.schedule_retry(&mut reconnect, &e);
                            continue;
                        }
                    };

                    reconnect.connected();
                    tracing::info!(url = %self.url, "Connected to relay");

                    match self.stream(&mut link, &mut samples, &mut shutdown).await {
                        SessionEnd::Shutdown => {
                            link.close().await;
                            break;
                        }
                        SessionEnd::Lost(e) => {
                            link.close().await;
                            self.schedule_retry(&mut reconnect, &e);
                        }
                    }
                }
            }
        }

        tracing::info!("Relay client stopped");
        Ok(())
    }

    fn schedule_retry(&self, reconnect: &mut Reconnect, error: &TransportError) {
        let retry_at = reconnect.lost(Instant::now());
        tracing::warn!(
            error = %error,
            retry_in = ?retry_at.saturating_duration_since(Instant::now()),
            "Relay connection lost"
        );
    }

    async fn stream(
        &self,
        link: &mut C::Link,
        samples: &mut watch::Receiver<Option<Frame>>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let handshake = tokio::select! {
            r = tokio::time::timeout(self.settings.handshake_timeout, link.recv()) => r,
            _ = shutdown.changed() => return SessionEnd::Shutdown,
        };
        match handshake {
            Ok(Ok(Some(text))) => match ControlMessage::parse(&text) {
                Some(ControlMessage::Connected { session_id, .. }) => {
                    tracing::info!(session = %session_id, "Relay confirmed session");
                }
                _ => tracing::debug!(message = %text, "Unexpected first message from relay"),
            },
            Ok(Ok(None)) => return SessionEnd::Lost(TransportError::Closed),
            Ok(Err(e)) => return SessionEnd::Lost(e),
            Err(_) => tracing::warn!(
                timeout = ?self.settings.handshake_timeout,
                "No session confirmation from relay, streaming anyway"
            ),
        }

        loop {
            tokio::select! {
                changed = samples.changed() => {
                    if changed.is_err() {
                        // Relay loop is gone.
                        return SessionEnd::Shutdown;
                    }
                    let Some(frame) = samples.borrow_and_update().clone() else {
                        continue;
                    };
                    match tokio::time::timeout(self.settings.send_timeout, link.send(frame)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => return SessionEnd::Lost(e),
                        Err(_) => {
                            return SessionEnd::Lost(TransportError::SendTimeout(
                                self.settings.send_timeout,
                            ));
                        }
                    }
                }
                msg = link.recv() => match msg {
                    Ok(Some(text)) => tracing::trace!(message = %text, "Message from relay"),
                    Ok(None) => return SessionEnd::Lost(TransportError::Closed),
                    Err(e) => return SessionEnd::Lost(e),
                },
                _ = shutdown.changed() => return SessionEnd::Shutdown,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone, Copy)]
    enum Behavior {
        RefuseConnect,
        FailFirstSend,
        Healthy,
        Silent,
    }

    #[derive(Clone, Default)]
    struct Record {
        attempts: Arc<Mutex<Vec<Instant>>>,
        sent: Arc<Mutex<Vec<Frame>>>,
        closed: Arc<AtomicBool>,
    }

    struct FakeConnector {
        script: Mutex<VecDeque<Behavior>>,
        fallback: Behavior,
        record: Record,
    }

    impl FakeConnector {
        fn new(script: &[Behavior], fallback: Behavior) -> (Self, Record) {
            let record = Record::default();
            let connector = Self {
                script: Mutex::new(script.iter().copied().collect()),
                fallback,
                record: record.clone(),
            };
            (connector, record)
        }
    }

    struct FakeLink {
        behavior: Behavior,
        handshake: Option<String>,
        record: Record,
    }

    impl Connector for FakeConnector {
        type Link = FakeLink;

        async fn connect(&self, _url: &str) -> Result<FakeLink, TransportError> {
            self.record.attempts.lock().push(Instant::now());
            let behavior = self.script.lock().pop_front().unwrap_or(self.fallback);
            if let Behavior::RefuseConnect = behavior {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                )));
            }
            let handshake = match behavior {
                Behavior::Silent => None,
                _ => Some(ControlMessage::connected("s1").to_json()),
            };
            Ok(FakeLink {
                behavior,
                handshake,
                record: self.record.clone(),
            })
        }
    }

    impl Link for FakeLink {
        async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
            if let Behavior::FailFirstSend = self.behavior {
                self.behavior = Behavior::Healthy;
                return Err(TransportError::Closed);
            }
            self.record.sent.lock().push(frame);
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<String>, TransportError> {
            match self.handshake.take() {
                Some(text) => Ok(Some(text)),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {
            self.record.closed.store(true, Ordering::SeqCst);
        }
    }

    fn frame(n: u32) -> Frame {
        Frame::Text(Arc::from(format!("{{\"ts\":{}}}", n)))
    }

    fn settings() -> ClientSettings {
        ClientSettings::default()
    }

    #[test]
    fn test_state_machine() {
        let now = Instant::now();
        let mut reconnect = Reconnect::new(Duration::from_secs(5));
        assert_eq!(reconnect.next_step(now), Step::Connect);

        assert!(reconnect.begin_connect());
        assert_eq!(reconnect.state(), LinkState::Connecting);
        assert_eq!(reconnect.next_step(now), Step::Busy);
        assert!(!reconnect.begin_connect());

        reconnect.connected();
        assert_eq!(reconnect.next_step(now), Step::Busy);
        assert!(!reconnect.begin_connect());

        let retry_at = reconnect.lost(now);
        assert_eq!(retry_at, now + Duration::from_secs(5));
        assert_eq!(reconnect.next_step(now), Step::WaitUntil(retry_at));
        assert_eq!(
            reconnect.next_step(now + Duration::from_millis(4999)),
            Step::WaitUntil(retry_at)
        );
        assert_eq!(reconnect.next_step(retry_at), Step::Connect);
    }

    #[test]
    fn test_relay_url() {
        assert_eq!(
            relay_url("wss://relay.example.com", "abc").unwrap(),
            "wss://relay.example.com/?role=bridge&sessionId=abc"
        );
        assert_eq!(
            relay_url("ws://localhost:3000/", "a b").unwrap(),
            "ws://localhost:3000/?role=bridge&sessionId=a+b"
        );
        assert!(relay_url("not a url", "abc").is_err());
    }

    #[test]
    fn test_settings_from_config() {
        let settings = settings();
        assert_eq!(settings.reconnect_delay, Duration::from_secs(5));
        assert_eq!(settings.handshake_timeout, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_send_failure_waits_backoff() {
        let (connector, record) = FakeConnector::new(&[Behavior::FailFirstSend], Behavior::Healthy);
        let (sink, samples) = ClientSink::new();
        let (stop_tx, stop_rx) = watch::channel(false);
        let client = RelayClient::new(connector, "ws://relay", settings());
        let task = tokio::spawn(client.run(samples, stop_rx));

        sink.deliver(frame(1));
        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert_eq!(record.attempts.lock().len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(record.attempts.lock().len(), 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let attempts = record.attempts.lock().clone();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1] - attempts[0] >= Duration::from_secs(5));

        sink.deliver(frame(2));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(record.sent.lock().last(), Some(&frame(2)));

        stop_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert!(record.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_retry_indefinitely() {
        let (connector, record) = FakeConnector::new(&[], Behavior::RefuseConnect);
        let (_sink, samples) = ClientSink::new();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(RelayClient::new(connector, "ws://relay", settings()).run(samples, stop_rx));

        tokio::time::sleep(Duration::from_millis(12_000)).await;
        let attempts = record.attempts.lock().clone();
        assert_eq!(attempts.len(), 3);
        for pair in attempts.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(5));
        }

        stop_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_handshake_is_not_fatal() {
        let (connector, record) = FakeConnector::new(&[], Behavior::Silent);
        let (sink, samples) = ClientSink::new();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(RelayClient::new(connector, "ws://relay", settings()).run(samples, stop_rx));

        sink.deliver(frame(1));
        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert!(record.sent.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(record.sent.lock().as_slice(), &[frame(1)]);
        assert_eq!(record.attempts.lock().len(), 1);

        stop_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_latest_sample_is_sent() {
        let (connector, record) = FakeConnector::new(&[], Behavior::Silent);
        let (sink, samples) = ClientSink::new();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(RelayClient::new(connector, "ws://relay", settings()).run(samples, stop_rx));

        // All produced during the handshake wait.
        for n in 1..=5 {
            sink.deliver(frame(n));
        }
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(record.sent.lock().as_slice(), &[frame(5)]);

        stop_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }
}
