//! Configuration for the simulator bridge.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use skyrelay_common::SessionConfig;
use skyrelay_framework::{Format, LoggingConfig, RelayConfig, RelayError};

use crate::builder::AngleUnits;

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Sampling settings.
    #[serde(default)]
    pub relay: RelaySettings,

    /// Where telemetry comes from.
    #[serde(default)]
    pub sensor: SensorConfig,

    /// How samples reach consumers.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Relay loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Samples per second (default: 15).
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f64,

    /// Unit the simulator reports angles in (default: radians).
    #[serde(default)]
    pub angle_units: AngleUnits,

    /// Frame encoding (default: json).
    #[serde(default)]
    pub format: Format,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            rate_hz: default_rate_hz(),
            angle_units: AngleUnits::default(),
            format: Format::default(),
        }
    }
}

impl RelaySettings {
    /// Time between ticks.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz)
    }
}

fn default_rate_hz() -> f64 {
    15.0
}

/// Telemetry source selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SensorConfig {
    /// Synthetic climbing turn.
    Simulated,

    /// JSON-lines recording, one object per tick.
    Replay {
        path: PathBuf,
        #[serde(rename = "loop", default = "default_true")]
        looping: bool,
    },
}

impl Default for SensorConfig {
    fn default() -> Self {
        SensorConfig::Simulated
    }
}

fn default_true() -> bool {
    true
}

/// Transport role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Accept local WebSocket consumers.
    #[default]
    Server,
    /// Push to a cloud relay session.
    Client,
}

/// Transport settings for both roles; only the active one is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub mode: TransportMode,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,
}

/// Server-role settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (default: "0.0.0.0:8765").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Message sent in the hello record to each new consumer.
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            greeting: default_greeting(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8765".to_string()
}

fn default_greeting() -> String {
    "connected".to_string()
}

/// Client-role settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay endpoint, `ws://` or `wss://`.
    #[serde(default)]
    pub endpoint: String,

    /// File holding `SESSION_ID=<id>` (default: "bridge-config.txt").
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            session_file: default_session_file(),
            reconnect_delay_secs: default_reconnect_delay(),
            handshake_timeout_ms: default_handshake_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            send_timeout_ms: default_send_timeout(),
        }
    }
}

fn default_session_file() -> PathBuf {
    PathBuf::from("bridge-config.txt")
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_handshake_timeout() -> u64 {
    2000
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_send_timeout() -> u64 {
    1000
}

impl ClientConfig {
    /// Settle on a session id.
    ///
    /// An id given on the command line wins and is persisted to the session
    /// file; otherwise the file must provide one.
    pub fn resolve_session(&self, cli: Option<&str>) -> skyrelay_framework::Result<SessionConfig> {
        if let Some(id) = cli {
            let session = SessionConfig::new(id)?;
            session.save(&self.session_file).map_err(|e| {
                RelayError::with_context(
                    format!("saving session file {}", self.session_file.display()),
                    e,
                )
            })?;
            tracing::info!(path = %self.session_file.display(), "Saved session id");
            return Ok(session);
        }

        SessionConfig::load(&self.session_file)?.ok_or_else(|| {
            RelayError::config(format!(
                "no session id: pass --session-id or add SESSION_ID=<id> to {}",
                self.session_file.display()
            ))
        })
    }
}

impl RelayConfig for BridgeConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> skyrelay_framework::Result<()> {
        let rate = self.relay.rate_hz;
        if !rate.is_finite() || rate <= 0.0 || rate > 1000.0 {
            return Err(RelayError::validation(
                "relay.rate_hz must be > 0 and <= 1000",
            ));
        }

        if let SensorConfig::Replay { path, .. } = &self.sensor {
            if path.as_os_str().is_empty() {
                return Err(RelayError::validation("sensor.path must not be empty"));
            }
        }

        match self.transport.mode {
            TransportMode::Server => {
                self.transport
                    .server
                    .listen
                    .parse::<SocketAddr>()
                    .map_err(|e| {
                        RelayError::validation(format!(
                            "transport.server.listen '{}': {}",
                            self.transport.server.listen, e
                        ))
                    })?;
            }
            TransportMode::Client => {
                let client = &self.transport.client;
                let endpoint = url::Url::parse(&client.endpoint).map_err(|e| {
                    RelayError::validation(format!(
                        "transport.client.endpoint '{}': {}",
                        client.endpoint, e
                    ))
                })?;
                if !matches!(endpoint.scheme(), "ws" | "wss") {
                    return Err(RelayError::validation(
                        "transport.client.endpoint must use ws:// or wss://",
                    ));
                }
                if client.reconnect_delay_secs == 0
                    || client.handshake_timeout_ms == 0
                    || client.connect_timeout_secs == 0
                    || client.send_timeout_ms == 0
                {
                    return Err(RelayError::validation(
                        "transport.client timeouts must be > 0",
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config = BridgeConfig::from_json5("{}").unwrap();
        assert_eq!(config.relay.rate_hz, 15.0);
        assert_eq!(config.relay.angle_units, AngleUnits::Radians);
        assert_eq!(config.relay.format, Format::Json);
        assert_eq!(config.sensor, SensorConfig::Simulated);
        assert_eq!(config.transport.mode, TransportMode::Server);
        assert_eq!(config.transport.server.listen, "0.0.0.0:8765");
        assert_eq!(config.transport.server.greeting, "connected");
        assert_eq!(config.transport.client.reconnect_delay_secs, 5);
        assert_eq!(config.transport.client.handshake_timeout_ms, 2000);
        assert_eq!(
            config.transport.client.session_file,
            PathBuf::from("bridge-config.txt")
        );
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            relay: { rate_hz: 30, angle_units: "degrees", format: "cbor" },
            sensor: { kind: "replay", path: "flight.jsonl", loop: false },
            transport: {
                mode: "client",
                client: {
                    endpoint: "wss://relay.example.com",
                    session_file: "/tmp/session.txt",
                    reconnect_delay_secs: 3,
                },
            },
            logging: { level: "debug", format: "json" },
        }"#;

        let config = BridgeConfig::from_json5(json).unwrap();
        assert_eq!(config.relay.rate_hz, 30.0);
        assert_eq!(config.relay.angle_units, AngleUnits::Degrees);
        assert_eq!(config.relay.format, Format::Cbor);
        assert_eq!(
            config.sensor,
            SensorConfig::Replay {
                path: PathBuf::from("flight.jsonl"),
                looping: false
            }
        );
        assert_eq!(config.transport.mode, TransportMode::Client);
        assert_eq!(config.transport.client.reconnect_delay_secs, 3);
        assert_eq!(config.transport.client.send_timeout_ms, 1000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_period() {
        let settings = RelaySettings::default();
        let period = settings.period();
        assert!(period > Duration::from_millis(66) && period < Duration::from_millis(67));
    }

    #[test]
    fn test_validate_rate() {
        for rate in ["0", "-1", "1001"] {
            let json = format!("{{ relay: {{ rate_hz: {} }} }}", rate);
            assert!(
                matches!(
                    BridgeConfig::from_json5(&json),
                    Err(RelayError::ConfigValidation(_))
                ),
                "rate {} should be rejected",
                rate
            );
        }
    }

    #[test]
    fn test_validate_listen_address() {
        let json = r#"{ transport: { server: { listen: "not-an-address" } } }"#;
        assert!(BridgeConfig::from_json5(json).is_err());
    }

    #[test]
    fn test_validate_client_endpoint() {
        let missing = r#"{ transport: { mode: "client" } }"#;
        assert!(BridgeConfig::from_json5(missing).is_err());

        let http = r#"{ transport: { mode: "client", client: { endpoint: "http://x" } } }"#;
        assert!(BridgeConfig::from_json5(http).is_err());

        let zero = r#"{ transport: { mode: "client",
            client: { endpoint: "ws://x", send_timeout_ms: 0 } } }"#;
        assert!(BridgeConfig::from_json5(zero).is_err());
    }

    #[test]
    fn test_server_mode_ignores_client_section() {
        let json = r#"{ transport: { mode: "server", client: { endpoint: "" } } }"#;
        assert!(BridgeConfig::from_json5(json).is_ok());
    }

    #[test]
    fn test_resolve_session_from_cli_persists() {
        let dir = tempfile::tempdir().unwrap();
        let client = ClientConfig {
            session_file: dir.path().join("session.txt"),
            ..Default::default()
        };

        let session = client.resolve_session(Some("from-cli")).unwrap();
        assert_eq!(session.session_id(), "from-cli");

        let reloaded = client.resolve_session(None).unwrap();
        assert_eq!(reloaded.session_id(), "from-cli");
    }

    #[test]
    fn test_resolve_session_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = ClientConfig {
            session_file: dir.path().join("absent.txt"),
            ..Default::default()
        };
        assert!(matches!(
            client.resolve_session(None),
            Err(RelayError::Config(_))
        ));
    }
}
