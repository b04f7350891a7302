use serde::{Deserialize, Serialize};

/// Aircraft position in degrees.
///
/// Both halves come from separate simulator variables, so either can be
/// missing on a given tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// One attitude angle as read from the simulator and as reported.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AngleReading {
    /// Value in the source unit (normally radians).
    pub raw: Option<f64>,
    /// Value in degrees, in the output sign convention.
    pub degrees: Option<f64>,
}

/// Pitch and bank.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Attitude {
    pub pitch: AngleReading,
    /// Positive = left wing down (inverted from the simulator frame).
    pub bank: AngleReading,
}

/// Body-axis angular rates in degrees per second.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BodyRates {
    pub roll: Option<f64>,
    pub pitch: Option<f64>,
    pub yaw: Option<f64>,
}

/// A single normalized telemetry sample, produced once per relay tick.
///
/// Every field except the timestamp may be absent independently. Serializes
/// to the flat [`WireRecord`] layout consumers expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireRecord", from = "WireRecord")]
pub struct TelemetrySample {
    /// Monotonic clock reading at capture time, in seconds.
    pub timestamp: f64,
    pub position: Position,
    pub altitude_ft: Option<f64>,
    pub indicated_airspeed_kt: Option<f64>,
    pub vertical_speed_fpm: Option<f64>,
    pub on_ground: Option<bool>,
    pub attitude: Attitude,
    /// True heading, normalized into [0, 360).
    pub heading_true_deg: Option<f64>,
    pub body_rates: BodyRates,
    pub g_force: Option<f64>,
}

impl TelemetrySample {
    /// A sample with every optional field absent.
    pub fn empty(timestamp: f64) -> Self {
        Self {
            timestamp,
            position: Position::default(),
            altitude_ft: None,
            indicated_airspeed_kt: None,
            vertical_speed_fpm: None,
            on_ground: None,
            attitude: Attitude::default(),
            heading_true_deg: None,
            body_rates: BodyRates::default(),
            g_force: None,
        }
    }
}

/// Flat wire layout of a telemetry sample: one JSON object per tick, with
/// `null` for absent fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRecord {
    pub ts: f64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt_ft: Option<f64>,
    pub ias_kt: Option<f64>,
    pub vs_fpm: Option<f64>,
    pub on_ground: Option<bool>,
    pub pitch_raw: Option<f64>,
    pub bank_raw: Option<f64>,
    pub pitch_deg: Option<f64>,
    pub bank_deg: Option<f64>,
    pub roll_rate: Option<f64>,
    pub pitch_rate: Option<f64>,
    pub yaw_rate: Option<f64>,
    pub g_force: Option<f64>,
    pub hdg_true: Option<f64>,
}

impl From<TelemetrySample> for WireRecord {
    fn from(s: TelemetrySample) -> Self {
        Self {
            ts: s.timestamp,
            lat: s.position.latitude,
            lon: s.position.longitude,
            alt_ft: s.altitude_ft,
            ias_kt: s.indicated_airspeed_kt,
            vs_fpm: s.vertical_speed_fpm,
            on_ground: s.on_ground,
            pitch_raw: s.attitude.pitch.raw,
            bank_raw: s.attitude.bank.raw,
            pitch_deg: s.attitude.pitch.degrees,
            bank_deg: s.attitude.bank.degrees,
            roll_rate: s.body_rates.roll,
            pitch_rate: s.body_rates.pitch,
            yaw_rate: s.body_rates.yaw,
            g_force: s.g_force,
            hdg_true: s.heading_true_deg,
        }
    }
}

impl From<WireRecord> for TelemetrySample {
    fn from(r: WireRecord) -> Self {
        Self {
            timestamp: r.ts,
            position: Position {
                latitude: r.lat,
                longitude: r.lon,
            },
            altitude_ft: r.alt_ft,
            indicated_airspeed_kt: r.ias_kt,
            vertical_speed_fpm: r.vs_fpm,
            on_ground: r.on_ground,
            attitude: Attitude {
                pitch: AngleReading {
                    raw: r.pitch_raw,
                    degrees: r.pitch_deg,
                },
                bank: AngleReading {
                    raw: r.bank_raw,
                    degrees: r.bank_deg,
                },
            },
            heading_true_deg: r.hdg_true,
            body_rates: BodyRates {
                roll: r.roll_rate,
                pitch: r.pitch_rate,
                yaw: r.yaw_rate,
            },
            g_force: r.g_force,
        }
    }
}

/// Control records exchanged when a transport connection is established,
/// and relay status notices sent to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Greeting sent by a bridge to each inbound consumer.
    Hello { msg: String },

    /// Session confirmation sent by the cloud relay.
    Connected {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(
            rename = "hasBridge",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        has_bridge: Option<bool>,
        #[serde(rename = "lastData", default, skip_serializing_if = "Option::is_none")]
        last_data: Option<serde_json::Value>,
    },

    /// The session's bridge went away.
    BridgeDisconnected,
}

impl ControlMessage {
    /// Greeting with the default message.
    pub fn hello(msg: impl Into<String>) -> Self {
        ControlMessage::Hello { msg: msg.into() }
    }

    /// Session confirmation as sent to a bridge.
    pub fn connected(session_id: impl Into<String>) -> Self {
        ControlMessage::Connected {
            session_id: session_id.into(),
            has_bridge: None,
            last_data: None,
        }
    }

    /// Parse a text frame, returning `None` for anything that is not a
    /// control record.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> String {
        // Serialization of these variants cannot fail: all keys are strings.
        serde_json::to_string(self).unwrap_or_default()
    }
}
