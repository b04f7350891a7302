//! Sensor adapter over a simulator telemetry source.
//!
//! A [`TelemetrySource`] answers named-variable reads and may fail in any
//! way it likes. [`SensorAdapter`] sits in front of it and turns every
//! fault (unknown field, unavailable value, non-numeric payload) into an
//! absent reading, so nothing upstream ever sees an error.

mod replay;
mod simulated;

pub use replay::ReplaySource;
pub use simulated::SimulatedSource;

use thiserror::Error;

use crate::config::SensorConfig;

/// Simulator variables the relay samples each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimVar {
    Latitude,
    Longitude,
    Altitude,
    IndicatedAirspeed,
    VerticalSpeed,
    HeadingTrue,
    OnGround,
    /// Named in degrees upstream, observed in radians.
    Pitch,
    /// Named in degrees upstream, observed in radians.
    Bank,
    RollRate,
    PitchRate,
    YawRate,
    GForce,
}

impl SimVar {
    /// Every sampled variable, in read order.
    pub const ALL: [SimVar; 13] = [
        SimVar::Latitude,
        SimVar::Longitude,
        SimVar::Altitude,
        SimVar::IndicatedAirspeed,
        SimVar::VerticalSpeed,
        SimVar::HeadingTrue,
        SimVar::OnGround,
        SimVar::Pitch,
        SimVar::Bank,
        SimVar::RollRate,
        SimVar::PitchRate,
        SimVar::YawRate,
        SimVar::GForce,
    ];

    /// The simulator's variable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SimVar::Latitude => "PLANE_LATITUDE",
            SimVar::Longitude => "PLANE_LONGITUDE",
            SimVar::Altitude => "PLANE_ALTITUDE",
            SimVar::IndicatedAirspeed => "AIRSPEED_INDICATED",
            SimVar::VerticalSpeed => "VERTICAL_SPEED",
            SimVar::HeadingTrue => "PLANE_HEADING_DEGREES_TRUE",
            SimVar::OnGround => "SIM_ON_GROUND",
            SimVar::Pitch => "PLANE_PITCH_DEGREES",
            SimVar::Bank => "PLANE_BANK_DEGREES",
            SimVar::RollRate => "ROTATION_VELOCITY_BODY_X",
            SimVar::PitchRate => "ROTATION_VELOCITY_BODY_Y",
            SimVar::YawRate => "ROTATION_VELOCITY_BODY_Z",
            SimVar::GForce => "G_FORCE",
        }
    }

    /// Look up a variable by its simulator name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == name)
    }
}

impl std::fmt::Display for SimVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A value as delivered by the source, before numeric coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl RawValue {
    /// Coerce to a finite number, if the value has one.
    pub fn as_number(&self) -> Option<f64> {
        let n = match self {
            RawValue::Number(n) => *n,
            RawValue::Bool(b) => f64::from(u8::from(*b)),
            RawValue::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        n.is_finite().then_some(n)
    }
}

/// Faults a telemetry source may report.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be brought up at all.
    #[error("source initialization failed: {0}")]
    Init(String),

    /// The source does not know the variable.
    #[error("unknown field: {0}")]
    UnknownField(String),

    /// The variable exists but has no value right now.
    #[error("field unavailable: {0}")]
    Unavailable(String),

    /// A replay ran out of recorded frames.
    #[error("source exhausted")]
    Exhausted,
}

/// A simulator telemetry source.
pub trait TelemetrySource: Send {
    /// Read one named variable.
    fn get(&mut self, name: &str) -> Result<RawValue, SourceError>;

    /// Called once at the start of every tick, before any reads.
    fn begin_tick(&mut self) {}

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Fault-absorbing front of a [`TelemetrySource`].
pub struct SensorAdapter {
    source: Box<dyn TelemetrySource>,
    faults: u64,
}

impl SensorAdapter {
    pub fn new(source: Box<dyn TelemetrySource>) -> Self {
        Self { source, faults: 0 }
    }

    /// Mark the start of a sampling tick.
    pub fn begin_tick(&mut self) {
        self.source.begin_tick();
    }

    /// Read a field by simulator name; any fault yields `None`.
    pub fn read_field(&mut self, name: &str) -> Option<f64> {
        match self.source.get(name) {
            Ok(raw) => {
                let value = raw.as_number();
                if value.is_none() {
                    self.faults += 1;
                    tracing::trace!(field = name, raw = ?raw, "Non-numeric sensor value");
                }
                value
            }
            Err(e) => {
                self.faults += 1;
                tracing::trace!(field = name, error = %e, "Sensor read failed");
                None
            }
        }
    }

    /// Read one of the sampled variables.
    pub fn read(&mut self, var: SimVar) -> Option<f64> {
        self.read_field(var.as_str())
    }

    /// Total reads that came back absent.
    pub fn fault_count(&self) -> u64 {
        self.faults
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }
}

/// Bring up the configured telemetry source.
///
/// Failure here is an integration fault: the bridge cannot run without a
/// source.
pub fn open(config: &SensorConfig, rate_hz: f64) -> Result<SensorAdapter, SourceError> {
    let source: Box<dyn TelemetrySource> = match config {
        SensorConfig::Simulated => Box::new(SimulatedSource::new(rate_hz)),
        SensorConfig::Replay { path, looping } => Box::new(ReplaySource::open(path, *looping)?),
    };
    let adapter = SensorAdapter::new(source);
    tracing::info!(source = %adapter.describe(), "Sensor ready");
    Ok(adapter)
}
