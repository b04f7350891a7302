//! Builds one normalized [`TelemetrySample`] per tick from sensor reads.

use serde::{Deserialize, Serialize};

use skyrelay_common::{AngleReading, Attitude, BodyRates, Position, TelemetrySample};

use crate::sensor::{SensorAdapter, SimVar};

/// Unit the source reports attitude, heading and rate values in.
///
/// The simulator's variables are named in degrees but observed values are
/// radians, so radians is the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AngleUnits {
    #[default]
    Radians,
    Degrees,
}

impl AngleUnits {
    /// Convert a source angle to degrees.
    pub fn to_degrees(self, value: f64) -> f64 {
        match self {
            AngleUnits::Radians => rad_to_deg(value),
            AngleUnits::Degrees => value,
        }
    }
}

/// `deg = rad * 180 / π`.
pub fn rad_to_deg(rad: f64) -> f64 {
    rad * 180.0 / std::f64::consts::PI
}

/// Reduce a heading into `[0, 360)`.
pub fn normalize_heading(deg: f64) -> f64 {
    let h = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs.
    if h >= 360.0 { 0.0 } else { h }
}

/// Assembles samples from a [`SensorAdapter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleBuilder {
    angle_units: AngleUnits,
}

impl SampleBuilder {
    pub fn new(angle_units: AngleUnits) -> Self {
        Self { angle_units }
    }

    pub fn angle_units(&self) -> AngleUnits {
        self.angle_units
    }

    /// Read every sampled variable and build a sample stamped `timestamp`.
    ///
    /// Never fails: each field that cannot be read is absent.
    pub fn build(&self, sensor: &mut SensorAdapter, timestamp: f64) -> TelemetrySample {
        let units = self.angle_units;
        let convert = |v: Option<f64>| v.map(|x| units.to_degrees(x));

        let pitch_raw = sensor.read(SimVar::Pitch);
        let bank_raw = sensor.read(SimVar::Bank);

        TelemetrySample {
            timestamp,
            position: Position {
                latitude: sensor.read(SimVar::Latitude),
                longitude: sensor.read(SimVar::Longitude),
            },
            altitude_ft: sensor.read(SimVar::Altitude),
            indicated_airspeed_kt: sensor.read(SimVar::IndicatedAirspeed),
            vertical_speed_fpm: sensor.read(SimVar::VerticalSpeed),
            on_ground: sensor.read(SimVar::OnGround).map(|v| v != 0.0),
            attitude: Attitude {
                pitch: AngleReading {
                    raw: pitch_raw,
                    degrees: convert(pitch_raw),
                },
                bank: AngleReading {
                    raw: bank_raw,
                    degrees: convert(bank_raw).map(|d| -d),
                },
            },
            heading_true_deg: convert(sensor.read(SimVar::HeadingTrue)).map(normalize_heading),
            body_rates: BodyRates {
                roll: convert(sensor.read(SimVar::RollRate)),
                pitch: convert(sensor.read(SimVar::PitchRate)),
                yaw: convert(sensor.read(SimVar::YawRate)),
            },
            g_force: sensor.read(SimVar::GForce),
        }
    }
}
