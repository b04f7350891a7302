//! Synthetic flight for demos and tests.
//!
//! Flies a steady climbing turn around a fixed point. Angles and rates are
//! reported in radians, the way the real simulator reports them.

use std::f64::consts::{PI, TAU};

use super::{RawValue, SourceError, TelemetrySource};

const CENTER_LAT: f64 = 47.4502;
const CENTER_LON: f64 = -122.3088;
const FEET_PER_DEGREE_LAT: f64 = 364_000.0;
const KNOTS_TO_FPS: f64 = 1.687_81;

/// Deterministic synthetic telemetry source.
pub struct SimulatedSource {
    dt: f64,
    t: f64,
    started: bool,
    airspeed_kt: f64,
    bank_rad: f64,
    climb_fpm: f64,
    base_altitude_ft: f64,
}

impl SimulatedSource {
    /// Create a source advancing `1 / rate_hz` seconds per tick.
    pub fn new(rate_hz: f64) -> Self {
        Self {
            dt: 1.0 / rate_hz,
            t: 0.0,
            started: false,
            airspeed_kt: 110.0,
            bank_rad: 20.0_f64.to_radians(),
            climb_fpm: 500.0,
            base_altitude_ft: 2500.0,
        }
    }

    /// Simulated seconds since the first tick.
    pub fn elapsed(&self) -> f64 {
        self.t
    }

    /// Turn rate in rad/s for a coordinated turn at the current bank.
    fn turn_rate(&self) -> f64 {
        let v_fps = self.airspeed_kt * KNOTS_TO_FPS;
        32.174 * self.bank_rad.tan() / v_fps
    }

    fn heading_rad(&self) -> f64 {
        // Left unwrapped; downstream normalization owns the wraparound.
        self.turn_rate() * self.t
    }

    fn position(&self) -> (f64, f64) {
        let v_fps = self.airspeed_kt * KNOTS_TO_FPS;
        let radius_ft = v_fps / self.turn_rate();
        let angle = self.heading_rad() - PI / 2.0;
        let north_ft = radius_ft * angle.cos();
        let east_ft = radius_ft * angle.sin();
        let lat = CENTER_LAT + north_ft / FEET_PER_DEGREE_LAT;
        let lon = CENTER_LON + east_ft / (FEET_PER_DEGREE_LAT * CENTER_LAT.to_radians().cos());
        (lat, lon)
    }

    fn value(&self, name: &str) -> Option<f64> {
        let v = match name {
            "PLANE_LATITUDE" => self.position().0,
            "PLANE_LONGITUDE" => self.position().1,
            "PLANE_ALTITUDE" => self.base_altitude_ft + self.climb_fpm * self.t / 60.0,
            "AIRSPEED_INDICATED" => self.airspeed_kt,
            "VERTICAL_SPEED" => self.climb_fpm,
            "PLANE_HEADING_DEGREES_TRUE" => self.heading_rad(),
            "SIM_ON_GROUND" => 0.0,
            "PLANE_PITCH_DEGREES" => 0.05 + 0.01 * (TAU * self.t / 8.0).sin(),
            "PLANE_BANK_DEGREES" => self.bank_rad,
            "ROTATION_VELOCITY_BODY_X" => 0.0,
            "ROTATION_VELOCITY_BODY_Y" => self.turn_rate() * self.bank_rad.sin(),
            "ROTATION_VELOCITY_BODY_Z" => self.turn_rate() * self.bank_rad.cos(),
            "G_FORCE" => 1.0 / self.bank_rad.cos(),
            _ => return None,
        };
        Some(v)
    }
}

impl TelemetrySource for SimulatedSource {
    fn get(&mut self, name: &str) -> Result<RawValue, SourceError> {
        self.value(name)
            .map(RawValue::Number)
            .ok_or_else(|| SourceError::UnknownField(name.to_string()))
    }

    fn begin_tick(&mut self) {
        if self.started {
            self.t += self.dt;
        } else {
            self.started = true;
        }
    }

    fn describe(&self) -> String {
        format!("simulated ({:.0} Hz)", 1.0 / self.dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::SimVar;

    #[test]
    fn test_every_simvar_has_a_value() {
        let mut source = SimulatedSource::new(15.0);
        source.begin_tick();
        for var in SimVar::ALL {
            let raw = source.get(var.as_str()).unwrap();
            assert!(raw.as_number().is_some(), "{} should be numeric", var);
        }
        assert!(source.get("FUEL_TOTAL").is_err());
    }

    #[test]
    fn test_time_advances_per_tick() {
        let mut source = SimulatedSource::new(10.0);
        source.begin_tick();
        assert_eq!(source.elapsed(), 0.0);
        source.begin_tick();
        source.begin_tick();
        assert!((source.elapsed() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_climbing_turn() {
        let mut source = SimulatedSource::new(1.0);
        source.begin_tick();
        let alt0 = source.value("PLANE_ALTITUDE").unwrap();
        let hdg0 = source.value("PLANE_HEADING_DEGREES_TRUE").unwrap();
        for _ in 0..60 {
            source.begin_tick();
        }
        let alt1 = source.value("PLANE_ALTITUDE").unwrap();
        let hdg1 = source.value("PLANE_HEADING_DEGREES_TRUE").unwrap();

        assert!((alt1 - alt0 - 500.0).abs() < 1e-6);
        assert!(hdg1 > hdg0);
        assert!(source.value("G_FORCE").unwrap() > 1.0);
    }
}
