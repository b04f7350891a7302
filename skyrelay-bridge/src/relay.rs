//! The fixed-rate tick driver.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use skyrelay_common::Format;

use crate::builder::SampleBuilder;
use crate::sensor::SensorAdapter;
use crate::transport::{SampleSink, encode_frame};

/// Samples the sensor once per period and hands each sample to the sink.
pub struct RelayLoop {
    sensor: SensorAdapter,
    builder: SampleBuilder,
    sink: Arc<dyn SampleSink>,
    period: Duration,
    format: Format,
    epoch: Instant,
    ticks: u64,
}

impl RelayLoop {
    pub fn new(
        sensor: SensorAdapter,
        builder: SampleBuilder,
        sink: Arc<dyn SampleSink>,
        period: Duration,
        format: Format,
    ) -> Self {
        Self {
            sensor,
            builder,
            sink,
            period,
            format,
            epoch: Instant::now(),
            ticks: 0,
        }
    }

    /// Ticks completed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Build, encode and deliver one sample.
    pub fn tick(&mut self) {
        self.sensor.begin_tick();
        let timestamp = self.epoch.elapsed().as_secs_f64();
        let sample = self.builder.build(&mut self.sensor, timestamp);

        match encode_frame(&sample, self.format) {
            Ok(frame) => {
                tracing::trace!(ts = timestamp, bytes = frame.len(), "Tick");
                self.sink.deliver(frame);
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode sample"),
        }
        self.ticks += 1;
    }

    /// Tick until shutdown.
    ///
    /// Sleeps one full period after each tick's work, so the effective rate
    /// is slightly below the nominal one.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            sensor = %self.sensor.describe(),
            period = ?self.period,
            format = ?self.format,
            "Relay loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.tick();

            tokio::select! {
                _ = tokio::time::sleep(self.period) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!(
            ticks = self.ticks,
            sensor_faults = self.sensor.fault_count(),
            "Relay loop stopped"
        );
    }
}
