//! SkyRelay Common Library
//!
//! This crate provides shared types and utilities for the SkyRelay bridge and
//! cloud relay:
//!
//! - [`telemetry`] - Telemetry sample model and its wire layout
//! - [`serialization`] - JSON/CBOR encoding and decoding
//! - [`config`] - Logging configuration
//! - [`session`] - Persisted session identifier
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod serialization;
pub mod session;
pub mod telemetry;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig};
pub use error::{Error, Result};
pub use serialization::{Format, decode, decode_auto, detect_format, encode};
pub use session::SessionConfig;
pub use telemetry::{
    AngleReading, Attitude, BodyRates, ControlMessage, Position, TelemetrySample, WireRecord,
};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
