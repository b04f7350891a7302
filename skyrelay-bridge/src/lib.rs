//! Flight-simulator telemetry bridge.
//!
//! Samples the simulator at a fixed rate, normalizes each reading into a
//! [`TelemetrySample`](skyrelay_common::TelemetrySample) and relays it to
//! consumers over WebSocket.
//!
//! # Transport roles
//!
//! ```text
//! server:  sim -> relay loop -> hub -> ws://0.0.0.0:8765 (many local consumers)
//! client:  sim -> relay loop -> latest slot -> wss://relay/?role=bridge&sessionId=<id>
//! ```

pub mod builder;
pub mod config;
pub mod hub;
pub mod relay;
pub mod sensor;
pub mod transport;
