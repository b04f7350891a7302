//! Cloud WebSocket relay for SkyRelay.
//!
//! Bridges connect with `role=bridge` and a session id; viewers connect to
//! the same session and receive every message the bridge sends.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │     Bridge      │────>│ Session registry│────>│     Viewers     │
//! │ (role=bridge)   │     │ (per sessionId) │     │ (any other role)│
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! skyrelay-cloud --config skyrelay-cloud.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::CloudConfig`] for configuration options.

pub mod config;
pub mod http;
pub mod sessions;

pub use config::CloudConfig;
pub use http::CloudServer;
pub use sessions::{SessionInfo, SessionRegistry};
