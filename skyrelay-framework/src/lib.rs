//! SkyRelay Framework
//!
//! Common runtime pieces for the SkyRelay binaries (the simulator bridge and
//! the cloud relay).
//!
//! # Overview
//!
//! This framework provides:
//! - [`RelayConfig`] trait for configuration loading and validation
//! - [`RelayRunner`] for managing lifecycle (startup, shutdown, signal handling)
//! - [`RelayArgs`] for common CLI argument parsing
//!
//! # Example
//!
//! ```ignore
//! use skyrelay_framework::{RelayArgs, RelayConfig, RelayRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = RelayArgs::parse_with_default("relay.json5");
//!     let config = MyConfig::load(&args.config)?;
//!
//!     let mut runner = RelayRunner::new_with_args("relay", config, Some(&args))?;
//!     runner.spawn("worker", my_worker(runner.shutdown_signal()));
//!
//!     // Run until Ctrl+C
//!     runner.run().await?;
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod error;
mod runner;

pub use args::{RelayArgs, parse_with_default_config};
pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use runner::{RelayRunner, wait_for_signal};

// Re-export commonly used types from skyrelay-common
pub use skyrelay_common::{Format, LogFormat, LoggingConfig, SessionConfig, TelemetrySample};
