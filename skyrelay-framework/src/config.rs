//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::LoggingConfig;
use crate::error::{RelayError, Result};

/// Trait for relay configuration types.
///
/// Implement this trait for a binary's configuration struct to get
/// JSON5 loading, validation, and access to the common logging section.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use skyrelay_framework::{LoggingConfig, RelayConfig, RelayError};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyConfig {
///     #[serde(default)]
///     pub logging: LoggingConfig,
///     pub rate_hz: f64,
/// }
///
/// impl RelayConfig for MyConfig {
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn validate(&self) -> skyrelay_framework::Result<()> {
///         if self.rate_hz <= 0.0 {
///             return Err(RelayError::validation("rate_hz must be > 0"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait RelayConfig: Sized + DeserializeOwned {
    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Parse configuration from a JSON5 string and validate it.
    fn from_json5(content: &str) -> Result<Self> {
        let config: Self = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(RelayError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_json5(&content)
    }
}
