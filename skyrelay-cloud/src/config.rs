//! Configuration for the cloud relay.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use skyrelay_framework::{LoggingConfig, RelayConfig, RelayError};

/// Complete cloud relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Address to listen on (default: "0.0.0.0:3000").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// How long an empty session is kept before removal (default: 300).
    #[serde(default = "default_session_idle")]
    pub session_idle_secs: u64,

    /// Messages queued per viewer before it is considered too slow and
    /// dropped (default: 64). Must hold at least the join status and the
    /// last-data replay.
    #[serde(default = "default_viewer_queue")]
    pub viewer_queue: usize,

    /// Origins allowed by CORS. `"*"` or an empty list allows any.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            session_idle_secs: default_session_idle(),
            viewer_queue: default_viewer_queue(),
            allowed_origins: default_allowed_origins(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Status message plus last-data replay sent to a joining viewer.
const MIN_VIEWER_QUEUE: usize = 2;

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_session_idle() -> u64 {
    300
}

fn default_viewer_queue() -> usize {
    64
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl CloudConfig {
    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    /// Whether CORS should accept any origin.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == "*")
    }
}

impl RelayConfig for CloudConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> skyrelay_framework::Result<()> {
        self.listen.parse::<SocketAddr>().map_err(|e| {
            RelayError::validation(format!("listen '{}': {}", self.listen, e))
        })?;

        if self.session_idle_secs == 0 {
            return Err(RelayError::validation("session_idle_secs must be > 0"));
        }

        if self.viewer_queue < MIN_VIEWER_QUEUE {
            return Err(RelayError::validation(format!(
                "viewer_queue must be >= {}",
                MIN_VIEWER_QUEUE
            )));
        }

        Ok(())
    }
}
