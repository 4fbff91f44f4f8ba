//! Observability configuration.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct TelemetryConfig {
    /// Default log directive; `RUST_LOG` takes precedence.
    #[validate(custom(function = validation::validate_log_level))]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Verbosity passed to the capture and accounting primitives.
    #[validate(range(max = 3))]
    #[serde(default)]
    pub debug_level: u8,

    /// Print Prometheus metrics on shutdown.
    #[serde(default)]
    pub metrics: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            debug_level: 0,
            metrics: false,
        }
    }
}
