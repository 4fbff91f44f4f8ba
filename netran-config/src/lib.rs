//! # netran configuration
//!
//! Layered configuration for the capture → accounting pipeline.
//!
//! ## Features
//! - **Unified Configuration**: one document for capture, accounting, queue timing and telemetry
//! - **Validation**: runtime validation of every bounded parameter
//! - **Environment Awareness**: per-environment override files and `NETRAN_*` variables

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod accounting;
mod capture;
mod error;
mod pipeline;
mod telemetry;
mod validation;

pub use accounting::AccountingConfig;
pub use capture::CaptureConfig;
pub use error::ConfigError;
pub use pipeline::PipelineConfig;
pub use telemetry::TelemetryConfig;

/// Base configuration file, relative to the working directory.
pub const CONFIG_FILE: &str = "config/netran.yaml";

/// Top‑level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
pub struct NetranConfig {
    /// Capture device and primitive parameters.
    #[validate(nested)]
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Accounting destination.
    #[validate(nested)]
    #[serde(default)]
    pub accounting: AccountingConfig,

    /// Queue capacity and worker timing.
    #[validate(nested)]
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Logging and metrics.
    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl NetranConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default Values
    /// 2. `config/netran.yaml` - Base settings. If missing, defaults are used.
    /// 3. `config/<environment>.yaml` - Environment‑specific overrides (`NETRAN_ENV`).
    /// 4. `NETRAN_*` environment variables, `__` separating nested keys.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(NetranConfig::default()));

        if Path::new(CONFIG_FILE).exists() {
            figment = figment.merge(Yaml::file(CONFIG_FILE));
        } else {
            tracing::debug!("{CONFIG_FILE} not found, using default configuration");
        }

        let env = std::env::var("NETRAN_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::extract(figment)
    }

    /// Load configuration from a specific file, still honouring `NETRAN_*`.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        let figment =
            Figment::from(Serialized::defaults(NetranConfig::default())).merge(Yaml::file(path));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .merge(Env::prefixed("NETRAN_").split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}
