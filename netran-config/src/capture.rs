// netran-config/src/capture.rs
//! Packet capture configuration.
//!
//! Parameters handed to the capture primitive when the capture worker opens
//! its device, plus the worker's policy while accounting is paused.

use std::time::Duration;

use netran_core::InactivePolicy;
use serde::{Deserialize, Deserializer, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Packet capture configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
#[validate(schema(function = validate_capture_device))]
pub struct CaptureConfig {
    /// Device name or address; the default device when unset.
    #[serde(default)]
    pub device: Option<String>,

    /// Kernel capture buffer size in bytes.
    #[validate(range(min = 65536, max = 1073741824))]
    #[serde(default = "default_buffer_size", deserialize_with = "deserialize_size")]
    pub buffer_size: usize,

    /// Bytes kept per packet.
    #[validate(range(min = 64, max = 262144))]
    #[serde(default = "default_snaplen")]
    pub snaplen: u32,

    /// Read timeout (milliseconds).
    #[validate(range(min = 1, max = 60000))]
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Run in promiscuous mode?
    #[serde(default = "default_promiscuous")]
    pub promiscuous: bool,

    /// Upper bound on blocks per batch.
    #[validate(range(min = 1, max = 65536))]
    #[serde(default = "default_max_blocks")]
    pub max_blocks_per_batch: usize,

    /// Behaviour while accounting is inactive.
    #[serde(default)]
    pub inactive_policy: InactivePolicy,
}

impl CaptureConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn validate_capture_device(config: &CaptureConfig) -> Result<(), validator::ValidationError> {
    match config.device.as_deref() {
        Some(filter) => validation::validate_device_filter(filter),
        None => Ok(()),
    }
}

fn default_buffer_size() -> usize {
    32 * 1024000
}

fn default_snaplen() -> u32 {
    8192
}

fn default_timeout() -> u64 {
    1000
}

fn default_promiscuous() -> bool {
    true
}

fn default_max_blocks() -> usize {
    1024
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Num(usize),
    Str(String),
}

/// Custom deserializer to allow human‑friendly sizes (e.g. "32MiB") or direct numbers.
fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let sv = SizeValue::deserialize(deserializer)?;
    match sv {
        SizeValue::Num(n) => Ok(n),
        SizeValue::Str(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

fn parse_size(raw: &str) -> Result<usize, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (num_part, unit_part) = raw.split_at(split);
    let number: f64 = num_part.parse().map_err(|e| format!("{e}"))?;
    let multiplier = match unit_part.trim().to_lowercase().as_str() {
        "kb" | "kib" | "k" => 1024.0,
        "mb" | "mib" | "m" => 1024.0 * 1024.0,
        "gb" | "gib" | "g" => 1024.0 * 1024.0 * 1024.0,
        "" | "b" => 1.0,
        other => return Err(format!("Unknown size unit '{other}'")),
    };
    Ok((number * multiplier) as usize)
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            buffer_size: default_buffer_size(),
            snaplen: default_snaplen(),
            timeout_ms: default_timeout(),
            promiscuous: default_promiscuous(),
            max_blocks_per_batch: default_max_blocks(),
            inactive_policy: InactivePolicy::default(),
        }
    }
}
