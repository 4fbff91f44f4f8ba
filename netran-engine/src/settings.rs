//! Everything the orchestrator needs to build a pipeline, flattened from
//! [`NetranConfig`].

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use netran_accounting::AccountingSettings;
use netran_capture::CaptureSettings;
use netran_config::NetranConfig;
use netran_core::{CaptureParams, DeviceInfo, DEFAULT_QUEUE_CAPACITY};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Device name or address; the lookup's default device when `None`.
    pub device: Option<String>,
    /// Measurement destination handed to the accountant.
    pub destination: IpAddr,
    pub queue_capacity: usize,
    pub debug_level: u8,
    pub buffer_size: usize,
    pub snaplen: u32,
    pub read_timeout: Duration,
    pub promiscuous: bool,
    pub capture: CaptureSettings,
    pub accounting: AccountingSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            device: None,
            destination: IpAddr::V4(Ipv4Addr::LOCALHOST),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            debug_level: 0,
            buffer_size: 32 * 1024000,
            snaplen: 8192,
            read_timeout: Duration::from_secs(1),
            promiscuous: true,
            capture: CaptureSettings::default(),
            accounting: AccountingSettings::default(),
        }
    }
}

impl PipelineSettings {
    pub fn capture_params(&self, device: DeviceInfo) -> CaptureParams {
        CaptureParams {
            device,
            buffer_size: self.buffer_size,
            snaplen: self.snaplen,
            timeout: self.read_timeout,
            promiscuous: self.promiscuous,
        }
    }
}

impl From<&NetranConfig> for PipelineSettings {
    fn from(config: &NetranConfig) -> Self {
        let pipeline = &config.pipeline;
        Self {
            device: config.capture.device.clone(),
            destination: config.accounting.destination,
            queue_capacity: pipeline.queue_capacity,
            debug_level: config.telemetry.debug_level,
            buffer_size: config.capture.buffer_size,
            snaplen: config.capture.snaplen,
            read_timeout: config.capture.timeout(),
            promiscuous: config.capture.promiscuous,
            capture: CaptureSettings {
                wait_interval: pipeline.wait_interval(),
                idle_interval: pipeline.idle_interval(),
                join_timeout: pipeline.join_timeout(),
                inactive_policy: config.capture.inactive_policy,
            },
            accounting: AccountingSettings {
                wait_interval: pipeline.wait_interval(),
                grace_delay: pipeline.grace_delay(),
                drain_poll: pipeline.drain_poll(),
                join_timeout: pipeline.join_timeout(),
            },
        }
    }
}
