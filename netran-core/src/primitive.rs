//! Contracts for the external collaborators driven by the pipeline.
//!
//! A primitive handle is moved into its worker thread and never touched from
//! another thread. Statistics are exposed through a [`StatsBoard`] clone taken
//! before the thread starts.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::batch::CaptureBatch;
use crate::device::DeviceInfo;
use crate::error::PrimitiveError;
use crate::stats::StatsBoard;

/// How a capture call treats the traffic it pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Build a batch for the queue.
    Queue,
    /// Pull and drop, keeping the capture ring from backing up.
    Discard,
}

/// What the capture worker does while accounting is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InactivePolicy {
    /// Keep calling the primitive in [`CaptureMode::Discard`].
    #[default]
    Drain,
    /// Leave the primitive alone and sleep.
    Idle,
}

/// Parameters for opening a capture handle.
#[derive(Debug, Clone)]
pub struct CaptureParams {
    pub device: DeviceInfo,
    pub buffer_size: usize,
    pub snaplen: u32,
    pub timeout: Duration,
    pub promiscuous: bool,
}

/// Error flag and message reported by the capture primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureStatus {
    pub code: i32,
    pub message: String,
}

impl CaptureStatus {
    pub fn ok() -> Self {
        Self {
            code: 0,
            message: String::new(),
        }
    }

    pub fn failed(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

impl From<PrimitiveError> for CaptureStatus {
    fn from(err: PrimitiveError) -> Self {
        Self::failed(err.code, err.message)
    }
}

pub trait CapturePrimitive: Send + 'static {
    /// Sets the primitive's diagnostic verbosity and returns the level in effect.
    fn set_debug_level(&mut self, level: u8) -> u8;

    /// Opens the capture handle. A non-zero code means the handle is unusable.
    fn open(&mut self, params: &CaptureParams) -> CaptureStatus;

    /// Captures one batch. In [`CaptureMode::Discard`] the returned batch may
    /// be empty.
    fn capture_one(&mut self, mode: CaptureMode) -> Result<CaptureBatch, PrimitiveError>;

    /// Closes the handle and reports its final status.
    fn close(&mut self) -> CaptureStatus;

    fn statistics(&self) -> StatsBoard;
}

pub trait AccountingPrimitive: Send + 'static {
    fn set_debug_level(&mut self, level: u8) -> u8;

    /// Binds the accountant to a device and a destination. Returns 0 on success.
    fn open(&mut self, device: &DeviceInfo, destination: IpAddr) -> i32;

    fn analyze(
        &mut self,
        buffer: &[u8],
        block_size: u32,
        block_count: u32,
        datalink: i32,
    ) -> Result<(), PrimitiveError>;

    /// Returns 0 on success.
    fn close(&mut self) -> i32;

    fn statistics(&self) -> StatsBoard;
}

pub trait DeviceLookup {
    fn list(&self) -> Result<Vec<DeviceInfo>, PrimitiveError>;

    /// Resolves a device by name or address, or the default device without a
    /// filter. See [`crate::device::select_device`].
    fn find(&self, filter: Option<&str>) -> Result<Option<DeviceInfo>, PrimitiveError> {
        let devices = self.list()?;
        Ok(crate::device::select_device(&devices, filter))
    }
}
