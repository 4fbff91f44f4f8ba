//! Scripted collaborators for exercising workers without a capture device.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::batch::{CaptureBatch, Datalink};
use crate::device::DeviceInfo;
use crate::error::PrimitiveError;
use crate::primitive::{
    AccountingPrimitive, CaptureMode, CaptureParams, CapturePrimitive, CaptureStatus,
    DeviceLookup,
};
use crate::stats::StatsBoard;

const TEST_BLOCK_SIZE: u32 = 64;

/// Capture primitive that replays a list of block counts.
///
/// Once the script runs out every queue-mode call returns an empty batch.
pub struct ScriptedCapture {
    script: VecDeque<u32>,
    open_status: CaptureStatus,
    close_status: CaptureStatus,
    fail_on_call: Option<u64>,
    pace: Duration,
    calls: u64,
    board: StatsBoard,
    debug_level: u8,
}

impl ScriptedCapture {
    pub fn new<I>(script: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        Self {
            script: script.into_iter().collect(),
            open_status: CaptureStatus::ok(),
            close_status: CaptureStatus::ok(),
            fail_on_call: None,
            pace: Duration::from_millis(1),
            calls: 0,
            board: StatsBoard::new(),
            debug_level: 0,
        }
    }

    pub fn failing_open(mut self, code: i32, message: &str) -> Self {
        self.open_status = CaptureStatus::failed(code, message);
        self
    }

    pub fn failing_close(mut self, code: i32, message: &str) -> Self {
        self.close_status = CaptureStatus::failed(code, message);
        self
    }

    /// Fails the `call`-th capture (1-based, counting both modes).
    pub fn fail_on_call(mut self, call: u64) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    /// Sleep applied to every capture call.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }
}

impl CapturePrimitive for ScriptedCapture {
    fn set_debug_level(&mut self, level: u8) -> u8 {
        self.debug_level = level;
        level
    }

    fn open(&mut self, _params: &CaptureParams) -> CaptureStatus {
        self.board.set("opened", u64::from(self.open_status.is_ok()));
        self.open_status.clone()
    }

    fn capture_one(&mut self, mode: CaptureMode) -> Result<CaptureBatch, PrimitiveError> {
        self.calls += 1;
        if self.fail_on_call == Some(self.calls) {
            return Err(PrimitiveError::new(-1, "scripted capture failure"));
        }
        thread::sleep(self.pace);

        match mode {
            CaptureMode::Discard => {
                self.board.add("discard_calls", 1);
                Ok(CaptureBatch::empty(TEST_BLOCK_SIZE, Datalink::ETHERNET))
            }
            CaptureMode::Queue => {
                self.board.add("queue_calls", 1);
                let blocks = self.script.pop_front().unwrap_or(0);
                if blocks > 0 {
                    self.board.add("scripted_batches", 1);
                }
                let buffer = Bytes::from(vec![0u8; (TEST_BLOCK_SIZE * blocks) as usize]);
                Ok(CaptureBatch::new(
                    buffer,
                    TEST_BLOCK_SIZE,
                    blocks,
                    Datalink::ETHERNET,
                ))
            }
        }
    }

    fn close(&mut self) -> CaptureStatus {
        self.board.set("closed", 1);
        self.close_status.clone()
    }

    fn statistics(&self) -> StatsBoard {
        self.board.clone()
    }
}

/// Block counts observed by a [`RecordingAccountant`], in arrival order.
#[derive(Clone, Default)]
pub struct Recorded(Arc<Mutex<Vec<u32>>>);

impl Recorded {
    pub fn all(&self) -> Vec<u32> {
        self.0.lock().clone()
    }

    /// Observed block counts with empty batches filtered out.
    pub fn non_empty(&self) -> Vec<u32> {
        self.0.lock().iter().copied().filter(|&n| n > 0).collect()
    }
}

/// Accounting primitive that records every analyzed batch.
pub struct RecordingAccountant {
    recorded: Recorded,
    open_code: i32,
    close_code: i32,
    fail_on_call: Option<u64>,
    pace: Duration,
    calls: u64,
    board: StatsBoard,
    debug_level: u8,
}

impl RecordingAccountant {
    pub fn new() -> Self {
        Self {
            recorded: Recorded::default(),
            open_code: 0,
            close_code: 0,
            fail_on_call: None,
            pace: Duration::ZERO,
            calls: 0,
            board: StatsBoard::new(),
            debug_level: 0,
        }
    }

    pub fn failing_open(mut self, code: i32) -> Self {
        self.open_code = code;
        self
    }

    pub fn failing_close(mut self, code: i32) -> Self {
        self.close_code = code;
        self
    }

    /// Fails the `call`-th analyze (1-based).
    pub fn fail_on_call(mut self, call: u64) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    pub fn recorded(&self) -> Recorded {
        self.recorded.clone()
    }
}

impl Default for RecordingAccountant {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountingPrimitive for RecordingAccountant {
    fn set_debug_level(&mut self, level: u8) -> u8 {
        self.debug_level = level;
        level
    }

    fn open(&mut self, _device: &DeviceInfo, _destination: IpAddr) -> i32 {
        self.open_code
    }

    fn analyze(
        &mut self,
        _buffer: &[u8],
        _block_size: u32,
        block_count: u32,
        _datalink: i32,
    ) -> Result<(), PrimitiveError> {
        self.calls += 1;
        if self.fail_on_call == Some(self.calls) {
            return Err(PrimitiveError::new(-3, "scripted accounting failure"));
        }
        if !self.pace.is_zero() {
            thread::sleep(self.pace);
        }
        self.recorded.0.lock().push(block_count);
        self.board
            .add_all(&[("batches", 1), ("blocks", u64::from(block_count))]);
        Ok(())
    }

    fn close(&mut self) -> i32 {
        self.board.set("closed", 1);
        self.close_code
    }

    fn statistics(&self) -> StatsBoard {
        self.board.clone()
    }
}

/// Device lookup over a fixed device list.
pub struct StaticDevices(pub Vec<DeviceInfo>);

impl StaticDevices {
    /// A single `eth0` carrying 192.168.88.8.
    pub fn eth0() -> Self {
        Self(vec![DeviceInfo::new("eth0")
            .with_address(IpAddr::V4(Ipv4Addr::new(192, 168, 88, 8)))])
    }
}

impl DeviceLookup for StaticDevices {
    fn list(&self) -> Result<Vec<DeviceInfo>, PrimitiveError> {
        Ok(self.0.clone())
    }
}
