//! Live capture primitive backed by libpcap.

use std::time::{Duration, Instant};

use netran_core::{
    BatchBuilder, CaptureBatch, CaptureMode, CaptureParams, CapturePrimitive, CaptureStatus,
    Datalink, PrimitiveError, StatsBoard,
};
use pcap::{Active, Capture};
use tracing::{debug, trace};

const ERR_OPEN: i32 = 1;
const ERR_ALREADY_OPEN: i32 = 2;
const ERR_NOT_OPEN: i32 = 3;
const ERR_READ: i32 = 4;

/// Reads packets from a live pcap handle into fixed-size-block batches.
///
/// A batch ends when it holds `max_blocks` blocks, when a read times out, or
/// when one read-timeout worth of time has passed since the batch started.
pub struct PcapCapture {
    capture: Option<Capture<Active>>,
    snaplen: usize,
    max_blocks: usize,
    batch_window: Duration,
    datalink: Datalink,
    board: StatsBoard,
    debug_level: u8,
}

impl PcapCapture {
    pub fn new(max_blocks: usize) -> Self {
        Self {
            capture: None,
            snaplen: 0,
            max_blocks: max_blocks.max(1),
            batch_window: Duration::from_secs(1),
            datalink: Datalink::ETHERNET,
            board: StatsBoard::new(),
            debug_level: 0,
        }
    }

    pub fn datalink(&self) -> Datalink {
        self.datalink
    }

    fn publish_pcap_stats(&mut self) {
        let Some(capture) = self.capture.as_mut() else {
            return;
        };
        if let Ok(stat) = capture.stats() {
            self.board.set("pcap_received", u64::from(stat.received));
            self.board.set("pcap_dropped", u64::from(stat.dropped));
            self.board.set("pcap_if_dropped", u64::from(stat.if_dropped));
        }
    }
}

impl CapturePrimitive for PcapCapture {
    fn set_debug_level(&mut self, level: u8) -> u8 {
        self.debug_level = level;
        level
    }

    fn open(&mut self, params: &CaptureParams) -> CaptureStatus {
        if self.capture.is_some() {
            return CaptureStatus::failed(ERR_ALREADY_OPEN, "capture handle already open");
        }

        let timeout_ms = params.timeout.as_millis().clamp(1, i32::MAX as u128) as i32;
        let opened = Capture::from_device(params.device.name.as_str()).and_then(|inactive| {
            inactive
                .promisc(params.promiscuous)
                .snaplen(params.snaplen as i32)
                .timeout(timeout_ms)
                .buffer_size(params.buffer_size.min(i32::MAX as usize) as i32)
                .open()
        });

        match opened {
            Ok(capture) => {
                self.datalink = Datalink(capture.get_datalink().0);
                self.snaplen = params.snaplen as usize;
                self.batch_window = params.timeout;
                self.capture = Some(capture);
                debug!(
                    device = %params.device.name,
                    datalink = self.datalink.0,
                    snaplen = self.snaplen,
                    "pcap handle opened"
                );
                CaptureStatus::ok()
            }
            Err(e) => CaptureStatus::failed(ERR_OPEN, e.to_string()),
        }
    }

    fn capture_one(&mut self, mode: CaptureMode) -> Result<CaptureBatch, PrimitiveError> {
        let capture = self
            .capture
            .as_mut()
            .ok_or_else(|| PrimitiveError::new(ERR_NOT_OPEN, "capture handle not open"))?;

        let mut builder = match mode {
            CaptureMode::Queue => Some(BatchBuilder::new(
                self.snaplen,
                self.datalink,
                self.max_blocks.min(64),
            )),
            CaptureMode::Discard => None,
        };

        let started = Instant::now();
        let mut blocks = 0u64;
        let mut wire_bytes = 0u64;
        while (blocks as usize) < self.max_blocks && started.elapsed() < self.batch_window {
            match capture.next_packet() {
                Ok(packet) => {
                    blocks += 1;
                    wire_bytes += u64::from(packet.header.len);
                    if let Some(builder) = builder.as_mut() {
                        builder.push_block(
                            packet.header.ts.tv_sec as u32,
                            packet.header.ts.tv_usec as u32,
                            packet.header.len,
                            packet.data,
                        );
                    }
                }
                Err(pcap::Error::TimeoutExpired) => break,
                Err(e) => return Err(PrimitiveError::new(ERR_READ, e.to_string())),
            }
        }

        let counter = match mode {
            CaptureMode::Queue => "blocks_captured",
            CaptureMode::Discard => "blocks_discarded",
        };
        self.board
            .add_all(&[("batches", 1), (counter, blocks), ("bytes_captured", wire_bytes)]);
        self.publish_pcap_stats();

        if self.debug_level >= 2 {
            trace!(?mode, blocks, wire_bytes, "pcap batch complete");
        }

        let block_size = (netran_core::batch::BLOCK_HEADER_LEN + self.snaplen) as u32;
        Ok(match builder {
            Some(builder) => builder.finish(),
            None => CaptureBatch::empty(block_size, self.datalink),
        })
    }

    fn close(&mut self) -> CaptureStatus {
        self.publish_pcap_stats();
        match self.capture.take() {
            Some(_capture) => CaptureStatus::ok(),
            None => CaptureStatus::failed(ERR_NOT_OPEN, "capture handle not open"),
        }
    }

    fn statistics(&self) -> StatsBoard {
        self.board.clone()
    }
}
