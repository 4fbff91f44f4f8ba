//! ## netran-accounting::accountant
//! **Per-direction traffic accounting against one measurement destination**
//!
//! Every block is attributed to the local device by its source or destination
//! address. Traffic leaving the device is "up", traffic arriving is "down".
//! Packets exchanged with the configured destination are counted separately
//! from everything else.

use std::net::IpAddr;

use netran_core::batch::{Blocks, BLOCK_HEADER_LEN};
use netran_core::{AccountingPrimitive, Datalink, DeviceInfo, PrimitiveError, StatsBoard};
use tracing::{debug, trace};

use crate::frame::FrameParser;

pub const ERR_NO_ADDRESS: i32 = 1;
pub const ERR_ALREADY_OPEN: i32 = 2;
pub const ERR_NOT_OPEN: i32 = 3;
pub const ERR_TRUNCATED: i32 = 4;

struct Binding {
    device: String,
    local: Vec<IpAddr>,
    destination: IpAddr,
}

#[derive(Default)]
struct Tally {
    packets_total: u64,
    bytes_total: u64,
    packets_destination: u64,
    bytes_up_destination: u64,
    bytes_down_destination: u64,
    packets_other: u64,
    bytes_up_other: u64,
    bytes_down_other: u64,
    packets_unaccounted: u64,
}

impl Tally {
    fn publish(&self, board: &StatsBoard) {
        board.add_all(&[
            ("batches", 1),
            ("packets_total", self.packets_total),
            ("bytes_total", self.bytes_total),
            ("packets_destination", self.packets_destination),
            ("bytes_up_destination", self.bytes_up_destination),
            ("bytes_down_destination", self.bytes_down_destination),
            ("packets_other", self.packets_other),
            ("bytes_up_other", self.bytes_up_other),
            ("bytes_down_other", self.bytes_down_other),
            ("packets_unaccounted", self.packets_unaccounted),
        ]);
    }
}

#[derive(Default)]
pub struct TrafficAccountant {
    binding: Option<Binding>,
    board: StatsBoard,
    debug_level: u8,
}

impl TrafficAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.binding.is_some()
    }

    fn account(binding: &Binding, parser: &FrameParser, blocks: Blocks<'_>, tally: &mut Tally) {
        for (header, frame) in blocks {
            let bytes = u64::from(header.wire_len);
            tally.packets_total += 1;
            tally.bytes_total += bytes;

            let Ok(endpoints) = parser.parse(frame) else {
                tally.packets_unaccounted += 1;
                continue;
            };
            let (upstream, peer) = if binding.local.contains(&endpoints.source) {
                (true, endpoints.destination)
            } else if binding.local.contains(&endpoints.destination) {
                (false, endpoints.source)
            } else {
                tally.packets_unaccounted += 1;
                continue;
            };

            if peer == binding.destination {
                tally.packets_destination += 1;
                if upstream {
                    tally.bytes_up_destination += bytes;
                } else {
                    tally.bytes_down_destination += bytes;
                }
            } else {
                tally.packets_other += 1;
                if upstream {
                    tally.bytes_up_other += bytes;
                } else {
                    tally.bytes_down_other += bytes;
                }
            }
        }
    }
}

impl AccountingPrimitive for TrafficAccountant {
    fn set_debug_level(&mut self, level: u8) -> u8 {
        self.debug_level = level;
        level
    }

    fn open(&mut self, device: &DeviceInfo, destination: IpAddr) -> i32 {
        if self.binding.is_some() {
            return ERR_ALREADY_OPEN;
        }
        if device.addresses.is_empty() {
            debug!(device = %device.name, "device has no address to account against");
            return ERR_NO_ADDRESS;
        }
        self.binding = Some(Binding {
            device: device.name.clone(),
            local: device.addresses.clone(),
            destination,
        });
        debug!(device = %device.name, %destination, "traffic accountant bound");
        0
    }

    fn analyze(
        &mut self,
        buffer: &[u8],
        block_size: u32,
        block_count: u32,
        datalink: i32,
    ) -> Result<(), PrimitiveError> {
        let binding = self
            .binding
            .as_ref()
            .ok_or_else(|| PrimitiveError::new(ERR_NOT_OPEN, "accountant not open"))?;

        let block_size = block_size as usize;
        let needed = block_size.saturating_mul(block_count as usize);
        if block_size < BLOCK_HEADER_LEN || buffer.len() < needed {
            return Err(PrimitiveError::new(
                ERR_TRUNCATED,
                format!(
                    "truncated batch: {} bytes for {block_count} blocks of {block_size}",
                    buffer.len()
                ),
            ));
        }

        let parser = FrameParser::new(Datalink(datalink));
        let mut tally = Tally::default();
        Self::account(
            binding,
            &parser,
            Blocks::new(buffer, block_size, block_count as usize),
            &mut tally,
        );
        tally.publish(&self.board);

        if self.debug_level >= 3 {
            trace!(
                device = %binding.device,
                blocks = block_count,
                unaccounted = tally.packets_unaccounted,
                "batch accounted"
            );
        }
        Ok(())
    }

    fn close(&mut self) -> i32 {
        match self.binding.take() {
            Some(binding) => {
                debug!(device = %binding.device, "traffic accountant closed");
                0
            }
            None => ERR_NOT_OPEN,
        }
    }

    fn statistics(&self) -> StatsBoard {
        self.board.clone()
    }
}
