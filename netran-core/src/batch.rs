//! Capture batches and their fixed-size block layout.
//!
//! A batch buffer holds `block_count` blocks of `block_size` bytes each. Every
//! block starts with a 16-byte little-endian [`BlockHeader`] followed by the
//! captured bytes, zero padded up to the block size.

use bytes::{BufMut, Bytes, BytesMut};

/// Length of the per-block header in bytes.
pub const BLOCK_HEADER_LEN: usize = 16;

/// pcap link-type identifier (`DLT_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Datalink(pub i32);

impl Datalink {
    pub const NULL: Datalink = Datalink(0);
    pub const ETHERNET: Datalink = Datalink(1);
    pub const RAW: Datalink = Datalink(12);
    pub const IPV4: Datalink = Datalink(228);
    pub const IPV6: Datalink = Datalink(229);
    pub const RAW_ALT: Datalink = Datalink(101);
    pub const LINUX_SLL: Datalink = Datalink(113);
}

/// Per-block header, mirroring the pcap record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHeader {
    pub ts_sec: u32,
    pub ts_usec: u32,
    /// Bytes actually stored in the block.
    pub caplen: u32,
    /// Length of the packet on the wire.
    pub wire_len: u32,
}

impl BlockHeader {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.ts_sec);
        buf.put_u32_le(self.ts_usec);
        buf.put_u32_le(self.caplen);
        buf.put_u32_le(self.wire_len);
    }

    /// Decodes a header from the first [`BLOCK_HEADER_LEN`] bytes of `raw`.
    pub fn read_from(raw: &[u8]) -> Option<Self> {
        let raw = raw.get(..BLOCK_HEADER_LEN)?;
        let field = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        Some(Self {
            ts_sec: field(0),
            ts_usec: field(4),
            caplen: field(8),
            wire_len: field(12),
        })
    }
}

/// One unit of captured traffic handed from capture to accounting.
///
/// Deliberately not `Clone`: a batch is moved into the queue and out again,
/// so exactly one component holds it at any time.
#[derive(Debug)]
pub struct CaptureBatch {
    buffer: Bytes,
    block_size: u32,
    block_count: u32,
    datalink: Datalink,
}

impl CaptureBatch {
    /// Wraps a raw buffer produced by a capture primitive.
    pub fn new(buffer: Bytes, block_size: u32, block_count: u32, datalink: Datalink) -> Self {
        Self {
            buffer,
            block_size,
            block_count,
            datalink,
        }
    }

    /// A batch carrying no blocks.
    pub fn empty(block_size: u32, datalink: Datalink) -> Self {
        Self::new(Bytes::new(), block_size, 0, datalink)
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    pub fn datalink(&self) -> Datalink {
        self.datalink
    }

    pub fn is_empty(&self) -> bool {
        self.block_count == 0
    }

    /// Iterates over the blocks, yielding each header with its captured bytes.
    ///
    /// Stops early if the buffer is shorter than the descriptors claim.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks::new(&self.buffer, self.block_size as usize, self.block_count as usize)
    }

    pub fn into_parts(self) -> (Bytes, u32, u32, Datalink) {
        (self.buffer, self.block_size, self.block_count, self.datalink)
    }
}

/// Iterator over the blocks of a raw batch buffer.
pub struct Blocks<'a> {
    buffer: &'a [u8],
    block_size: usize,
    remaining: usize,
}

impl<'a> Blocks<'a> {
    pub fn new(buffer: &'a [u8], block_size: usize, block_count: usize) -> Self {
        let remaining = if block_size < BLOCK_HEADER_LEN {
            0
        } else {
            block_count
        };
        Self {
            buffer,
            block_size,
            remaining,
        }
    }
}

impl<'a> Iterator for Blocks<'a> {
    type Item = (BlockHeader, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.buffer.len() < self.block_size {
            return None;
        }
        let (block, rest) = self.buffer.split_at(self.block_size);
        self.buffer = rest;
        self.remaining -= 1;

        let header = BlockHeader::read_from(block)?;
        let payload = &block[BLOCK_HEADER_LEN..];
        let caplen = (header.caplen as usize).min(payload.len());
        Some((header, &payload[..caplen]))
    }
}

/// Assembles a batch block by block.
pub struct BatchBuilder {
    buffer: BytesMut,
    block_size: usize,
    block_count: u32,
    datalink: Datalink,
}

impl BatchBuilder {
    /// `snaplen` is the largest payload a block can carry.
    pub fn new(snaplen: usize, datalink: Datalink, expected_blocks: usize) -> Self {
        let block_size = BLOCK_HEADER_LEN + snaplen;
        Self {
            buffer: BytesMut::with_capacity(block_size * expected_blocks),
            block_size,
            block_count: 0,
            datalink,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Appends one block, truncating `data` to the snap length.
    pub fn push_block(&mut self, ts_sec: u32, ts_usec: u32, wire_len: u32, data: &[u8]) {
        let payload_room = self.block_size - BLOCK_HEADER_LEN;
        let stored = &data[..data.len().min(payload_room)];
        let header = BlockHeader {
            ts_sec,
            ts_usec,
            caplen: stored.len() as u32,
            wire_len,
        };
        header.write_to(&mut self.buffer);
        self.buffer.put_slice(stored);
        self.buffer.put_bytes(0, payload_room - stored.len());
        self.block_count += 1;
    }

    pub fn finish(self) -> CaptureBatch {
        CaptureBatch::new(
            self.buffer.freeze(),
            self.block_size as u32,
            self.block_count,
            self.datalink,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_lays_out_fixed_size_blocks() {
        let mut builder = BatchBuilder::new(8, Datalink::ETHERNET, 2);
        builder.push_block(10, 20, 4, b"abcd");
        builder.push_block(11, 21, 60, b"0123456789");
        let batch = builder.finish();

        assert_eq!(batch.block_size(), 24);
        assert_eq!(batch.block_count(), 2);
        assert_eq!(batch.buffer().len(), 48);

        let blocks: Vec<_> = batch.blocks().collect();
        assert_eq!(blocks[0].0.ts_sec, 10);
        assert_eq!(blocks[0].1, b"abcd");
        assert_eq!(blocks[1].0.caplen, 8);
        assert_eq!(blocks[1].0.wire_len, 60);
        assert_eq!(blocks[1].1, b"01234567");
    }

    #[test]
    fn blocks_stop_at_truncated_buffer() {
        let mut builder = BatchBuilder::new(4, Datalink::ETHERNET, 1);
        builder.push_block(0, 0, 4, b"wxyz");
        let (buffer, block_size, _, datalink) = builder.finish().into_parts();

        // Claim three blocks while only one is present.
        let batch = CaptureBatch::new(buffer, block_size, 3, datalink);
        assert_eq!(batch.blocks().count(), 1);
    }

    #[test]
    fn undersized_blocks_yield_nothing() {
        let batch = CaptureBatch::new(Bytes::from_static(&[0u8; 32]), 8, 4, Datalink::RAW);
        assert_eq!(batch.blocks().count(), 0);
    }

    #[test]
    fn empty_batch_has_no_blocks() {
        let batch = CaptureBatch::empty(1500, Datalink::ETHERNET);
        assert!(batch.is_empty());
        assert_eq!(batch.blocks().count(), 0);
    }
}
