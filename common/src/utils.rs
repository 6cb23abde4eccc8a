//! Common Utilities
//!
//! Hex dumps and bit-level packing helpers for protocol headers

use bytes::{BufMut, Bytes, BytesMut};

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// MSB-first bit writer backed by a `BytesMut`
#[derive(Debug, Default)]
pub struct BitEncoder {
    buf: BytesMut,
    /// Bits already used in the last byte (0 means byte aligned)
    offset: u32,
}

impl BitEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(bytes),
            offset: 0,
        }
    }

    /// Append the `nbits` least significant bits of `value`
    pub fn pack(&mut self, value: u32, nbits: u32) {
        debug_assert!(nbits <= 32);
        let mut remaining = nbits;
        while remaining > 0 {
            if self.offset == 0 {
                self.buf.put_u8(0);
            }
            let free = 8 - self.offset;
            let take = remaining.min(free);
            let shift = remaining - take;
            let chunk = ((u64::from(value) >> shift) & ((1u64 << take) - 1)) as u8;
            let last = self.buf.len() - 1;
            self.buf[last] |= chunk << (free - take);
            self.offset = (self.offset + take) % 8;
            remaining -= take;
        }
    }

    /// Append whole bytes, aligning first
    pub fn pack_bytes(&mut self, data: &[u8]) {
        self.align8();
        self.buf.put_slice(data);
    }

    /// Pad with zero bits up to the next byte boundary
    pub fn align8(&mut self) {
        self.offset = 0;
    }

    pub fn nof_bits(&self) -> usize {
        let unused = if self.offset == 0 { 0 } else { 8 - self.offset as usize };
        self.buf.len() * 8 - unused
    }

    pub fn nof_bytes(&self) -> usize {
        self.buf.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// MSB-first bit reader over a byte slice
#[derive(Debug)]
pub struct BitDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read `nbits` bits (at most 32). Returns `None` when not enough bits are left.
    pub fn unpack(&mut self, nbits: u32) -> Option<u32> {
        debug_assert!(nbits <= 32);
        if self.bits_left() < nbits as usize {
            return None;
        }
        let mut value = 0u32;
        for _ in 0..nbits {
            let byte = self.data[self.pos / 8];
            let bit = (byte >> (7 - (self.pos % 8))) & 1;
            value = (value << 1) | u32::from(bit);
            self.pos += 1;
        }
        Some(value)
    }

    /// Read a single bit as a flag
    pub fn unpack_bool(&mut self) -> Option<bool> {
        self.unpack(1).map(|b| b == 1)
    }

    /// Skip to the next byte boundary
    pub fn align8(&mut self) {
        self.pos = self.pos.div_ceil(8) * 8;
    }

    pub fn bits_left(&self) -> usize {
        self.data.len() * 8 - self.pos.min(self.data.len() * 8)
    }

    /// Byte position of the reader (rounded up)
    pub fn byte_pos(&self) -> usize {
        self.pos.div_ceil(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_hex() {
        let data = vec![0x12, 0x34, 0xAB, 0xCD];
        assert_eq!(bytes_to_hex(&data), "12 34 ab cd");
    }

    #[test]
    fn test_bit_encoder_packs_msb_first() {
        let mut enc = BitEncoder::new();
        enc.pack(0, 1);
        enc.pack(0, 3);
        enc.pack(0, 4);
        enc.pack(0x1234_5678, 32);
        enc.pack(0b101, 3);
        assert_eq!(enc.nof_bits(), 43);
        assert_eq!(enc.as_slice(), &[0x00, 0x12, 0x34, 0x56, 0x78, 0xa0]);
    }

    #[test]
    fn test_bit_encoder_straddles_bytes() {
        let mut enc = BitEncoder::new();
        enc.pack(1, 1);
        enc.pack(0xfff, 12);
        assert_eq!(enc.as_slice(), &[0xff, 0xf8]);
        enc.align8();
        enc.pack_bytes(&[0xaa]);
        assert_eq!(enc.nof_bytes(), 3);
    }

    #[test]
    fn test_bit_decoder() {
        let data = [0xff, 0xf8, 0x80];
        let mut dec = BitDecoder::new(&data);
        assert_eq!(dec.unpack_bool(), Some(true));
        assert_eq!(dec.unpack(12), Some(0xfff));
        dec.align8();
        assert_eq!(dec.byte_pos(), 2);
        assert_eq!(dec.unpack(1), Some(1));
        assert_eq!(dec.bits_left(), 7);
        assert_eq!(dec.unpack(8), None);
    }
}
