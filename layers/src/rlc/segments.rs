//! Byte-segment store for SDU reassembly
//!
//! Keeps the received parts of one SDU keyed by segment offset. Overlapping
//! bytes are only stored once; the part received first wins.

use super::pdu::RlcSiField;
use super::status::SO_END_OF_SDU;
use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone)]
pub struct SduSegments {
    segments: BTreeMap<u32, Bytes>,
    /// Known once the last segment arrived
    total_len: Option<u32>,
}

impl SduSegments {
    /// Store the bytes of `payload` at `so` that are not yet present.
    /// Returns false if every byte was a duplicate.
    pub fn insert(&mut self, si: RlcSiField, so: u32, payload: Bytes) -> bool {
        if payload.is_empty() {
            return false;
        }
        let end = so + payload.len() as u32;
        if si == RlcSiField::LastSegment || si == RlcSiField::FullSdu {
            self.total_len = Some(end);
        }

        let mut cursor = so;
        let mut stored = false;
        let overlapping: Vec<(u32, u32)> = self
            .segments
            .range(..end)
            .map(|(start, seg)| (*start, *start + seg.len() as u32))
            .filter(|(_, seg_end)| *seg_end > so)
            .collect();

        let mut pieces = Vec::new();
        for (seg_start, seg_end) in overlapping {
            if seg_start > cursor {
                pieces.push((cursor, seg_start));
            }
            cursor = cursor.max(seg_end);
        }
        if cursor < end {
            pieces.push((cursor, end));
        }

        for (start, stop) in pieces {
            let lo = (start - so) as usize;
            let hi = (stop - so) as usize;
            self.segments.insert(start, payload.slice(lo..hi));
            stored = true;
        }
        stored
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of contiguous bytes received from offset 0
    fn contiguous_len(&self) -> u32 {
        let mut next = 0;
        for (start, seg) in &self.segments {
            if *start != next {
                break;
            }
            next += seg.len() as u32;
        }
        next
    }

    /// True if a byte is missing before the last received byte
    pub fn has_gap(&self) -> bool {
        let Some((last_start, last_seg)) = self.segments.iter().next_back() else {
            return false;
        };
        self.contiguous_len() < *last_start + last_seg.len() as u32
    }

    pub fn fully_received(&self) -> bool {
        match self.total_len {
            Some(total) => !self.segments.is_empty() && self.contiguous_len() >= total,
            None => false,
        }
    }

    /// Missing byte ranges as `(so_start, so_end)` with `so_end` inclusive.
    /// A missing tail of unknown length ends with [`SO_END_OF_SDU`].
    pub fn missing_ranges(&self) -> Vec<(u16, u16)> {
        let mut ranges = Vec::new();
        let mut next = 0u32;
        for (start, seg) in &self.segments {
            if *start > next {
                ranges.push((next as u16, (*start - 1) as u16));
            }
            next = next.max(*start + seg.len() as u32);
        }
        match self.total_len {
            Some(total) if next < total => ranges.push((next as u16, (total - 1) as u16)),
            Some(_) => {}
            None => ranges.push((next as u16, SO_END_OF_SDU)),
        }
        ranges
    }

    /// Concatenate all segments. Only meaningful once fully received.
    pub fn reassemble(&self) -> Bytes {
        if self.segments.len() == 1 {
            if let Some(seg) = self.segments.values().next() {
                return seg.clone();
            }
        }
        let mut sdu = BytesMut::with_capacity(self.total_len.unwrap_or(0) as usize);
        for seg in self.segments.values() {
            sdu.extend_from_slice(seg);
        }
        sdu.freeze()
    }
}
