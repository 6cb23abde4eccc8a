//! AM status PDU (TS 38.322 clause 6.2.2.5)

use super::config::RlcAmSnSize;
use super::pdu::{PduParseError, RlcDcField};
use bytes::Bytes;
use common::{BitDecoder, BitEncoder};
use std::fmt;

/// SO_end value meaning "up to the last byte of the SDU"
pub const SO_END_OF_SDU: u16 = 0xffff;

/// D/C + CPT + ACK_SN + E1, padded to a byte boundary
const STATUS_HEADER_SIZE: usize = 3;

/// Control PDU type of status PDUs
const CPT_STATUS_PDU: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RlcAmStatusNack {
    pub nack_sn: u32,
    pub has_so: bool,
    pub so_start: u16,
    pub so_end: u16,
    pub has_nack_range: bool,
    /// Number of consecutive SNs NACKed, starting at `nack_sn`
    pub nack_range: u8,
}

impl RlcAmStatusNack {
    pub fn whole_sdu(nack_sn: u32) -> Self {
        Self {
            nack_sn,
            ..Default::default()
        }
    }

    pub fn segment(nack_sn: u32, so_start: u16, so_end: u16) -> Self {
        Self {
            nack_sn,
            has_so: true,
            so_start,
            so_end,
            ..Default::default()
        }
    }

    fn packed_size(&self, sn_size: RlcAmSnSize) -> usize {
        let base = match sn_size {
            RlcAmSnSize::Size12 => 2,
            RlcAmSnSize::Size18 => 3,
        };
        base + if self.has_so { 4 } else { 0 } + usize::from(self.has_nack_range)
    }
}

impl fmt::Display for RlcAmStatusNack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sn={}", self.nack_sn)?;
        if self.has_so {
            write!(f, " so={}:{}", self.so_start, self.so_end)?;
        }
        if self.has_nack_range {
            write!(f, " range={}", self.nack_range)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RlcAmStatusPdu {
    sn_size: RlcAmSnSize,
    pub ack_sn: u32,
    nacks: Vec<RlcAmStatusNack>,
    packed_size: usize,
}

impl fmt::Display for RlcAmStatusPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ack_sn={} n_nack={}", self.ack_sn, self.nacks.len())?;
        for nack in &self.nacks {
            write!(f, " [{}]", nack)?;
        }
        Ok(())
    }
}

impl RlcAmStatusPdu {
    pub fn new(sn_size: RlcAmSnSize) -> Self {
        Self {
            sn_size,
            ack_sn: 0,
            nacks: Vec::new(),
            packed_size: STATUS_HEADER_SIZE,
        }
    }

    pub fn reset(&mut self) {
        self.ack_sn = 0;
        self.nacks.clear();
        self.packed_size = STATUS_HEADER_SIZE;
    }

    pub fn nacks(&self) -> &[RlcAmStatusNack] {
        &self.nacks
    }

    pub fn packed_size(&self) -> usize {
        self.packed_size
    }

    fn modulus(&self) -> u32 {
        common::sn::cardinality(self.sn_size.bits())
    }

    /// Append a NACK. Whole-SDU NACKs of consecutive SNs are merged into a range.
    pub fn push_nack(&mut self, nack: RlcAmStatusNack) {
        let modulus = self.modulus();
        if let Some(prev) = self.nacks.last_mut() {
            if !prev.has_so && !nack.has_so && !nack.has_nack_range {
                let span = if prev.has_nack_range {
                    u32::from(prev.nack_range)
                } else {
                    1
                };
                if (prev.nack_sn + span) % modulus == nack.nack_sn {
                    if !prev.has_nack_range {
                        prev.has_nack_range = true;
                        prev.nack_range = 2;
                        self.packed_size += 1;
                        return;
                    }
                    if prev.nack_range < u8::MAX {
                        prev.nack_range += 1;
                        return;
                    }
                }
            }
        }
        self.packed_size += nack.packed_size(self.sn_size);
        self.nacks.push(nack);
    }

    /// Drop NACKs from the end until the PDU fits `max_size` bytes, moving
    /// ACK_SN down to the first SN that is no longer reported.
    pub fn trim(&mut self, max_size: usize) -> bool {
        if max_size < STATUS_HEADER_SIZE {
            return false;
        }
        while self.packed_size > max_size {
            let Some(nack) = self.nacks.pop() else {
                return false;
            };
            self.packed_size -= nack.packed_size(self.sn_size);
            self.ack_sn = nack.nack_sn;
        }
        true
    }

    pub fn pack(&self) -> Bytes {
        let sn_bits = self.sn_size.bits();
        let mut enc = BitEncoder::with_capacity(self.packed_size);
        enc.pack(RlcDcField::Control as u32, 1);
        enc.pack(CPT_STATUS_PDU, 3);
        enc.pack(self.ack_sn, sn_bits);
        enc.pack(u32::from(!self.nacks.is_empty()), 1);
        enc.align8();
        for (i, nack) in self.nacks.iter().enumerate() {
            let more = i + 1 < self.nacks.len();
            enc.pack(nack.nack_sn, sn_bits);
            enc.pack(u32::from(more), 1);
            enc.pack(u32::from(nack.has_so), 1);
            enc.pack(u32::from(nack.has_nack_range), 1);
            enc.align8();
            if nack.has_so {
                enc.pack(u32::from(nack.so_start), 16);
                enc.pack(u32::from(nack.so_end), 16);
            }
            if nack.has_nack_range {
                enc.pack(u32::from(nack.nack_range), 8);
            }
        }
        enc.freeze()
    }

    pub fn unpack(pdu: &[u8], sn_size: RlcAmSnSize) -> Result<Self, PduParseError> {
        let sn_bits = sn_size.bits();
        let mut dec = BitDecoder::new(pdu);

        if dec.unpack(1).ok_or(PduParseError::Truncated)? != RlcDcField::Control as u32 {
            return Err(PduParseError::UnexpectedDcField);
        }
        let cpt = dec.unpack(3).ok_or(PduParseError::Truncated)?;
        if cpt != CPT_STATUS_PDU {
            return Err(PduParseError::UnsupportedCpt(cpt));
        }
        let mut status = Self::new(sn_size);
        status.ack_sn = dec.unpack(sn_bits).ok_or(PduParseError::Truncated)?;
        let mut e1 = dec.unpack_bool().ok_or(PduParseError::Truncated)?;
        dec.align8();

        while e1 {
            let mut nack = RlcAmStatusNack::whole_sdu(dec.unpack(sn_bits).ok_or(PduParseError::Truncated)?);
            e1 = dec.unpack_bool().ok_or(PduParseError::Truncated)?;
            nack.has_so = dec.unpack_bool().ok_or(PduParseError::Truncated)?;
            nack.has_nack_range = dec.unpack_bool().ok_or(PduParseError::Truncated)?;
            dec.align8();
            if nack.has_so {
                nack.so_start = dec.unpack(16).ok_or(PduParseError::Truncated)? as u16;
                nack.so_end = dec.unpack(16).ok_or(PduParseError::Truncated)? as u16;
                if nack.so_start > nack.so_end {
                    return Err(PduParseError::InvalidSegmentOffset(nack.so_start, nack.so_end));
                }
            }
            if nack.has_nack_range {
                nack.nack_range = dec.unpack(8).ok_or(PduParseError::Truncated)? as u8;
            }
            status.packed_size += nack.packed_size(sn_size);
            status.nacks.push(nack);
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_only_12bit() {
        let mut status = RlcAmStatusPdu::new(RlcAmSnSize::Size12);
        status.ack_sn = 0x123;
        let pdu = status.pack();
        // D/C=0 CPT=000 ACK_SN=0x123 E1=0
        assert_eq!(&pdu[..], &[0x01, 0x23, 0x00]);
        assert_eq!(pdu.len(), status.packed_size());
        assert_eq!(RlcAmStatusPdu::unpack(&pdu, RlcAmSnSize::Size12).unwrap(), status);
    }

    #[test]
    fn test_nacks_12bit_layout() {
        let mut status = RlcAmStatusPdu::new(RlcAmSnSize::Size12);
        status.ack_sn = 10;
        status.push_nack(RlcAmStatusNack::whole_sdu(3));
        status.push_nack(RlcAmStatusNack::segment(5, 2, SO_END_OF_SDU));
        let pdu = status.pack();
        assert_eq!(
            &pdu[..],
            &[0x00, 0x0a, 0x80, 0x00, 0x38, 0x00, 0x54, 0x00, 0x02, 0xff, 0xff]
        );
        assert_eq!(pdu.len(), status.packed_size());
        assert_eq!(RlcAmStatusPdu::unpack(&pdu, RlcAmSnSize::Size12).unwrap(), status);
    }

    #[test]
    fn test_consecutive_nacks_merge_into_range() {
        let mut status = RlcAmStatusPdu::new(RlcAmSnSize::Size18);
        for sn in [7, 8, 9] {
            status.push_nack(RlcAmStatusNack::whole_sdu(sn));
        }
        status.push_nack(RlcAmStatusNack::whole_sdu(11));
        assert_eq!(status.nacks().len(), 2);
        assert!(status.nacks()[0].has_nack_range);
        assert_eq!(status.nacks()[0].nack_range, 3);
        assert_eq!(status.packed_size(), 3 + 4 + 3);

        let decoded = RlcAmStatusPdu::unpack(&status.pack(), RlcAmSnSize::Size18).unwrap();
        assert_eq!(decoded, status);
    }

    #[test]
    fn test_merge_wraps_sn_space() {
        let mut status = RlcAmStatusPdu::new(RlcAmSnSize::Size12);
        status.push_nack(RlcAmStatusNack::whole_sdu(4095));
        status.push_nack(RlcAmStatusNack::whole_sdu(0));
        assert_eq!(status.nacks().len(), 1);
        assert_eq!(status.nacks()[0].nack_range, 2);
    }

    #[test]
    fn test_segment_nacks_do_not_merge() {
        let mut status = RlcAmStatusPdu::new(RlcAmSnSize::Size12);
        status.push_nack(RlcAmStatusNack::segment(1, 0, 9));
        status.push_nack(RlcAmStatusNack::whole_sdu(2));
        assert_eq!(status.nacks().len(), 2);
    }

    #[test]
    fn test_trim_moves_ack_sn() {
        let mut status = RlcAmStatusPdu::new(RlcAmSnSize::Size12);
        status.ack_sn = 20;
        status.push_nack(RlcAmStatusNack::whole_sdu(2));
        status.push_nack(RlcAmStatusNack::whole_sdu(5));
        status.push_nack(RlcAmStatusNack::segment(9, 0, 3));
        assert_eq!(status.packed_size(), 3 + 2 + 2 + 6);

        assert!(status.trim(8));
        assert_eq!(status.nacks().len(), 2);
        assert_eq!(status.ack_sn, 9);
        assert!(status.trim(3));
        assert_eq!(status.ack_sn, 2);
        assert!(status.nacks().is_empty());
        assert!(!status.trim(2));
    }

    #[test]
    fn test_unpack_rejects_bad_pdus() {
        assert_eq!(
            RlcAmStatusPdu::unpack(&[0x80, 0x00, 0x00], RlcAmSnSize::Size12),
            Err(PduParseError::UnexpectedDcField)
        );
        assert_eq!(
            RlcAmStatusPdu::unpack(&[0x10, 0x00, 0x00], RlcAmSnSize::Size12),
            Err(PduParseError::UnsupportedCpt(1))
        );
        // E1 set but no NACK follows
        assert_eq!(
            RlcAmStatusPdu::unpack(&[0x00, 0x00, 0x80], RlcAmSnSize::Size12),
            Err(PduParseError::Truncated)
        );
    }
}
