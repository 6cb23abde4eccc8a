//! RLC PDU headers (TS 38.322 clause 6.2)

use super::config::{RlcAmSnSize, RlcUmSnSize};
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PduParseError {
    #[error("PDU too short for header")]
    Truncated,

    #[error("Unexpected D/C field")]
    UnexpectedDcField,

    #[error("Reserved field not zero")]
    ReservedBitsSet,

    #[error("Unsupported control PDU type {0}")]
    UnsupportedCpt(u32),

    #[error("Invalid segment offsets {0}..{1}")]
    InvalidSegmentOffset(u16, u16),
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for PduParseError {
    fn from(_: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        PduParseError::Truncated
    }
}

/// Segmentation info field
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum RlcSiField {
    FullSdu = 0b00,
    FirstSegment = 0b01,
    LastSegment = 0b10,
    MiddleSegment = 0b11,
}

impl RlcSiField {
    fn from_bits(bits: u8) -> Self {
        RlcSiField::from_u8(bits & 0b11).unwrap_or(RlcSiField::FullSdu)
    }

    /// Segments other than the first carry an SO field
    pub fn has_so(self) -> bool {
        matches!(self, RlcSiField::LastSegment | RlcSiField::MiddleSegment)
    }

    /// Pick the SI of a segment covering `so..so + len` of an SDU of `sdu_len` bytes
    pub fn for_segment(so: usize, len: usize, sdu_len: usize) -> Self {
        match (so == 0, so + len >= sdu_len) {
            (true, true) => RlcSiField::FullSdu,
            (true, false) => RlcSiField::FirstSegment,
            (false, true) => RlcSiField::LastSegment,
            (false, false) => RlcSiField::MiddleSegment,
        }
    }
}

/// D/C field of AM PDUs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlcDcField {
    Control = 0,
    Data = 1,
}

/// True if `pdu` is an AM control (status) PDU
pub fn is_control_pdu(pdu: &[u8]) -> bool {
    pdu.first().is_some_and(|b| b >> 7 == RlcDcField::Control as u8)
}

/// Header of an UMD PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RlcUmPduHeader {
    pub si: RlcSiField,
    pub sn_size: RlcUmSnSize,
    /// Absent for complete SDUs
    pub sn: u32,
    pub so: u16,
}

impl fmt::Display for RlcUmPduHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "si={:?} sn={} so={}", self.si, self.sn, self.so)
    }
}

impl RlcUmPduHeader {
    /// Header length without SO
    pub fn min_size(sn_size: RlcUmSnSize) -> usize {
        match sn_size {
            RlcUmSnSize::Size6 => 1,
            RlcUmSnSize::Size12 => 2,
        }
    }

    /// Header length with SO
    pub fn max_size(sn_size: RlcUmSnSize) -> usize {
        Self::min_size(sn_size) + 2
    }

    pub fn packed_size(&self) -> usize {
        match self.si {
            RlcSiField::FullSdu => 1,
            RlcSiField::FirstSegment => Self::min_size(self.sn_size),
            _ => Self::max_size(self.sn_size),
        }
    }

    /// Write the header to the start of `buf` and return its length.
    /// `buf` must hold at least [`packed_size`](Self::packed_size) bytes.
    pub fn write(&self, buf: &mut [u8]) -> usize {
        let si = (self.si as u8) << 6;
        if self.si == RlcSiField::FullSdu {
            buf[0] = si;
            return 1;
        }
        let mut pos = match self.sn_size {
            RlcUmSnSize::Size6 => {
                buf[0] = si | (self.sn & 0x3f) as u8;
                1
            }
            RlcUmSnSize::Size12 => {
                buf[0] = si | ((self.sn >> 8) & 0x0f) as u8;
                buf[1] = self.sn as u8;
                2
            }
        };
        if self.si.has_so() {
            buf[pos..pos + 2].copy_from_slice(&self.so.to_be_bytes());
            pos += 2;
        }
        pos
    }

    /// Parse the header, returning it with its length
    pub fn parse(pdu: &[u8], sn_size: RlcUmSnSize) -> Result<(Self, usize), PduParseError> {
        let (rest, header) = parse_um_header(pdu, sn_size)?;
        Ok((header, pdu.len() - rest.len()))
    }
}

fn parse_um_header(input: &[u8], sn_size: RlcUmSnSize) -> IResult<&[u8], RlcUmPduHeader> {
    let (input, b0) = be_u8(input)?;
    let si = RlcSiField::from_bits(b0 >> 6);
    let mut header = RlcUmPduHeader {
        si,
        sn_size,
        sn: 0,
        so: 0,
    };
    if si == RlcSiField::FullSdu {
        return Ok((input, header));
    }
    let input = match sn_size {
        RlcUmSnSize::Size6 => {
            header.sn = u32::from(b0 & 0x3f);
            input
        }
        RlcUmSnSize::Size12 => {
            let (input, b1) = be_u8(input)?;
            header.sn = (u32::from(b0 & 0x0f) << 8) | u32::from(b1);
            input
        }
    };
    if si.has_so() {
        let (input, so) = be_u16(input)?;
        header.so = so;
        return Ok((input, header));
    }
    Ok((input, header))
}

/// Header of an AMD PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RlcAmPduHeader {
    /// Poll bit
    pub p: bool,
    pub si: RlcSiField,
    pub sn_size: RlcAmSnSize,
    pub sn: u32,
    pub so: u16,
}

impl fmt::Display for RlcAmPduHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p={} si={:?} sn={} so={}", u8::from(self.p), self.si, self.sn, self.so)
    }
}

impl RlcAmPduHeader {
    pub fn min_size(sn_size: RlcAmSnSize) -> usize {
        match sn_size {
            RlcAmSnSize::Size12 => 2,
            RlcAmSnSize::Size18 => 3,
        }
    }

    pub fn max_size(sn_size: RlcAmSnSize) -> usize {
        Self::min_size(sn_size) + 2
    }

    pub fn packed_size(&self) -> usize {
        if self.si.has_so() {
            Self::max_size(self.sn_size)
        } else {
            Self::min_size(self.sn_size)
        }
    }

    /// Write the header to the start of `buf` and return its length
    pub fn write(&self, buf: &mut [u8]) -> usize {
        let b0 = ((RlcDcField::Data as u8) << 7) | (u8::from(self.p) << 6) | ((self.si as u8) << 4);
        let mut pos = match self.sn_size {
            RlcAmSnSize::Size12 => {
                buf[0] = b0 | ((self.sn >> 8) & 0x0f) as u8;
                buf[1] = self.sn as u8;
                2
            }
            RlcAmSnSize::Size18 => {
                buf[0] = b0 | ((self.sn >> 16) & 0x03) as u8;
                buf[1] = (self.sn >> 8) as u8;
                buf[2] = self.sn as u8;
                3
            }
        };
        if self.si.has_so() {
            buf[pos..pos + 2].copy_from_slice(&self.so.to_be_bytes());
            pos += 2;
        }
        pos
    }

    pub fn parse(pdu: &[u8], sn_size: RlcAmSnSize) -> Result<(Self, usize), PduParseError> {
        let (rest, header) = parse_am_header(pdu, sn_size)?;
        if is_control_pdu(pdu) {
            return Err(PduParseError::UnexpectedDcField);
        }
        if sn_size == RlcAmSnSize::Size18 && pdu[0] & 0x0c != 0 {
            return Err(PduParseError::ReservedBitsSet);
        }
        Ok((header, pdu.len() - rest.len()))
    }
}

fn parse_am_header(input: &[u8], sn_size: RlcAmSnSize) -> IResult<&[u8], RlcAmPduHeader> {
    let (input, b0) = be_u8(input)?;
    let p = b0 & 0x40 != 0;
    let si = RlcSiField::from_bits(b0 >> 4);
    let (input, sn) = match sn_size {
        RlcAmSnSize::Size12 => {
            let (input, b1) = be_u8(input)?;
            (input, (u32::from(b0 & 0x0f) << 8) | u32::from(b1))
        }
        RlcAmSnSize::Size18 => {
            let (input, low) = be_u16(input)?;
            (input, (u32::from(b0 & 0x03) << 16) | u32::from(low))
        }
    };
    let (input, so) = if si.has_so() { be_u16(input)? } else { (input, 0) };
    Ok((
        input,
        RlcAmPduHeader {
            p,
            si,
            sn_size,
            sn,
            so,
        },
    ))
}
