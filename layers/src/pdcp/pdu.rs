//! PDCP PDU formats (TS 38.323 clause 6.2)

use super::config::{PdcpRbType, PdcpSnSize};
use bytes::{BufMut, Bytes, BytesMut};
use common::{BitDecoder, BitEncoder};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Upper bound for the size of a PDCP control PDU
pub const PDCP_CONTROL_PDU_MAX_SIZE: usize = 9000;

/// D/C field
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum PdcpDcField {
    Control = 0,
    Data = 1,
}

/// PDU type field of control PDUs
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum PdcpControlPduType {
    StatusReport = 0,
    RohcFeedback = 1,
    EhcFeedback = 2,
}

/// D/C field of a DRB PDU. SRB PDUs are always data PDUs.
pub fn pdu_dc_field(pdu: &[u8]) -> Option<PdcpDcField> {
    pdu.first().and_then(|b| PdcpDcField::from_u8(b >> 7))
}

pub fn control_pdu_type(pdu: &[u8]) -> Option<PdcpControlPduType> {
    pdu.first().and_then(|b| PdcpControlPduType::from_u8((b >> 4) & 0x07))
}

/// Append a data PDU header carrying `sn`
pub fn write_data_pdu_header(buf: &mut BytesMut, rb_type: PdcpRbType, sn_size: PdcpSnSize, sn: u32) {
    let dc = if rb_type == PdcpRbType::Drb { 0x80 } else { 0x00 };
    match sn_size {
        PdcpSnSize::Size12 => {
            buf.put_u8(dc | ((sn >> 8) & 0x0f) as u8);
            buf.put_u8(sn as u8);
        }
        PdcpSnSize::Size18 => {
            buf.put_u8(dc | ((sn >> 16) & 0x03) as u8);
            buf.put_u8((sn >> 8) as u8);
            buf.put_u8(sn as u8);
        }
    }
}

/// SN of a data PDU, or `None` when the PDU is shorter than the header
pub fn read_data_pdu_sn(pdu: &[u8], sn_size: PdcpSnSize) -> Option<u32> {
    match sn_size {
        PdcpSnSize::Size12 => match pdu {
            [b0, b1, ..] => Some((u32::from(b0 & 0x0f) << 8) | u32::from(*b1)),
            _ => None,
        },
        PdcpSnSize::Size18 => match pdu {
            [b0, b1, b2, ..] => {
                Some((u32::from(b0 & 0x03) << 16) | (u32::from(*b1) << 8) | u32::from(*b2))
            }
            _ => None,
        },
    }
}

/// PDCP SN of an SDU handed to RLC, `None` for control PDUs
pub fn pdcp_sn_of_sdu(sdu: &[u8], rb_type: PdcpRbType, sn_size: PdcpSnSize) -> Option<u32> {
    if rb_type == PdcpRbType::Drb && pdu_dc_field(sdu) != Some(PdcpDcField::Data) {
        return None;
    }
    read_data_pdu_sn(sdu, sn_size)
}

/// Decoded PDCP status report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdcpStatusReport {
    /// First missing COUNT
    pub fmc: u32,
    /// Bit i set means COUNT `fmc + 1 + i` was received
    pub bitmap: Vec<bool>,
}

impl PdcpStatusReport {
    /// Encode as a control PDU, truncating the bitmap to fit [`PDCP_CONTROL_PDU_MAX_SIZE`]
    pub fn pack(&self) -> Bytes {
        let max_bits = (PDCP_CONTROL_PDU_MAX_SIZE - 5) * 8;
        let nof_bits = self.bitmap.len().min(max_bits);
        let mut enc = BitEncoder::with_capacity(5 + nof_bits.div_ceil(8));
        enc.pack(PdcpDcField::Control as u32, 1);
        enc.pack(PdcpControlPduType::StatusReport as u32, 3);
        enc.pack(0, 4);
        enc.pack(self.fmc, 32);
        for bit in &self.bitmap[..nof_bits] {
            enc.pack(u32::from(*bit), 1);
        }
        enc.freeze()
    }

    /// Decode a status report. Trailing padding bits are returned as part of the bitmap.
    pub fn unpack(pdu: &[u8]) -> Option<Self> {
        let mut dec = BitDecoder::new(pdu);
        if dec.unpack(1)? != PdcpDcField::Control as u32 {
            return None;
        }
        if dec.unpack(3)? != PdcpControlPduType::StatusReport as u32 {
            return None;
        }
        if dec.unpack(4)? != 0 {
            return None;
        }
        let fmc = dec.unpack(32)?;
        let bitmap = std::iter::from_fn(|| dec.unpack_bool()).collect();
        Some(Self { fmc, bitmap })
    }
}
