//! Common Types for the L2 user plane
//!
//! Defines fundamental identifiers used throughout the protocol stack

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// DU-local UE index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UeIndex(pub u32);

impl fmt::Display for UeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Radio bearer identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RbId {
    /// Signalling radio bearer (SRB0..SRB3)
    Srb(u8),
    /// Data radio bearer (DRB1..DRB32)
    Drb(u8),
}

impl RbId {
    pub fn is_srb(&self) -> bool {
        matches!(self, RbId::Srb(_))
    }

    pub fn is_drb(&self) -> bool {
        matches!(self, RbId::Drb(_))
    }

    /// 5-bit BEARER input of the 3GPP security algorithms (TS 33.501, clause D.3.1.1)
    pub fn bearer_id(&self) -> u8 {
        match *self {
            RbId::Srb(id) => id.saturating_sub(1) & 0x1f,
            RbId::Drb(id) => id.saturating_sub(1) & 0x1f,
        }
    }
}

impl fmt::Display for RbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RbId::Srb(id) => write!(f, "SRB{}", id),
            RbId::Drb(id) => write!(f, "DRB{}", id),
        }
    }
}

/// Logical channel identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lcid(pub u8);

impl Lcid {
    /// LCID of SRB0
    pub const SRB0: Self = Self(0);
    /// First LCID usable by a DRB
    pub const MIN_DRB: Self = Self(4);

    pub fn is_srb(&self) -> bool {
        *self < Self::MIN_DRB
    }
}

/// Physical Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value (0-1007)
    pub const MAX: u16 = 1007;

    /// Create a new PCI with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
}

impl SubcarrierSpacing {
    /// Parse from a value in kHz
    pub fn from_khz(khz: u16) -> Option<Self> {
        Self::from_u16(khz)
    }

    /// Numerology index mu
    pub fn numerology(&self) -> u8 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
        }
    }

    /// Number of slots per 10 ms frame
    pub fn slots_per_frame(&self) -> u32 {
        10 << self.numerology()
    }
}

/// PLMN Identity (MCC + MNC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlmnId {
    /// Mobile Country Code
    pub mcc: [u8; 3],
    /// Mobile Network Code (2 or 3 digits)
    pub mnc: [u8; 3],
    /// MNC length (2 or 3)
    pub mnc_len: u8,
}

impl PlmnId {
    /// Create a new PLMN ID
    pub fn new(mcc: [u8; 3], mnc: [u8; 3], mnc_len: u8) -> Option<Self> {
        if mnc_len == 2 || mnc_len == 3 {
            Some(Self { mcc, mnc, mnc_len })
        } else {
            None
        }
    }

    /// Parse a digit string such as "00101" or "310260"
    pub fn parse(plmn: &str) -> Option<Self> {
        if !(5..=6).contains(&plmn.len()) {
            return None;
        }
        let digits: Vec<u8> = plmn
            .chars()
            .map(|c| c.to_digit(10).map(|d| d as u8))
            .collect::<Option<_>>()?;
        let mcc = [digits[0], digits[1], digits[2]];
        let mnc = if digits.len() == 5 {
            [digits[3], digits[4], 0]
        } else {
            [digits[3], digits[4], digits[5]]
        };
        Self::new(mcc, mnc, (digits.len() - 3) as u8)
    }

    /// Encode to 3-byte format used in 3GPP
    pub fn encode(&self) -> [u8; 3] {
        let mut encoded = [0u8; 3];
        encoded[0] = (self.mcc[1] << 4) | self.mcc[0];
        encoded[1] = if self.mnc_len == 2 {
            0xF0 | self.mcc[2]
        } else {
            (self.mnc[2] << 4) | self.mcc[2]
        };
        encoded[2] = (self.mnc[1] << 4) | self.mnc[0];
        encoded
    }

    /// Packed BCD value of the encoded identity
    pub fn to_bcd(&self) -> u32 {
        let e = self.encode();
        (e[0] as u32) << 16 | (e[1] as u32) << 8 | e[2] as u32
    }
}

/// S-NSSAI (Single Network Slice Selection Assistance Information)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SNssai {
    /// Slice/Service Type
    pub sst: u8,
    /// Slice Differentiator (optional)
    pub sd: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pci_validation() {
        assert!(Pci::new(0).is_some());
        assert!(Pci::new(1007).is_some());
        assert!(Pci::new(1008).is_none());
    }

    #[test]
    fn test_plmn_encoding() {
        let plmn = PlmnId::new([2, 0, 8], [9, 3, 0], 2).unwrap();
        let encoded = plmn.encode();
        assert_eq!(encoded, [0x02, 0xF8, 0x39]);
        assert_eq!(plmn.to_bcd(), 0x02F839);
    }

    #[test]
    fn test_plmn_parse() {
        let plmn = PlmnId::parse("00101").unwrap();
        assert_eq!(plmn.mcc, [0, 0, 1]);
        assert_eq!(plmn.mnc_len, 2);
        let plmn = PlmnId::parse("310260").unwrap();
        assert_eq!(plmn.mnc, [2, 6, 0]);
        assert_eq!(plmn.mnc_len, 3);
        assert!(PlmnId::parse("0010").is_none());
        assert!(PlmnId::parse("0a101").is_none());
    }

    #[test]
    fn test_bearer_id() {
        assert_eq!(RbId::Srb(1).bearer_id(), 0);
        assert_eq!(RbId::Drb(1).bearer_id(), 0);
        assert_eq!(RbId::Drb(5).bearer_id(), 4);
        assert!(RbId::Srb(2).is_srb());
        assert_eq!(RbId::Drb(3).to_string(), "DRB3");
    }

    #[test]
    fn test_scs_slots() {
        assert_eq!(SubcarrierSpacing::from_khz(30), Some(SubcarrierSpacing::Scs30));
        assert_eq!(SubcarrierSpacing::Scs30.slots_per_frame(), 20);
        assert!(SubcarrierSpacing::from_khz(25).is_none());
    }
}
