//! RAN slicing
//!
//! Per-cell inter-slice scheduling: each RAN slice carries an RRM policy
//! (min/max PRBs, priority) and the inter-slice scheduler ranks the slices
//! once per slot before the intra-slice UE scheduling runs.

mod inter_slice_scheduler;
mod ran_slice_instance;

pub use inter_slice_scheduler::{InterSliceScheduler, RanSliceCandidate};
pub use ran_slice_instance::{RanSliceInstance, RanSlicePolicy, SliceUeRepository};

use crate::LayerError;
use common::{Lcid, Pci, PlmnId, SNssai, SlotPoint, SubcarrierSpacing, UeIndex};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum configurable slice priority
pub const MAX_SLICE_PRIORITY: u32 = 255;

/// Number of future slots for which PUSCH grants are tracked
pub const NOF_PUSCH_SLOTS: usize = 64;

/// RAN slice identifier, unique within a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RanSliceId(pub u8);

impl RanSliceId {
    /// Slice that schedules SRB traffic
    pub const SRB: Self = Self(0);
    /// Slice that schedules DRBs without a matching RRM policy
    pub const DEFAULT_DRB: Self = Self(1);
}

impl fmt::Display for RanSliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// RRM policy member (O-RAN.WG3.E2SM-RC 8.4.3.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RrmPolicyMember {
    pub plmn: PlmnId,
    pub s_nssai: SNssai,
}

/// RRM policy of a configured slice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceRrmPolicyConfig {
    pub member: RrmPolicyMember,
    /// Minimum share of the cell PRBs, in percent
    #[serde(default)]
    pub min_prb_ratio: u32,
    /// Maximum share of the cell PRBs, in percent
    #[serde(default = "default_max_prb_ratio")]
    pub max_prb_ratio: u32,
    #[serde(default)]
    pub priority: u32,
}

fn default_max_prb_ratio() -> u32 {
    100
}

/// TDD UL/DL pattern. Slots between the DL and UL parts are guard slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TddPattern {
    pub period_slots: u32,
    pub nof_dl_slots: u32,
    pub nof_ul_slots: u32,
}

/// Cell parameters the inter-slice scheduler depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceCellConfig {
    pub pci: Pci,
    pub scs: SubcarrierSpacing,
    /// CRBs of the active BWP, assumed equal in DL and UL
    pub nof_crbs: u32,
    /// PUSCH k2 values of the time domain resource list
    pub k2_list: Vec<u32>,
    /// `None` for FDD
    pub tdd: Option<TddPattern>,
}

impl SliceCellConfig {
    pub fn is_dl_enabled(&self, slot: SlotPoint) -> bool {
        match &self.tdd {
            None => true,
            Some(tdd) => slot.to_uint() % tdd.period_slots < tdd.nof_dl_slots,
        }
    }

    pub fn is_ul_enabled(&self, slot: SlotPoint) -> bool {
        match &self.tdd {
            None => true,
            Some(tdd) => {
                slot.to_uint() % tdd.period_slots >= tdd.period_slots - tdd.nof_ul_slots
            }
        }
    }

    pub fn validate(&self) -> Result<(), LayerError> {
        if self.nof_crbs == 0 {
            return Err(LayerError::InvalidConfiguration(
                "cell must have at least one CRB".to_string(),
            ));
        }
        if self.k2_list.is_empty() {
            return Err(LayerError::InvalidConfiguration(
                "PUSCH k2 list is empty".to_string(),
            ));
        }
        if let Some(k2) = self.k2_list.iter().find(|k2| **k2 as usize >= NOF_PUSCH_SLOTS) {
            return Err(LayerError::InvalidConfiguration(format!(
                "PUSCH k2={} exceeds {}",
                k2,
                NOF_PUSCH_SLOTS - 1
            )));
        }
        if let Some(tdd) = &self.tdd {
            if tdd.period_slots == 0 || tdd.nof_dl_slots + tdd.nof_ul_slots > tdd.period_slots {
                return Err(LayerError::InvalidConfiguration(format!(
                    "invalid TDD pattern {:?}",
                    tdd
                )));
            }
        }
        Ok(())
    }
}

/// Logical channel of a UE as seen by the slice scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceLcConfig {
    pub lcid: Lcid,
    pub lc_group: u8,
    /// RRM policy the DRB is mapped to
    pub rrm_policy: Option<RrmPolicyMember>,
}

/// UE configuration as seen by the slice scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceUeConfig {
    pub ue_index: UeIndex,
    pub logical_channels: Vec<SliceLcConfig>,
    /// False until the dedicated configuration is complete
    pub cfg_complete: bool,
    pub in_fallback: bool,
}

/// Externally visible allocation of a configured slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceAllocation {
    pub pci: Pci,
    /// BCD encoded PLMN
    pub plmn: u32,
    pub s_nssai: SNssai,
    pub min_prb_ratio: u32,
    pub max_prb_ratio: u32,
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SliceAllocationError {
    #[error("number of slices changed from {expected} to {actual}")]
    SliceCountChanged { expected: usize, actual: usize },

    #[error("PCI changed for slice index {0}")]
    PciChanged(usize),

    #[error("PLMN changed for slice index {0}")]
    PlmnChanged(usize),

    #[error("S-NSSAI changed for slice index {0}")]
    NssaiChanged(usize),

    #[error("min_prb_ratio {value} of slice index {index} not in [0, 100]")]
    MinPrbRatio { index: usize, value: u32 },

    #[error("max_prb_ratio {value} of slice index {index} not in [1, 100]")]
    MaxPrbRatio { index: usize, value: u32 },

    #[error("priority {value} of slice index {index} not in [0, 254]")]
    Priority { index: usize, value: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(tdd: Option<TddPattern>) -> SliceCellConfig {
        SliceCellConfig {
            pci: Pci(1),
            scs: SubcarrierSpacing::Scs30,
            nof_crbs: 51,
            k2_list: vec![4],
            tdd,
        }
    }

    #[test]
    fn test_tdd_pattern() {
        // DDDSU
        let cfg = cell(Some(TddPattern {
            period_slots: 5,
            nof_dl_slots: 3,
            nof_ul_slots: 1,
        }));
        let enabled: Vec<(bool, bool)> = (0..5)
            .map(|i| {
                let slot = SlotPoint::new(SubcarrierSpacing::Scs30, 0, i);
                (cfg.is_dl_enabled(slot), cfg.is_ul_enabled(slot))
            })
            .collect();
        assert_eq!(
            enabled,
            vec![(true, false), (true, false), (true, false), (false, false), (false, true)]
        );
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_cell_validation() {
        let mut cfg = cell(None);
        cfg.k2_list = vec![64];
        assert!(cfg.validate().is_err());
        let cfg = cell(Some(TddPattern {
            period_slots: 4,
            nof_dl_slots: 3,
            nof_ul_slots: 2,
        }));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_policy_from_yaml() {
        let yaml = r#"
member:
  plmn: { mcc: [0, 0, 1], mnc: [0, 1, 0], mnc_len: 2 }
  s_nssai: { sst: 1, sd: 162 }
min_prb_ratio: 20
"#;
        let policy: SliceRrmPolicyConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.min_prb_ratio, 20);
        assert_eq!(policy.max_prb_ratio, 100);
        assert_eq!(policy.member.s_nssai.sd, Some(162));
    }
}
