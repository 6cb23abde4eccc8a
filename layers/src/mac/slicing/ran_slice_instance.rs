//! RAN slice instance: RRM policy, member UEs and per-slot RB accounting

use super::{RanSliceId, RrmPolicyMember, MAX_SLICE_PRIORITY, NOF_PUSCH_SLOTS};
use common::{Lcid, SlotPoint, UeIndex};
use std::collections::BTreeMap;
use tracing::trace;

/// Weight of the newest sample in the average RBs per slot
const AVG_RBS_ALPHA: f32 = 0.1;

/// Effective RRM policy of a slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RanSlicePolicy {
    /// `None` for the default SRB and DRB slices
    pub member: Option<RrmPolicyMember>,
    pub min_prb_ratio: u32,
    pub max_prb_ratio: u32,
    pub min_prb: u32,
    pub max_prb: u32,
    pub priority: u32,
}

impl RanSlicePolicy {
    pub fn from_ratios(
        member: Option<RrmPolicyMember>,
        min_prb_ratio: u32,
        max_prb_ratio: u32,
        priority: u32,
        nof_cell_crbs: u32,
    ) -> Self {
        let mut policy = Self {
            member,
            min_prb_ratio,
            max_prb_ratio,
            min_prb: 0,
            max_prb: 0,
            priority: priority.min(MAX_SLICE_PRIORITY),
        };
        policy.update_prbs(nof_cell_crbs);
        policy
    }

    /// Recompute the PRB bounds from the ratios
    pub fn update_prbs(&mut self, nof_cell_crbs: u32) {
        self.min_prb = (nof_cell_crbs * self.min_prb_ratio / 100).min(nof_cell_crbs);
        self.max_prb = (nof_cell_crbs * self.max_prb_ratio / 100).min(nof_cell_crbs);
    }
}

/// Logical channels of the UEs that belong to a slice
#[derive(Debug, Default, Clone)]
pub struct SliceUeRepository {
    ues: BTreeMap<UeIndex, BTreeMap<Lcid, u8>>,
}

impl SliceUeRepository {
    pub fn add_logical_channel(&mut self, ue_index: UeIndex, lcid: Lcid, lc_group: u8) {
        self.ues.entry(ue_index).or_default().insert(lcid, lc_group);
    }

    pub fn rem_logical_channel(&mut self, ue_index: UeIndex, lcid: Lcid) {
        if let Some(lcs) = self.ues.get_mut(&ue_index) {
            lcs.remove(&lcid);
            if lcs.is_empty() {
                self.ues.remove(&ue_index);
            }
        }
    }

    pub fn rem_ue(&mut self, ue_index: UeIndex) {
        self.ues.remove(&ue_index);
    }

    pub fn contains(&self, ue_index: UeIndex) -> bool {
        self.ues.contains_key(&ue_index)
    }

    pub fn logical_channels(&self, ue_index: UeIndex) -> impl Iterator<Item = (Lcid, u8)> + '_ {
        self.ues
            .get(&ue_index)
            .into_iter()
            .flat_map(|lcs| lcs.iter().map(|(lcid, lcg)| (*lcid, *lcg)))
    }

    pub fn len(&self) -> usize {
        self.ues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ues.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RanSliceInstance {
    pub id: RanSliceId,
    pub policy: RanSlicePolicy,
    ues: SliceUeRepository,

    /// PDSCH RBs granted in the current slot
    pdsch_rb_count: u32,
    /// PUSCH RBs granted, indexed by PUSCH slot
    pusch_rb_count_per_slot: Vec<u32>,
    last_pdsch_slot: Option<SlotPoint>,
    last_pusch_slot: Option<SlotPoint>,
    avg_pdsch_rbs: f32,
    avg_pusch_rbs: f32,
}

impl RanSliceInstance {
    pub fn new(id: RanSliceId, policy: RanSlicePolicy) -> Self {
        Self {
            id,
            policy,
            ues: SliceUeRepository::default(),
            pdsch_rb_count: 0,
            pusch_rb_count_per_slot: vec![0; NOF_PUSCH_SLOTS],
            last_pdsch_slot: None,
            last_pusch_slot: None,
            avg_pdsch_rbs: 0.0,
            avg_pusch_rbs: 0.0,
        }
    }

    fn pusch_index(slot: SlotPoint) -> usize {
        slot.to_uint() as usize % NOF_PUSCH_SLOTS
    }

    /// Close the previous slot and open `slot_tx`
    pub fn slot_indication(&mut self, slot_tx: SlotPoint) {
        self.avg_pdsch_rbs += AVG_RBS_ALPHA * (self.pdsch_rb_count as f32 - self.avg_pdsch_rbs);
        self.pdsch_rb_count = 0;

        let prev = Self::pusch_index(slot_tx - 1);
        let pusch_rbs = std::mem::take(&mut self.pusch_rb_count_per_slot[prev]);
        self.avg_pusch_rbs += AVG_RBS_ALPHA * (pusch_rbs as f32 - self.avg_pusch_rbs);
        trace!(
            "slice={} slot={}: avg_pdsch_rbs={:.2} avg_pusch_rbs={:.2}",
            self.id,
            slot_tx,
            self.avg_pdsch_rbs,
            self.avg_pusch_rbs
        );
    }

    /// A slice without UEs is never scheduled
    pub fn active(&self) -> bool {
        !self.ues.is_empty()
    }

    pub fn ues(&self) -> &SliceUeRepository {
        &self.ues
    }

    pub fn ues_mut(&mut self) -> &mut SliceUeRepository {
        &mut self.ues
    }

    pub fn store_pdsch_grant(&mut self, crbs: u32, pdsch_slot: SlotPoint) {
        self.pdsch_rb_count += crbs;
        self.last_pdsch_slot = Some(pdsch_slot);
    }

    pub fn store_pusch_grant(&mut self, crbs: u32, pusch_slot: SlotPoint) {
        self.pusch_rb_count_per_slot[Self::pusch_index(pusch_slot)] += crbs;
        self.last_pusch_slot = Some(pusch_slot);
    }

    pub fn pdsch_rb_count(&self) -> u32 {
        self.pdsch_rb_count
    }

    pub fn nof_pusch_rbs_allocated(&self, pusch_slot: SlotPoint) -> u32 {
        self.pusch_rb_count_per_slot[Self::pusch_index(pusch_slot)]
    }

    /// Slots elapsed since the last PDSCH grant, `u32::MAX` if never scheduled
    pub fn nof_slots_since_last_pdsch(&self, pdsch_slot: SlotPoint) -> u32 {
        Self::slots_since(self.last_pdsch_slot, pdsch_slot)
    }

    pub fn nof_slots_since_last_pusch(&self, pusch_slot: SlotPoint) -> u32 {
        Self::slots_since(self.last_pusch_slot, pusch_slot)
    }

    fn slots_since(last: Option<SlotPoint>, slot: SlotPoint) -> u32 {
        last.map_or(u32::MAX, |last| (slot - last).max(0) as u32)
    }

    pub fn average_pdsch_rbs_per_slot(&self) -> f32 {
        self.avg_pdsch_rbs
    }

    pub fn average_pusch_rbs_per_slot(&self) -> f32 {
        self.avg_pusch_rbs
    }
}
