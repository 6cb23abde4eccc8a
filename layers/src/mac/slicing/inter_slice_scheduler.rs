//! Inter-slice scheduler
//!
//! Once per slot the scheduler builds a priority queue of DL candidates and
//! one of UL candidates (one per PUSCH k2). The intra-slice schedulers then
//! pop candidates in priority order and record their grants in the slices.

use super::ran_slice_instance::{RanSliceInstance, RanSlicePolicy};
use super::{
    RanSliceId, SliceAllocation, SliceAllocationError, SliceCellConfig, SliceLcConfig,
    SliceRrmPolicyConfig, SliceUeConfig, MAX_SLICE_PRIORITY,
};
use crate::LayerError;
use common::{SlotPoint, UeIndex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::{debug, error, info, warn};

type PriorityType = u32;

/// Candidates with this priority are never scheduled
const SKIP_PRIO: PriorityType = 0;

const SLICE_DIST_BITSIZE: u32 = 7;
const SLICE_DIST_BITMASK: u32 = (1 << SLICE_DIST_BITSIZE) - 1;
const SLICE_MINRB_PRIO_BITSIZE: u32 = 1;
const SLICE_PRIO_BITSIZE: u32 = 8;
const SLICE_PRIO_BITMASK: u32 = (1 << SLICE_PRIO_BITSIZE) - 1;
const DELAY_PRIO_BITSIZE: u32 = 8;
const DELAY_PRIO_BITMASK: u32 = (1 << DELAY_PRIO_BITSIZE) - 1;
const RR_BITSIZE: u32 = 7;
const RR_BITMASK: u32 = (1 << RR_BITSIZE) - 1;

/// Slice selected for scheduling in a PDSCH or PUSCH slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RanSliceCandidate {
    pub id: RanSliceId,
    pub slot: SlotPoint,
    /// RB count the slice may reach in `slot`
    pub max_rbs: u32,
}

/// Half-open RB interval `[start, stop)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RbLimits {
    start: u32,
    stop: u32,
}

impl RbLimits {
    fn contains(&self, rbs: u32) -> bool {
        self.start <= rbs && rbs < self.stop
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SliceCandidateContext {
    id: RanSliceId,
    prio: PriorityType,
    rb_lims: RbLimits,
    slot: SlotPoint,
}

impl Ord for SliceCandidateContext {
    /// Higher priority first, then lower slice id, then earlier slot
    fn cmp(&self, other: &Self) -> Ordering {
        self.prio
            .cmp(&other.prio)
            .then_with(|| other.id.cmp(&self.id))
            .then_with(|| (other.slot - self.slot).cmp(&0))
    }
}

impl PartialOrd for SliceCandidateContext {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Dl,
    Ul,
}

pub struct InterSliceScheduler {
    cell: SliceCellConfig,
    slices: Vec<RanSliceInstance>,
    current_slot: Option<SlotPoint>,
    dl_prio_queue: BinaryHeap<SliceCandidateContext>,
    ul_prio_queue: BinaryHeap<SliceCandidateContext>,
}

impl InterSliceScheduler {
    /// Create the default SRB and DRB slices followed by one slice per RRM policy
    pub fn new(cell: SliceCellConfig, policies: &[SliceRrmPolicyConfig]) -> Result<Self, LayerError> {
        cell.validate()?;
        if policies.len() + 2 > usize::from(u8::MAX) {
            return Err(LayerError::InvalidConfiguration(format!(
                "too many RRM policies: {}",
                policies.len()
            )));
        }
        let nof_crbs = cell.nof_crbs;
        let mut slices = Vec::with_capacity(policies.len() + 2);
        // the SRB slice asks for the whole carrier with top priority
        slices.push(RanSliceInstance::new(
            RanSliceId::SRB,
            RanSlicePolicy::from_ratios(None, 100, 100, MAX_SLICE_PRIORITY, nof_crbs),
        ));
        slices.push(RanSliceInstance::new(
            RanSliceId::DEFAULT_DRB,
            RanSlicePolicy::from_ratios(None, 0, 100, 0, nof_crbs),
        ));
        for (i, rrm) in policies.iter().enumerate() {
            if rrm.min_prb_ratio > 100 || rrm.max_prb_ratio == 0 || rrm.max_prb_ratio > 100 {
                return Err(LayerError::InvalidConfiguration(format!(
                    "invalid PRB ratios of RRM policy {}: min={} max={}",
                    i, rrm.min_prb_ratio, rrm.max_prb_ratio
                )));
            }
            let id = RanSliceId(i as u8 + 2);
            let policy = RanSlicePolicy::from_ratios(
                Some(rrm.member),
                rrm.min_prb_ratio,
                rrm.max_prb_ratio,
                rrm.priority,
                nof_crbs,
            );
            info!(
                "pci={} slice={}: sst={} sd={:?} min_prb={} max_prb={} priority={}",
                cell.pci.0,
                id,
                rrm.member.s_nssai.sst,
                rrm.member.s_nssai.sd,
                policy.min_prb,
                policy.max_prb,
                policy.priority
            );
            slices.push(RanSliceInstance::new(id, policy));
        }

        Ok(Self {
            dl_prio_queue: BinaryHeap::with_capacity(slices.len()),
            ul_prio_queue: BinaryHeap::with_capacity(slices.len() * cell.k2_list.len()),
            cell,
            slices,
            current_slot: None,
        })
    }

    pub fn nof_slices(&self) -> usize {
        self.slices.len()
    }

    pub fn slice(&self, id: RanSliceId) -> Option<&RanSliceInstance> {
        self.slices.get(usize::from(id.0))
    }

    /// Used by the intra-slice schedulers to record grants
    pub fn slice_mut(&mut self, id: RanSliceId) -> Option<&mut RanSliceInstance> {
        self.slices.get_mut(usize::from(id.0))
    }

    /// Advance to `slot_tx` and recompute the candidate queues
    pub fn slot_indication(&mut self, slot_tx: SlotPoint) {
        let mut current = self.current_slot.unwrap_or(slot_tx - 1);
        while current != slot_tx {
            current += 1;
            for slice in &mut self.slices {
                slice.slot_indication(current);
            }
        }
        self.current_slot = Some(slot_tx);

        self.dl_prio_queue.clear();
        self.ul_prio_queue.clear();

        if !self.cell.is_dl_enabled(slot_tx) {
            // no PDCCH, hence no PDSCH nor PUSCH grants
            return;
        }

        for slice in &self.slices {
            let policy = &slice.policy;
            let pdsch_rbs = slice.pdsch_rb_count();
            if pdsch_rbs < policy.max_prb {
                let stop = Self::first_candidate_stop(policy, pdsch_rbs);
                let prio = Self::get_prio(slice, Direction::Dl, slot_tx, slot_tx, false);
                if prio != SKIP_PRIO {
                    self.dl_prio_queue.push(SliceCandidateContext {
                        id: slice.id,
                        prio,
                        rb_lims: RbLimits {
                            start: pdsch_rbs,
                            stop,
                        },
                        slot: slot_tx,
                    });
                }
            }

            for &k2 in &self.cell.k2_list {
                let pusch_slot = slot_tx + k2;
                if !self.cell.is_ul_enabled(pusch_slot) {
                    continue;
                }
                let pusch_rbs = slice.nof_pusch_rbs_allocated(pusch_slot);
                if pusch_rbs >= policy.max_prb {
                    continue;
                }
                let cell_pusch_rbs: u32 = self
                    .slices
                    .iter()
                    .map(|s| s.nof_pusch_rbs_allocated(pusch_slot))
                    .sum();
                if cell_pusch_rbs >= self.cell.nof_crbs {
                    // no CRBs left in the PUSCH slot
                    continue;
                }
                let prio = Self::get_prio(slice, Direction::Ul, slot_tx, pusch_slot, false);
                if prio != SKIP_PRIO {
                    self.ul_prio_queue.push(SliceCandidateContext {
                        id: slice.id,
                        prio,
                        rb_lims: RbLimits {
                            start: pusch_rbs,
                            stop: Self::first_candidate_stop(policy, pusch_rbs),
                        },
                        slot: pusch_slot,
                    });
                }
            }
        }
        debug!(
            "pci={} slot={}: slice candidates dl={} ul={}",
            self.cell.pci.0,
            slot_tx,
            self.dl_prio_queue.len(),
            self.ul_prio_queue.len()
        );
    }

    /// Slices that have not reached min_prb are first offered only up to it
    fn first_candidate_stop(policy: &RanSlicePolicy, rb_count: u32) -> u32 {
        if rb_count <= policy.min_prb && policy.min_prb > 0 {
            policy.min_prb
        } else {
            policy.max_prb
        }
    }

    pub fn get_next_dl_candidate(&mut self) -> Option<RanSliceCandidate> {
        self.get_next_candidate(Direction::Dl)
    }

    pub fn get_next_ul_candidate(&mut self) -> Option<RanSliceCandidate> {
        self.get_next_candidate(Direction::Ul)
    }

    fn get_next_candidate(&mut self, dir: Direction) -> Option<RanSliceCandidate> {
        let pdcch_slot = self.current_slot?;
        let queue = match dir {
            Direction::Dl => &mut self.dl_prio_queue,
            Direction::Ul => &mut self.ul_prio_queue,
        };
        while let Some(top) = queue.pop() {
            let slice = &self.slices[usize::from(top.id.0)];
            let rb_count = match dir {
                Direction::Dl => slice.pdsch_rb_count(),
                Direction::Ul => slice.nof_pusch_rbs_allocated(top.slot),
            };
            if !top.rb_lims.contains(rb_count) {
                // the slice was already served beyond this candidate's bounds
                continue;
            }

            let policy = &slice.policy;
            if policy.min_prb > 0
                && policy.min_prb != policy.max_prb
                && top.rb_lims.stop >= policy.min_prb
                && top.rb_lims.stop != policy.max_prb
            {
                // offer the remainder up to max_prb once the other slices had their turn
                let prio = Self::get_prio(slice, dir, pdcch_slot, top.slot, true);
                if prio != SKIP_PRIO {
                    let start = if rb_count > 0 { rb_count } else { policy.min_prb };
                    queue.push(SliceCandidateContext {
                        id: top.id,
                        prio,
                        rb_lims: RbLimits {
                            start,
                            stop: policy.max_prb,
                        },
                        slot: top.slot,
                    });
                    if let Some(next) = queue.peek().copied() {
                        if next.id == top.id && next.slot == top.slot {
                            queue.pop();
                            return Some(RanSliceCandidate {
                                id: top.id,
                                slot: top.slot,
                                max_rbs: top.rb_lims.stop.max(next.rb_lims.stop),
                            });
                        }
                    }
                }
            }

            return Some(RanSliceCandidate {
                id: top.id,
                slot: top.slot,
                max_rbs: top.rb_lims.stop,
            });
        }
        None
    }

    /// Candidate priority, most significant field first: slot distance,
    /// below-min-PRB boost, slice priority, slots since last grant, round robin
    /// on the average RBs per slot, and a set bit to tell it apart from
    /// [`SKIP_PRIO`].
    fn get_prio(
        slice: &RanSliceInstance,
        dir: Direction,
        pdcch_slot: SlotPoint,
        pxsch_slot: SlotPoint,
        resched: bool,
    ) -> PriorityType {
        let policy = &slice.policy;
        let rb_count = match dir {
            Direction::Dl => slice.pdsch_rb_count(),
            Direction::Ul => slice.nof_pusch_rbs_allocated(pxsch_slot),
        };
        if !slice.active() || rb_count >= policy.max_prb {
            return SKIP_PRIO;
        }

        let slot_dist = (pxsch_slot - pdcch_slot).max(0) as u32;
        let mut prio = SLICE_DIST_BITMASK - slot_dist.min(SLICE_DIST_BITMASK);

        let minrb_prio = u32::from(!resched && policy.min_prb > 0 && rb_count < policy.min_prb);
        prio = (prio << SLICE_MINRB_PRIO_BITSIZE) + minrb_prio;

        prio = (prio << SLICE_PRIO_BITSIZE) + policy.priority.min(SLICE_PRIO_BITMASK);

        let delay = match dir {
            Direction::Dl => slice.nof_slots_since_last_pdsch(pxsch_slot),
            Direction::Ul => slice.nof_slots_since_last_pusch(pxsch_slot),
        };
        prio = (prio << DELAY_PRIO_BITSIZE) + delay.min(DELAY_PRIO_BITMASK);

        let rbs_per_slot = match dir {
            Direction::Dl => slice.average_pdsch_rbs_per_slot(),
            Direction::Ul => slice.average_pusch_rbs_per_slot(),
        };
        let rr_prio = RR_BITMASK - (rbs_per_slot.round() as u32).min(RR_BITMASK);
        prio = (prio << RR_BITSIZE) + rr_prio;

        (prio << 1) + 1
    }

    pub fn add_ue(&mut self, ue: &SliceUeConfig) {
        if !self.can_add_ue(ue) {
            return;
        }
        self.add_impl(ue);
    }

    /// A reconfigured UE stays in fallback until [`config_applied`](Self::config_applied)
    pub fn reconf_ue(&mut self, ue_index: UeIndex) {
        self.rem_ue(ue_index);
    }

    pub fn rem_ue(&mut self, ue_index: UeIndex) {
        // slices may hold logical channels of an older configuration
        for slice in &mut self.slices {
            slice.ues_mut().rem_ue(ue_index);
        }
    }

    pub fn config_applied(&mut self, ue: &SliceUeConfig) {
        if !self.can_add_ue(ue) {
            error!(
                "ue={}: Config applied to a UE that is inactive or in fallback",
                ue.ue_index
            );
            return;
        }
        self.add_impl(ue);
    }

    fn can_add_ue(&self, ue: &SliceUeConfig) -> bool {
        if !ue.cfg_complete {
            debug!(
                "ue={}: Not adding UE to slice scheduler. Cause: incomplete configuration",
                ue.ue_index
            );
            return false;
        }
        if ue.in_fallback {
            debug!(
                "ue={}: Not adding UE to slice scheduler. Cause: UE in fallback",
                ue.ue_index
            );
            return false;
        }
        true
    }

    fn add_impl(&mut self, ue: &SliceUeConfig) {
        for lc in &ue.logical_channels {
            let idx = usize::from(self.slice_for_lc(lc).0);
            let slice = &mut self.slices[idx];
            if !slice.ues().contains(ue.ue_index) {
                debug!("ue={}: Added to slice={}", ue.ue_index, slice.id);
            }
            slice
                .ues_mut()
                .add_logical_channel(ue.ue_index, lc.lcid, lc.lc_group);
        }
    }

    /// SRBs go to the SRB slice, DRBs to the slice of their RRM policy
    fn slice_for_lc(&self, lc: &SliceLcConfig) -> RanSliceId {
        if lc.lcid.is_srb() {
            return RanSliceId::SRB;
        }
        lc.rrm_policy
            .and_then(|member| {
                self.slices
                    .iter()
                    .find(|s| s.policy.member == Some(member))
                    .map(|s| s.id)
            })
            .unwrap_or(RanSliceId::DEFAULT_DRB)
    }

    /// Current allocation of the configured slices. The default slices are not listed.
    pub fn slice_allocation(&self) -> Vec<SliceAllocation> {
        self.slices
            .iter()
            .filter_map(|s| {
                let member = s.policy.member?;
                Some(SliceAllocation {
                    pci: self.cell.pci,
                    plmn: member.plmn.to_bcd(),
                    s_nssai: member.s_nssai,
                    min_prb_ratio: s.policy.min_prb_ratio,
                    max_prb_ratio: s.policy.max_prb_ratio,
                    priority: s.policy.priority,
                })
            })
            .collect()
    }

    fn validate_slice_allocation(
        &self,
        candidate: &[SliceAllocation],
    ) -> Result<(), SliceAllocationError> {
        let current = self.slice_allocation();
        if candidate.len() != current.len() {
            return Err(SliceAllocationError::SliceCountChanged {
                expected: current.len(),
                actual: candidate.len(),
            });
        }
        for (index, (cand, cur)) in candidate.iter().zip(&current).enumerate() {
            if cand.pci != cur.pci {
                return Err(SliceAllocationError::PciChanged(index));
            }
            if cand.plmn != cur.plmn {
                return Err(SliceAllocationError::PlmnChanged(index));
            }
            if cand.s_nssai != cur.s_nssai {
                return Err(SliceAllocationError::NssaiChanged(index));
            }
            if cand.min_prb_ratio > 100 {
                return Err(SliceAllocationError::MinPrbRatio {
                    index,
                    value: cand.min_prb_ratio,
                });
            }
            if !(1..=100).contains(&cand.max_prb_ratio) {
                return Err(SliceAllocationError::MaxPrbRatio {
                    index,
                    value: cand.max_prb_ratio,
                });
            }
            if cand.priority > 254 {
                return Err(SliceAllocationError::Priority {
                    index,
                    value: cand.priority,
                });
            }
        }
        Ok(())
    }

    /// Replace the ratios and priorities of the configured slices. On error
    /// the current allocation is kept.
    pub fn apply_slice_allocation(
        &mut self,
        candidate: &[SliceAllocation],
    ) -> Result<(), SliceAllocationError> {
        if let Err(e) = self.validate_slice_allocation(candidate) {
            warn!("pci={}: Invalid slice allocation attempted: {}", self.cell.pci.0, e);
            return Err(e);
        }
        let nof_crbs = self.cell.nof_crbs;
        let configured = self.slices.iter_mut().filter(|s| s.policy.member.is_some());
        for (slice, alloc) in configured.zip(candidate) {
            slice.policy.min_prb_ratio = alloc.min_prb_ratio;
            slice.policy.max_prb_ratio = alloc.max_prb_ratio;
            slice.policy.priority = alloc.priority;
            slice.policy.update_prbs(nof_crbs);
            info!(
                "pci={} slice={}: Allocation updated. min_prb={} max_prb={} priority={}",
                self.cell.pci.0,
                slice.id,
                slice.policy.min_prb,
                slice.policy.max_prb,
                slice.policy.priority
            );
        }
        Ok(())
    }
}
