//! Inter-slice scheduler invariants under random policies and grants

use common::{Lcid, Pci, PlmnId, SNssai, SlotPoint, SubcarrierSpacing, UeIndex};
use layers::mac::slicing::{
    InterSliceScheduler, RrmPolicyMember, SliceCellConfig, SliceLcConfig, SliceRrmPolicyConfig,
    SliceUeConfig,
};
use proptest::prelude::*;

const NOF_CRBS: u32 = 100;

fn cell() -> SliceCellConfig {
    SliceCellConfig {
        pci: Pci(1),
        scs: SubcarrierSpacing::Scs30,
        nof_crbs: NOF_CRBS,
        k2_list: vec![2, 4],
        tdd: None,
    }
}

fn member(i: usize) -> RrmPolicyMember {
    RrmPolicyMember {
        plmn: PlmnId::parse("00101").unwrap(),
        s_nssai: SNssai {
            sst: 1,
            sd: Some(i as u32),
        },
    }
}

/// (min_prb_ratio, max_prb_ratio, priority)
fn policy() -> impl Strategy<Value = (u32, u32, u32)> {
    (0u32..=50, 1u32..=100, 0u32..=254).prop_map(|(min, max, prio)| (min, max.max(min).max(1), prio))
}

/// One slice per policy, each serving one UE
fn scheduler(policies: &[(u32, u32, u32)]) -> InterSliceScheduler {
    let rrm: Vec<SliceRrmPolicyConfig> = policies
        .iter()
        .enumerate()
        .map(|(i, (min, max, prio))| SliceRrmPolicyConfig {
            member: member(i),
            min_prb_ratio: *min,
            max_prb_ratio: *max,
            priority: *prio,
        })
        .collect();
    let mut sched = InterSliceScheduler::new(cell(), &rrm).unwrap();
    for i in 0..policies.len() {
        sched.add_ue(&SliceUeConfig {
            ue_index: UeIndex(i as u32),
            logical_channels: vec![SliceLcConfig {
                lcid: Lcid(4),
                lc_group: 1,
                rrm_policy: Some(member(i)),
            }],
            cfg_complete: true,
            in_fallback: false,
        });
    }
    sched
}

/// Grant size within `[1, room]` picked by `fraction`
fn grant(fraction: f64, room: u32) -> u32 {
    1 + ((room - 1) as f64 * fraction) as u32
}

#[test]
fn prop_dl_candidates_respect_slice_bounds() {
    proptest!(|(
        policies in proptest::collection::vec(policy(), 1..5),
        fractions in proptest::collection::vec(0.0f64..1.0, 64),
    )| {
        let mut sched = scheduler(&policies);
        let mut slot = SlotPoint::new(SubcarrierSpacing::Scs30, 0, 0);
        let mut draws = fractions.iter().cycle();
        for _ in 0..10 {
            sched.slot_indication(slot);
            let mut first = true;
            while let Some(cand) = sched.get_next_dl_candidate() {
                prop_assert_eq!(cand.slot, slot);
                let slice = sched.slice(cand.id).unwrap();
                let policy = slice.policy.clone();
                let rb_count = slice.pdsch_rb_count();

                if first && policies.iter().any(|(min, _, _)| *min > 0) {
                    // a slice below its minimum is always served first
                    prop_assert!(policy.min_prb > 0, "first candidate {:?} has no minimum", cand);
                }
                first = false;

                prop_assert!(rb_count < cand.max_rbs, "{:?} already has {} RBs", cand, rb_count);
                prop_assert!(
                    cand.max_rbs == policy.min_prb || cand.max_rbs == policy.max_prb,
                    "{:?} limit is neither min_prb nor max_prb of {:?}",
                    cand,
                    policy
                );

                let rbs = grant(*draws.next().unwrap(), cand.max_rbs - rb_count);
                sched.slice_mut(cand.id).unwrap().store_pdsch_grant(rbs, cand.slot);
                prop_assert!(sched.slice(cand.id).unwrap().pdsch_rb_count() <= policy.max_prb);
            }
            slot += 1;
        }
    });
}

#[test]
fn prop_ul_candidates_respect_slice_bounds() {
    proptest!(|(
        policies in proptest::collection::vec(policy(), 1..5),
        fractions in proptest::collection::vec(0.0f64..1.0, 64),
    )| {
        let mut sched = scheduler(&policies);
        let mut slot = SlotPoint::new(SubcarrierSpacing::Scs30, 0, 0);
        let mut draws = fractions.iter().cycle();
        for _ in 0..10 {
            sched.slot_indication(slot);
            while let Some(cand) = sched.get_next_ul_candidate() {
                let k2 = cand.slot - slot;
                prop_assert!(k2 == 2 || k2 == 4, "unexpected PUSCH slot {:?}", cand);
                let slice = sched.slice(cand.id).unwrap();
                let max_prb = slice.policy.max_prb;
                let rb_count = slice.nof_pusch_rbs_allocated(cand.slot);
                prop_assert!(rb_count < cand.max_rbs);
                prop_assert!(cand.max_rbs <= max_prb);

                let rbs = grant(*draws.next().unwrap(), cand.max_rbs - rb_count);
                sched.slice_mut(cand.id).unwrap().store_pusch_grant(rbs, cand.slot);
                prop_assert!(sched.slice(cand.id).unwrap().nof_pusch_rbs_allocated(cand.slot) <= max_prb);
            }
            slot += 1;
        }
    });
}

#[test]
fn prop_slices_at_max_are_never_offered() {
    proptest!(|(policies in proptest::collection::vec(policy(), 2..5))| {
        let mut sched = scheduler(&policies);
        let slot = SlotPoint::new(SubcarrierSpacing::Scs30, 0, 0);
        sched.slot_indication(slot);

        // fill every slice to its maximum as soon as it is offered
        let mut served = Vec::new();
        while let Some(cand) = sched.get_next_dl_candidate() {
            prop_assert!(!served.contains(&cand.id) || cand.max_rbs > sched.slice(cand.id).unwrap().pdsch_rb_count());
            let slice = sched.slice_mut(cand.id).unwrap();
            let room = slice.policy.max_prb - slice.pdsch_rb_count();
            slice.store_pdsch_grant(room, cand.slot);
            served.push(cand.id);
        }
        for id in served {
            let slice = sched.slice(id).unwrap();
            prop_assert_eq!(slice.pdsch_rb_count(), slice.policy.max_prb);
        }
    });
}
