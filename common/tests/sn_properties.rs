//! Property tests for COUNT arithmetic and the SDU window

use common::sdu_window::SduWindow;
use common::sn::{count_of, estimate_count, hfn_of, sn_of, window_size};
use proptest::prelude::*;

fn sn_bits() -> impl Strategy<Value = u32> {
    prop_oneof![Just(12u32), Just(18u32)]
}

#[test]
fn prop_count_round_trip_within_window() {
    proptest!(|(bits in sn_bits(), hfn in 1u32..1000, ref_sn in 0u32..(1 << 12), offset in 0u32..2048)| {
        let reference = count_of(hfn, ref_sn, bits);
        // Any COUNT inside [reference, reference + window) must be recovered from its SN
        let offset = offset % window_size(bits);
        let count = reference + offset;
        let estimated = estimate_count(reference, sn_of(count, bits), bits);
        prop_assert_eq!(estimated, count);
        prop_assert_eq!(sn_of(estimated, bits), sn_of(count, bits));
    });
}

#[test]
fn prop_estimate_stays_within_one_hfn() {
    proptest!(|(bits in sn_bits(), reference in (1u32 << 18)..u32::MAX / 2, sn in 0u32..(1 << 12))| {
        let estimated = estimate_count(reference, sn, bits);
        let hfn_ref = hfn_of(reference, bits);
        let hfn_est = hfn_of(estimated, bits);
        prop_assert!(hfn_est + 1 >= hfn_ref && hfn_est <= hfn_ref + 1);
        prop_assert_eq!(sn_of(estimated, bits), sn);
    });
}

#[test]
fn prop_window_tracks_inserted_keys() {
    proptest!(|(keys in proptest::collection::vec(0u32..64, 0..32))| {
        let mut window: SduWindow<u32> = SduWindow::new(16);
        let mut model = std::collections::HashMap::new();
        for k in keys {
            window.insert(k, k * 10);
            model.retain(|old: &u32, _| old % 16 != k % 16);
            model.insert(k, k * 10);
        }
        prop_assert_eq!(window.len(), model.len());
        for (k, v) in &model {
            prop_assert_eq!(window.get(*k), Some(v));
        }
    });
}
