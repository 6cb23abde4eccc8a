//! Sequence number and COUNT arithmetic
//!
//! COUNT is the concatenation of the hyper frame number (HFN) and the
//! sequence number (SN) as defined in 3GPP TS 38.323 clause 7.1.

/// Number of distinct SN values for a field of `sn_bits` bits
pub const fn cardinality(sn_bits: u32) -> u32 {
    1 << sn_bits
}

/// Reordering window size, half of the SN space
pub const fn window_size(sn_bits: u32) -> u32 {
    1 << (sn_bits - 1)
}

/// SN part of a COUNT
pub const fn sn_of(count: u32, sn_bits: u32) -> u32 {
    count & (cardinality(sn_bits) - 1)
}

/// HFN part of a COUNT
pub const fn hfn_of(count: u32, sn_bits: u32) -> u32 {
    count >> sn_bits
}

/// Assemble a COUNT from HFN and SN
pub const fn count_of(hfn: u32, sn: u32, sn_bits: u32) -> u32 {
    hfn.wrapping_shl(sn_bits) | sn_of(sn, sn_bits)
}

/// Estimate the COUNT of a received or notified `sn` relative to `reference`.
///
/// `reference` is the lower edge of the window (RX_DELIV on reception, the
/// oldest unconfirmed COUNT on transmission).
pub fn estimate_count(reference: u32, sn: u32, sn_bits: u32) -> u32 {
    let window = i64::from(window_size(sn_bits));
    let ref_sn = i64::from(sn_of(reference, sn_bits));
    let ref_hfn = hfn_of(reference, sn_bits);
    let rcvd = i64::from(sn);

    let hfn = if rcvd < ref_sn - window {
        ref_hfn.wrapping_add(1)
    } else if rcvd >= ref_sn + window {
        ref_hfn.wrapping_sub(1)
    } else {
        ref_hfn
    };
    count_of(hfn, sn, sn_bits)
}

/// True when [`estimate_count`] would decrement an HFN of zero
pub fn hfn_underflows(reference: u32, sn: u32, sn_bits: u32) -> bool {
    hfn_of(reference, sn_bits) == 0
        && i64::from(sn) >= i64::from(sn_of(reference, sn_bits)) + i64::from(window_size(sn_bits))
}

/// Distance of `x` from `base` in a modular SN space
pub const fn mod_base(x: u32, base: u32, modulus: u32) -> u32 {
    x.wrapping_sub(base).wrapping_add(modulus) % modulus
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_and_join() {
        let count = count_of(3, 0x123, 12);
        assert_eq!(count, 0x3123);
        assert_eq!(sn_of(count, 12), 0x123);
        assert_eq!(hfn_of(count, 12), 3);
        assert_eq!(window_size(12), 2048);
        assert_eq!(window_size(18), 131072);
        assert_eq!(cardinality(18), 262144);
    }

    #[test]
    fn test_estimate_same_hfn() {
        assert_eq!(estimate_count(0, 5, 12), 5);
        assert_eq!(estimate_count(4095, 4000, 12), 4000);
    }

    #[test]
    fn test_estimate_next_hfn() {
        // Reference near the top of the SN space, received SN wrapped
        let reference = count_of(1, 4000, 12);
        assert_eq!(estimate_count(reference, 10, 12), count_of(2, 10, 12));
    }

    #[test]
    fn test_estimate_previous_hfn() {
        let reference = count_of(2, 10, 12);
        assert_eq!(estimate_count(reference, 4090, 12), count_of(1, 4090, 12));
    }

    #[test]
    fn test_hfn_underflow() {
        assert!(hfn_underflows(0, 2048, 12));
        assert!(!hfn_underflows(0, 2047, 12));
        assert!(!hfn_underflows(count_of(1, 0, 12), 4000, 12));
    }

    #[test]
    fn test_mod_base() {
        assert_eq!(mod_base(5, 10, 4096), 4091);
        assert_eq!(mod_base(10, 5, 4096), 5);
        assert_eq!(mod_base(0, 4095, 4096), 1);
    }
}
