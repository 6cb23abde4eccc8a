//! Slot point arithmetic
//!
//! A slot point counts slots modulo 1024 frames for a given numerology.

use crate::types::SubcarrierSpacing;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Number of system frames before SFN wraps
pub const NOF_SFNS: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotPoint {
    scs: SubcarrierSpacing,
    count: u32,
}

impl SlotPoint {
    pub fn new(scs: SubcarrierSpacing, sfn: u32, slot_index: u32) -> Self {
        let spf = scs.slots_per_frame();
        Self {
            scs,
            count: ((sfn % NOF_SFNS) * spf + slot_index % spf) % Self::period(scs),
        }
    }

    fn period(scs: SubcarrierSpacing) -> u32 {
        NOF_SFNS * scs.slots_per_frame()
    }

    pub fn scs(&self) -> SubcarrierSpacing {
        self.scs
    }

    pub fn sfn(&self) -> u32 {
        self.count / self.scs.slots_per_frame()
    }

    pub fn slot_index(&self) -> u32 {
        self.count % self.scs.slots_per_frame()
    }

    /// Slot count since SFN 0, slot 0
    pub fn to_uint(&self) -> u32 {
        self.count
    }

    pub fn nof_slots_per_frame(&self) -> u32 {
        self.scs.slots_per_frame()
    }
}

impl fmt::Display for SlotPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sfn(), self.slot_index())
    }
}

impl Add<u32> for SlotPoint {
    type Output = SlotPoint;

    fn add(self, slots: u32) -> SlotPoint {
        let period = Self::period(self.scs);
        SlotPoint {
            scs: self.scs,
            count: ((u64::from(self.count) + u64::from(slots)) % u64::from(period)) as u32,
        }
    }
}

impl AddAssign<u32> for SlotPoint {
    fn add_assign(&mut self, slots: u32) {
        *self = *self + slots;
    }
}

impl Sub<u32> for SlotPoint {
    type Output = SlotPoint;

    fn sub(self, slots: u32) -> SlotPoint {
        let period = Self::period(self.scs);
        self + (period - slots % period)
    }
}

/// Signed distance in slots, taking the shortest way around the SFN wrap
impl Sub<SlotPoint> for SlotPoint {
    type Output = i32;

    fn sub(self, other: SlotPoint) -> i32 {
        let period = Self::period(self.scs) as i64;
        let mut diff = (i64::from(self.count) - i64::from(other.count)).rem_euclid(period);
        if diff >= period / 2 {
            diff -= period;
        }
        diff as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sfn_and_slot() {
        let s = SlotPoint::new(SubcarrierSpacing::Scs30, 3, 7);
        assert_eq!(s.sfn(), 3);
        assert_eq!(s.slot_index(), 7);
        assert_eq!(s.to_uint(), 67);
        assert_eq!(s.to_string(), "3.7");
    }

    #[test]
    fn test_wraparound() {
        let last = SlotPoint::new(SubcarrierSpacing::Scs15, 1023, 9);
        let first = last + 1;
        assert_eq!(first.sfn(), 0);
        assert_eq!(first.slot_index(), 0);
        assert_eq!(first - last, 1);
        assert_eq!(last - first, -1);
        assert_eq!(first - 1, last);
    }
}
