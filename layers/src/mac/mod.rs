//! Medium Access Control (MAC) Layer Implementation
//!
//! Only the scheduling pieces the L2 user plane depends on live here: the
//! inter-slice scheduler that ranks RAN slices every slot (TS 38.300 clause 16.3).

pub mod slicing;

pub use slicing::{
    InterSliceScheduler, RanSliceCandidate, RanSliceId, RanSliceInstance, SliceAllocation,
    SliceAllocationError, SliceCellConfig, SliceRrmPolicyConfig, SliceUeConfig,
};
