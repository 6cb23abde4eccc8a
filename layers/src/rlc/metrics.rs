//! RLC entity counters

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RlcTxMetrics {
    pub num_sdus: u64,
    pub num_sdu_bytes: u64,
    pub num_dropped_sdus: u64,
    pub num_discarded_sdus: u64,
    pub num_discard_failures: u64,
    pub num_pdus: u64,
    pub num_pdu_bytes: u64,
    pub num_retx_pdus: u64,
    /// Status PDUs sent by the co-located receiver
    pub num_ctrl_pdus: u64,
    /// Grants too small to carry any PDU
    pub num_small_allocs: u64,
    pub num_polls: u64,
    pub num_max_retx: u64,
}

impl RlcTxMetrics {
    pub(crate) fn add_pdu(&mut self, len: usize) {
        self.num_pdus += 1;
        self.num_pdu_bytes += len as u64;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RlcRxMetrics {
    pub num_pdus: u64,
    pub num_pdu_bytes: u64,
    pub num_sdus: u64,
    pub num_sdu_bytes: u64,
    /// PDUs outside the window or already received
    pub num_lost_pdus: u64,
    pub num_malformed_pdus: u64,
    pub num_ctrl_pdus: u64,
    pub num_reassembly_timeouts: u64,
}

impl RlcRxMetrics {
    pub(crate) fn add_pdu(&mut self, len: usize) {
        self.num_pdus += 1;
        self.num_pdu_bytes += len as u64;
    }

    pub(crate) fn add_sdu(&mut self, len: usize) {
        self.num_sdus += 1;
        self.num_sdu_bytes += len as u64;
    }
}
