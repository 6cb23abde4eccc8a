//! Upper side of an RLC Tx entity
//!
//! The handle is shared with the upper context (PDCP or RRC). It only touches
//! the SDU queue and atomics, so it can run concurrently with `pull_pdu` in
//! the lower context.

use super::metrics::RlcTxMetrics;
use super::sdu_queue::{RlcSdu, RlcSduQueue};
use super::RlcMode;
use crate::pdcp::pdu::pdcp_sn_of_sdu;
use crate::pdcp::{PdcpRbType, PdcpSnSize};
use bytes::Bytes;
use common::{RbId, UeIndex};
use interfaces::pdcp::PdcpTxLowerNotifier;
use interfaces::rlc::{RlcBufferState, RlcTxLowerLayerNotifier, RlcTxUpperLayerDataInterface};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Coalesces buffer state changes raised outside the lower context into one
/// `on_buffer_state_changed` until the lower context publishes a new state.
pub(crate) struct BufferStateSignal {
    pending: AtomicBool,
    lower_dn: Arc<dyn RlcTxLowerLayerNotifier>,
}

impl BufferStateSignal {
    pub(crate) fn new(lower_dn: Arc<dyn RlcTxLowerLayerNotifier>) -> Self {
        Self {
            pending: AtomicBool::new(false),
            lower_dn,
        }
    }

    pub(crate) fn changed(&self) {
        if !self.pending.swap(true, Ordering::AcqRel) {
            self.lower_dn.on_buffer_state_changed();
        }
    }

    pub(crate) fn publish(&self, bs: RlcBufferState) {
        self.pending.store(false, Ordering::Release);
        self.lower_dn.on_buffer_state_update(bs);
    }
}

#[derive(Debug, Default)]
struct UpperCounters {
    num_sdus: AtomicU64,
    num_sdu_bytes: AtomicU64,
    num_dropped_sdus: AtomicU64,
    num_discarded_sdus: AtomicU64,
    num_discard_failures: AtomicU64,
}

/// SDU input of one RLC Tx entity
pub struct RlcTxUpperHandle {
    ue_index: UeIndex,
    rb_id: RbId,
    mode: RlcMode,
    queue: Arc<RlcSduQueue>,
    /// Set when SDUs are PDCP PDUs whose SN is tracked
    pdcp_sn_size: Option<PdcpSnSize>,
    signal: Arc<BufferStateSignal>,
    stopped: AtomicBool,
    counters: UpperCounters,
}

impl RlcTxUpperHandle {
    pub(crate) fn new(
        ue_index: UeIndex,
        rb_id: RbId,
        mode: RlcMode,
        queue: Arc<RlcSduQueue>,
        pdcp_sn_size: Option<PdcpSnSize>,
        signal: Arc<BufferStateSignal>,
    ) -> Self {
        Self {
            ue_index,
            rb_id,
            mode,
            queue,
            pdcp_sn_size,
            signal,
            stopped: AtomicBool::new(false),
            counters: UpperCounters::default(),
        }
    }

    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn rb_type(&self) -> PdcpRbType {
        if self.rb_id.is_srb() {
            PdcpRbType::Srb
        } else {
            PdcpRbType::Drb
        }
    }

    /// Fold the upper-side counters into `metrics`
    pub(crate) fn merge_metrics(&self, metrics: &mut RlcTxMetrics) {
        metrics.num_sdus = self.counters.num_sdus.load(Ordering::Relaxed);
        metrics.num_sdu_bytes = self.counters.num_sdu_bytes.load(Ordering::Relaxed);
        metrics.num_dropped_sdus = self.counters.num_dropped_sdus.load(Ordering::Relaxed);
        metrics.num_discarded_sdus = self.counters.num_discarded_sdus.load(Ordering::Relaxed);
        metrics.num_discard_failures = self.counters.num_discard_failures.load(Ordering::Relaxed);
    }

    pub(crate) fn reset_metrics(&self) {
        self.counters.num_sdus.store(0, Ordering::Relaxed);
        self.counters.num_sdu_bytes.store(0, Ordering::Relaxed);
        self.counters.num_dropped_sdus.store(0, Ordering::Relaxed);
        self.counters.num_discarded_sdus.store(0, Ordering::Relaxed);
        self.counters.num_discard_failures.store(0, Ordering::Relaxed);
    }
}

impl RlcTxUpperLayerDataInterface for RlcTxUpperHandle {
    fn handle_sdu(&self, sdu: Bytes, is_retx: bool) {
        if self.is_stopped() {
            return;
        }
        if self.mode == RlcMode::Tm && is_retx {
            error!(
                "ue={} {} DL: Ignoring retx flag of SDU. TM does not support retransmissions",
                self.ue_index, self.rb_id
            );
        }
        let pdcp_sn = self
            .pdcp_sn_size
            .and_then(|sn_size| pdcp_sn_of_sdu(&sdu, self.rb_type(), sn_size));
        let len = sdu.len();
        if self.queue.write(RlcSdu::new(sdu, is_retx, pdcp_sn)) {
            debug!(
                "ue={} {} DL: TX SDU. sdu_len={} pdcp_sn={:?} is_retx={} {}",
                self.ue_index,
                self.rb_id,
                len,
                pdcp_sn,
                is_retx,
                self.queue.state()
            );
            self.counters.num_sdus.fetch_add(1, Ordering::Relaxed);
            self.counters.num_sdu_bytes.fetch_add(len as u64, Ordering::Relaxed);
            self.signal.changed();
        } else {
            info!(
                "ue={} {} DL: Dropped SDU. sdu_len={} pdcp_sn={:?} is_retx={} {}",
                self.ue_index,
                self.rb_id,
                len,
                pdcp_sn,
                is_retx,
                self.queue.state()
            );
            self.counters.num_dropped_sdus.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn discard_sdu(&self, pdcp_sn: u32) {
        if self.is_stopped() {
            return;
        }
        if self.mode == RlcMode::Tm {
            warn!(
                "ue={} {} DL: Ignoring discard of pdcp_sn={}. TM does not support discards",
                self.ue_index, self.rb_id, pdcp_sn
            );
            self.counters.num_discard_failures.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if self.queue.try_discard(pdcp_sn) {
            debug!(
                "ue={} {} DL: Discarded SDU. pdcp_sn={} {}",
                self.ue_index,
                self.rb_id,
                pdcp_sn,
                self.queue.state()
            );
            self.counters.num_discarded_sdus.fetch_add(1, Ordering::Relaxed);
            self.signal.changed();
        } else {
            info!(
                "ue={} {} DL: Could not discard SDU. pdcp_sn={} {}",
                self.ue_index,
                self.rb_id,
                pdcp_sn,
                self.queue.state()
            );
            self.counters.num_discard_failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// PDCP Tx hands its PDUs straight to the RLC Tx queue
impl PdcpTxLowerNotifier for RlcTxUpperHandle {
    fn on_new_pdu(&self, pdu: Bytes, is_retx: bool) {
        self.handle_sdu(pdu, is_retx);
    }

    fn on_discard_pdu(&self, pdcp_sn: u32) {
        self.discard_sdu(pdcp_sn);
    }
}
