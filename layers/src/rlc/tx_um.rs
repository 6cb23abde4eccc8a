//! RLC UM transmitting entity (TS 38.322 clause 5.2.2.1)

use super::config::{RlcTxUmConfig, RlcUmSnSize};
use super::metrics::RlcTxMetrics;
use super::pdu::{RlcSiField, RlcUmPduHeader};
use super::sdu_queue::{RlcSdu, RlcSduQueue};
use super::tx_upper::{BufferStateSignal, RlcTxUpperHandle};
use super::RlcTxEntity;
use crate::observer::{noop_observer, PduDirection, ProtocolObserver};
use common::sn::cardinality;
use common::{RbId, TimerId, UeIndex};
use interfaces::rlc::{RlcBufferState, RlcTxLowerLayerInterface, RlcTxUpperLayerDataNotifier};
use std::sync::Arc;
use tracing::{debug, info};

pub struct RlcTxUmEntity {
    ue_index: UeIndex,
    rb_id: RbId,
    cfg: RlcTxUmConfig,
    modulus: u32,
    head_min: usize,
    head_max: usize,

    /// TX_Next, SN of the next segmented SDU
    tx_next: u32,
    /// SDU under segmentation
    sdu: Option<RlcSdu>,
    next_so: usize,

    queue: Arc<RlcSduQueue>,
    upper: Arc<RlcTxUpperHandle>,
    upper_dn: Arc<dyn RlcTxUpperLayerDataNotifier>,
    signal: Arc<BufferStateSignal>,
    observer: Arc<dyn ProtocolObserver>,
    metrics: RlcTxMetrics,
    stopped: bool,
}

impl RlcTxUmEntity {
    pub(crate) fn new(
        ue_index: UeIndex,
        rb_id: RbId,
        cfg: RlcTxUmConfig,
        queue: Arc<RlcSduQueue>,
        upper: Arc<RlcTxUpperHandle>,
        upper_dn: Arc<dyn RlcTxUpperLayerDataNotifier>,
        signal: Arc<BufferStateSignal>,
    ) -> Self {
        let sn_size: RlcUmSnSize = cfg.sn_field_length;
        info!(
            "ue={} {} DL: RLC UM Tx configured: sn_size={} queue_size={}",
            ue_index,
            rb_id,
            sn_size.bits(),
            cfg.queue_size
        );
        Self {
            ue_index,
            rb_id,
            modulus: cardinality(sn_size.bits()),
            head_min: RlcUmPduHeader::min_size(sn_size),
            head_max: RlcUmPduHeader::max_size(sn_size),
            tx_next: 0,
            sdu: None,
            next_so: 0,
            queue,
            upper,
            upper_dn,
            signal,
            observer: noop_observer(),
            metrics: RlcTxMetrics::default(),
            stopped: false,
            cfg,
        }
    }

    /// TX_Next
    pub fn tx_next(&self) -> u32 {
        self.tx_next
    }

    /// SI and header size of the next PDU of an SDU of `sdu_len` bytes
    fn next_si(&self, sdu_len: usize, grant_len: usize) -> (RlcSiField, usize) {
        if self.next_so == 0 {
            if sdu_len < grant_len {
                (RlcSiField::FullSdu, 1)
            } else {
                (RlcSiField::FirstSegment, self.head_min)
            }
        } else if sdu_len - self.next_so + self.head_max <= grant_len {
            (RlcSiField::LastSegment, self.head_max)
        } else {
            (RlcSiField::MiddleSegment, self.head_max)
        }
    }
}

impl RlcTxLowerLayerInterface for RlcTxUmEntity {
    fn pull_pdu(&mut self, buf: &mut [u8]) -> usize {
        if self.stopped {
            return 0;
        }
        let grant_len = buf.len();
        if grant_len <= self.head_min {
            debug!(
                "ue={} {} DL: Cannot fit any payload into grant. grant_len={} head_min={}",
                self.ue_index, self.rb_id, grant_len, self.head_min
            );
            self.metrics.num_small_allocs += 1;
            return 0;
        }

        if self.sdu.is_none() {
            let Some(sdu) = self.queue.read() else {
                debug!("ue={} {} DL: No SDUs left in the queue", self.ue_index, self.rb_id);
                return 0;
            };
            self.next_so = 0;
            self.sdu = Some(sdu);
        }
        let Some(sdu) = self.sdu.as_ref() else {
            return 0;
        };
        let sdu_len = sdu.buf.len();
        let (si, head_len) = self.next_si(sdu_len, grant_len);
        if head_len >= grant_len {
            debug!(
                "ue={} {} DL: Cannot fit segment into grant. grant_len={} head_len={}",
                self.ue_index, self.rb_id, grant_len, head_len
            );
            self.metrics.num_small_allocs += 1;
            return 0;
        }

        let header = RlcUmPduHeader {
            si,
            sn_size: self.cfg.sn_field_length,
            sn: self.tx_next,
            so: self.next_so as u16,
        };
        let payload_len = (sdu_len - self.next_so).min(grant_len - head_len);
        let written = header.write(buf);
        buf[written..written + payload_len]
            .copy_from_slice(&sdu.buf[self.next_so..self.next_so + payload_len]);
        let pdu_len = written + payload_len;
        let pdcp_sn = sdu.pdcp_sn;
        debug!(
            "ue={} {} DL: TX PDU. {} pdu_len={} grant_len={}",
            self.ue_index, self.rb_id, header, pdu_len, grant_len
        );

        match si {
            RlcSiField::FullSdu | RlcSiField::LastSegment => {
                self.sdu = None;
                self.next_so = 0;
                if si == RlcSiField::LastSegment {
                    self.tx_next = (self.tx_next + 1) % self.modulus;
                }
                if let Some(sn) = pdcp_sn {
                    self.upper_dn.on_transmitted_sdu(sn, self.cfg.queue_size_bytes);
                }
            }
            RlcSiField::FirstSegment | RlcSiField::MiddleSegment => {
                self.next_so += payload_len;
            }
        }

        self.metrics.add_pdu(pdu_len);
        self.observer
            .on_rlc_pdu(self.ue_index, self.rb_id, PduDirection::Tx, &buf[..pdu_len]);
        pdu_len
    }

    fn get_buffer_state(&mut self) -> RlcBufferState {
        let queued = self.queue.state();
        let mut pending = queued.n_bytes as usize + queued.n_sdus as usize * self.head_min;
        let mut hol_toa = None;
        if let Some(sdu) = &self.sdu {
            pending += sdu.buf.len() - self.next_so + self.head_max;
            hol_toa = Some(sdu.time_of_arrival);
        }
        RlcBufferState {
            pending_bytes: pending as u32,
            hol_toa: hol_toa.or_else(|| self.queue.front(|sdu| sdu.time_of_arrival)),
        }
    }
}

impl RlcTxEntity for RlcTxUmEntity {
    fn update_mac_buffer_state(&mut self) {
        let bs = self.get_buffer_state();
        self.signal.publish(bs);
    }

    fn handle_timer_expiry(&mut self, _timer_id: TimerId) -> bool {
        false
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.upper.stop();
    }

    fn metrics(&self) -> RlcTxMetrics {
        let mut metrics = self.metrics.clone();
        self.upper.merge_metrics(&mut metrics);
        metrics
    }

    fn reset_metrics(&mut self) {
        self.metrics = RlcTxMetrics::default();
        self.upper.reset_metrics();
    }

    fn set_observer(&mut self, observer: Arc<dyn ProtocolObserver>) {
        self.observer = observer;
    }
}
