//! RLC AM transmitting entity (TS 38.322 clause 5.2.3.1, 5.3.2, 5.3.3)

use super::config::{RlcAmSnSize, RlcTxAmConfig};
use super::metrics::RlcTxMetrics;
use super::pdu::{RlcAmPduHeader, RlcSiField};
use super::rx_am::RxAmStatusProvider;
use super::sdu_queue::RlcSduQueue;
use super::status::{RlcAmStatusPdu, SO_END_OF_SDU};
use super::tx_upper::{BufferStateSignal, RlcTxUpperHandle};
use super::RlcTxEntity;
use crate::observer::{noop_observer, PduDirection, ProtocolObserver};
use bytes::Bytes;
use common::sn::{cardinality, mod_base, window_size};
use common::{RbId, SduWindow, TimerId, TimerManager, UeIndex, UniqueTimer};
use interfaces::channel::NotificationReceiver;
use interfaces::rlc::{
    RlcBufferState, RlcTxLowerLayerInterface, RlcTxUpperLayerControlNotifier,
    RlcTxUpperLayerDataNotifier,
};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Tx state variables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RlcTxAmState {
    /// Lower edge of the transmit window
    pub tx_next_ack: u32,
    /// SN assigned to the next new SDU
    pub tx_next: u32,
    /// Highest SN sent with a poll
    pub poll_sn: u32,
    pub pdu_without_poll: u32,
    pub byte_without_poll: u32,
}

#[derive(Debug)]
struct RlcTxAmSduInfo {
    sdu: Bytes,
    is_retx: bool,
    pdcp_sn: Option<u32>,
    time_of_arrival: Instant,
    /// Bytes already sent as new data
    next_so: usize,
    /// `None` until first considered for retransmission
    retx_count: Option<u32>,
}

/// Byte range of an SDU queued for retransmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RlcTxAmRetxInfo {
    sn: u32,
    so: usize,
    length: usize,
}

/// One NACKed byte range, `so_end` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NackedRange {
    sn: u32,
    so_start: usize,
    so_end: Option<usize>,
}

pub struct RlcTxAmEntity {
    ue_index: UeIndex,
    rb_id: RbId,
    cfg: RlcTxAmConfig,
    modulus: u32,
    /// AM_Window_Size, possibly capped by `max_window`
    tx_window_size: u32,
    head_min: usize,
    head_max: usize,

    st: RlcTxAmState,
    tx_window: SduWindow<RlcTxAmSduInfo>,
    retx_queue: VecDeque<RlcTxAmRetxInfo>,
    sn_under_segmentation: Option<u32>,
    poll_retransmit_timer: UniqueTimer,
    /// Set by t-PollRetransmit expiry, consumed by the next PDU
    poll_retx_expired: bool,
    max_retx_reached: bool,

    queue: Arc<RlcSduQueue>,
    upper: Arc<RlcTxUpperHandle>,
    status_provider: Arc<RxAmStatusProvider>,
    status_rx: NotificationReceiver<RlcAmStatusPdu>,
    upper_dn: Arc<dyn RlcTxUpperLayerDataNotifier>,
    upper_cn: Arc<dyn RlcTxUpperLayerControlNotifier>,
    signal: Arc<BufferStateSignal>,
    observer: Arc<dyn ProtocolObserver>,
    metrics: RlcTxMetrics,
    stopped: bool,
}

impl RlcTxAmEntity {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        ue_index: UeIndex,
        rb_id: RbId,
        cfg: RlcTxAmConfig,
        queue: Arc<RlcSduQueue>,
        upper: Arc<RlcTxUpperHandle>,
        status_provider: Arc<RxAmStatusProvider>,
        status_rx: NotificationReceiver<RlcAmStatusPdu>,
        upper_dn: Arc<dyn RlcTxUpperLayerDataNotifier>,
        upper_cn: Arc<dyn RlcTxUpperLayerControlNotifier>,
        signal: Arc<BufferStateSignal>,
        timers: &TimerManager,
    ) -> Self {
        let sn_size: RlcAmSnSize = cfg.sn_field_length;
        let am_window_size = window_size(sn_size.bits());
        let tx_window_size = if cfg.max_window > 0 {
            cfg.max_window.min(am_window_size)
        } else {
            am_window_size
        };
        let poll_retransmit_timer = timers.create_timer();
        poll_retransmit_timer.set(Duration::from_millis(u64::from(cfg.t_poll_retx)));
        info!(
            "ue={} {} DL: RLC AM Tx configured: sn_size={} t_poll_retx={} max_retx_thresh={} poll_pdu={:?} poll_byte={:?} tx_window_size={}",
            ue_index,
            rb_id,
            sn_size.bits(),
            cfg.t_poll_retx,
            cfg.max_retx_thresh,
            cfg.poll_pdu,
            cfg.poll_byte,
            tx_window_size
        );

        Self {
            ue_index,
            rb_id,
            modulus: cardinality(sn_size.bits()),
            tx_window_size,
            head_min: RlcAmPduHeader::min_size(sn_size),
            head_max: RlcAmPduHeader::max_size(sn_size),
            st: RlcTxAmState::default(),
            tx_window: SduWindow::new(am_window_size as usize),
            retx_queue: VecDeque::new(),
            sn_under_segmentation: None,
            poll_retransmit_timer,
            poll_retx_expired: false,
            max_retx_reached: false,
            queue,
            upper,
            status_provider,
            status_rx,
            upper_dn,
            upper_cn,
            signal,
            observer: noop_observer(),
            metrics: RlcTxMetrics::default(),
            stopped: false,
            cfg,
        }
    }

    pub fn state(&self) -> RlcTxAmState {
        self.st
    }

    pub fn is_poll_retransmit_timer_running(&self) -> bool {
        self.poll_retransmit_timer.is_running()
    }

    /// Number of SDUs awaiting acknowledgement
    pub fn nof_sdus_in_window(&self) -> usize {
        self.tx_window.len()
    }

    pub fn retx_queue_len(&self) -> usize {
        self.retx_queue.len()
    }

    fn tx_mod_base(&self, sn: u32) -> u32 {
        mod_base(sn, self.st.tx_next_ack, self.modulus)
    }

    fn next_sn(&self, sn: u32) -> u32 {
        (sn + 1) % self.modulus
    }

    fn is_tx_window_full(&self) -> bool {
        self.tx_mod_base(self.st.tx_next) >= self.tx_window_size
    }

    /// ACK_SN must move the window forward without passing TX_Next
    fn valid_ack_sn(&self, ack_sn: u32) -> bool {
        let base = self.tx_mod_base(ack_sn);
        base > 0 && base <= self.tx_mod_base(self.st.tx_next)
    }

    /// NACKed SNs must have been transmitted
    fn valid_nack_sn(&self, sn: u32) -> bool {
        self.tx_mod_base(sn) < self.tx_mod_base(self.st.tx_next)
    }

    fn retx_bytes(&self) -> usize {
        self.retx_queue
            .iter()
            .map(|r| r.length + if r.so == 0 { self.head_min } else { self.head_max })
            .sum()
    }

    fn finish_pdu(&mut self, buf: &[u8]) -> usize {
        self.metrics.add_pdu(buf.len());
        self.observer
            .on_rlc_pdu(self.ue_index, self.rb_id, PduDirection::Tx, buf);
        buf.len()
    }

    /// Handle status PDUs forwarded by the receiver. Returns true if any arrived.
    fn process_status_pdus(&mut self) -> bool {
        let mut any = false;
        while let Some(status) = self.status_rx.try_next() {
            self.on_status_pdu(status);
            any = true;
        }
        any
    }

    fn build_status_pdu(&mut self, buf: &mut [u8]) -> usize {
        let grant_len = buf.len();
        let mut status = self.status_provider.take_status_pdu();
        if !status.trim(grant_len) {
            info!(
                "ue={} {} DL: Status PDU does not fit the grant. grant_len={} status_len={}",
                self.ue_index,
                self.rb_id,
                grant_len,
                status.packed_size()
            );
            self.metrics.num_small_allocs += 1;
            return 0;
        }
        let pdu = status.pack();
        buf[..pdu.len()].copy_from_slice(&pdu);
        debug!(
            "ue={} {} DL: TX status PDU. {} pdu_len={} grant_len={}",
            self.ue_index,
            self.rb_id,
            status,
            pdu.len(),
            grant_len
        );
        self.metrics.num_ctrl_pdus += 1;
        self.finish_pdu(&buf[..pdu.len()])
    }

    fn build_retx_pdu(&mut self, buf: &mut [u8]) -> usize {
        let grant_len = buf.len();
        let retx = loop {
            let Some(retx) = self.retx_queue.front().copied() else {
                return 0;
            };
            match self.tx_window.get(retx.sn) {
                Some(info) if retx.so < info.sdu.len() => break retx,
                _ => {
                    debug!(
                        "ue={} {} DL: Dropping stale RETX. sn={} so={}",
                        self.ue_index, self.rb_id, retx.sn, retx.so
                    );
                    self.retx_queue.pop_front();
                }
            }
        };
        let head_len = if retx.so == 0 {
            self.head_min
        } else {
            self.head_max
        };
        if grant_len <= head_len {
            debug!(
                "ue={} {} DL: Cannot fit RETX into grant. grant_len={} head_len={}",
                self.ue_index, self.rb_id, grant_len, head_len
            );
            self.metrics.num_small_allocs += 1;
            return 0;
        }
        let Some(info) = self.tx_window.get(retx.sn) else {
            return 0;
        };
        let sdu = info.sdu.clone();
        let payload_len = retx.length.min(grant_len - head_len);
        let si = RlcSiField::for_segment(retx.so, payload_len, sdu.len());

        // the queue must be updated before the poll decision
        if payload_len == retx.length {
            self.retx_queue.pop_front();
        } else if let Some(front) = self.retx_queue.front_mut() {
            front.so += payload_len;
            front.length -= payload_len;
        }

        let header = RlcAmPduHeader {
            p: self.get_polling_bit(retx.sn, true, 0),
            si,
            sn_size: self.cfg.sn_field_length,
            sn: retx.sn,
            so: retx.so as u16,
        };
        let written = header.write(buf);
        let pdu_len = written + payload_len;
        buf[written..pdu_len].copy_from_slice(&sdu[retx.so..retx.so + payload_len]);
        debug!(
            "ue={} {} DL: TX RETX PDU. {} pdu_len={} grant_len={}",
            self.ue_index, self.rb_id, header, pdu_len, grant_len
        );
        self.metrics.num_retx_pdus += 1;
        self.finish_pdu(&buf[..pdu_len])
    }

    fn continue_sdu_segmentation(&mut self, sn: u32, buf: &mut [u8]) -> usize {
        let grant_len = buf.len();
        if grant_len <= self.head_max {
            debug!(
                "ue={} {} DL: Cannot fit SDU segment into grant. grant_len={} head_max={}",
                self.ue_index, self.rb_id, grant_len, self.head_max
            );
            self.metrics.num_small_allocs += 1;
            return 0;
        }
        let Some(info) = self.tx_window.get_mut(sn) else {
            error!(
                "ue={} {} DL: SDU under segmentation is not in the Tx window. sn={}",
                self.ue_index, self.rb_id, sn
            );
            self.sn_under_segmentation = None;
            return 0;
        };
        let sdu = info.sdu.clone();
        let so = info.next_so;
        let payload_len = (sdu.len() - so).min(grant_len - self.head_max);
        let si = RlcSiField::for_segment(so, payload_len, sdu.len());
        info.next_so += payload_len;
        if si == RlcSiField::LastSegment {
            self.sn_under_segmentation = None;
        }

        let header = RlcAmPduHeader {
            p: self.get_polling_bit(sn, false, payload_len),
            si,
            sn_size: self.cfg.sn_field_length,
            sn,
            so: so as u16,
        };
        let written = header.write(buf);
        let pdu_len = written + payload_len;
        buf[written..pdu_len].copy_from_slice(&sdu[so..so + payload_len]);
        debug!(
            "ue={} {} DL: TX PDU. {} pdu_len={} grant_len={}",
            self.ue_index, self.rb_id, header, pdu_len, grant_len
        );
        self.finish_pdu(&buf[..pdu_len])
    }

    fn build_new_pdu(&mut self, buf: &mut [u8]) -> usize {
        let grant_len = buf.len();
        if grant_len <= self.head_min {
            debug!(
                "ue={} {} DL: Cannot fit any payload into grant. grant_len={} head_min={}",
                self.ue_index, self.rb_id, grant_len, self.head_min
            );
            self.metrics.num_small_allocs += 1;
            return 0;
        }
        if self.is_tx_window_full() {
            info!(
                "ue={} {} DL: Cannot send new PDU, Tx window is full. {:?}",
                self.ue_index, self.rb_id, self.st
            );
            return 0;
        }
        let Some(sdu) = self.queue.read() else {
            debug!("ue={} {} DL: No SDUs left in the queue", self.ue_index, self.rb_id);
            return 0;
        };

        let sn = self.st.tx_next;
        let sdu_len = sdu.buf.len();
        if let Some(pdcp_sn) = sdu.pdcp_sn {
            if sdu.is_retx {
                self.upper_dn.on_retransmitted_sdu(pdcp_sn);
            } else {
                self.upper_dn.on_transmitted_sdu(pdcp_sn, self.cfg.queue_size_bytes);
            }
        }
        let payload_len = sdu_len.min(grant_len - self.head_min);
        let si = RlcSiField::for_segment(0, payload_len, sdu_len);
        self.tx_window.insert(
            sn,
            RlcTxAmSduInfo {
                sdu: sdu.buf.clone(),
                is_retx: sdu.is_retx,
                pdcp_sn: sdu.pdcp_sn,
                time_of_arrival: sdu.time_of_arrival,
                next_so: payload_len,
                retx_count: None,
            },
        );
        if si == RlcSiField::FirstSegment {
            self.sn_under_segmentation = Some(sn);
        }
        self.st.tx_next = self.next_sn(sn);

        let header = RlcAmPduHeader {
            p: self.get_polling_bit(sn, false, payload_len),
            si,
            sn_size: self.cfg.sn_field_length,
            sn,
            so: 0,
        };
        let written = header.write(buf);
        let pdu_len = written + payload_len;
        buf[written..pdu_len].copy_from_slice(&sdu.buf[..payload_len]);
        debug!(
            "ue={} {} DL: TX PDU. {} pdu_len={} grant_len={}",
            self.ue_index, self.rb_id, header, pdu_len, grant_len
        );
        self.finish_pdu(&buf[..pdu_len])
    }

    /// Poll bit of the PDU about to be sent (TS 38.322 clause 5.3.3.2)
    fn get_polling_bit(&mut self, sn: u32, is_retx: bool, payload_len: usize) -> bool {
        let mut poll = false;
        if !is_retx {
            self.st.pdu_without_poll += 1;
            self.st.byte_without_poll += payload_len as u32;
            if self
                .cfg
                .poll_pdu
                .is_some_and(|poll_pdu| self.st.pdu_without_poll >= poll_pdu)
            {
                poll = true;
            }
            if self
                .cfg
                .poll_byte
                .is_some_and(|poll_byte| self.st.byte_without_poll >= poll_byte)
            {
                poll = true;
            }
        }
        let buffers_empty = self.queue.size_sdus() == 0
            && self.retx_queue.is_empty()
            && self.sn_under_segmentation.is_none();
        if buffers_empty || self.is_tx_window_full() {
            poll = true;
        }
        if std::mem::take(&mut self.poll_retx_expired) {
            poll = true;
        }

        if poll {
            self.st.pdu_without_poll = 0;
            self.st.byte_without_poll = 0;
            self.st.poll_sn = if is_retx {
                (self.st.tx_next + self.modulus - 1) % self.modulus
            } else {
                sn
            };
            self.poll_retransmit_timer.run();
            self.metrics.num_polls += 1;
            debug!(
                "ue={} {} DL: Setting poll bit. sn={} poll_sn={} is_retx={}",
                self.ue_index, self.rb_id, sn, self.st.poll_sn, is_retx
            );
        }
        poll
    }

    /// Apply a status PDU received from the peer (TS 38.322 clause 5.3.2)
    pub(crate) fn on_status_pdu(&mut self, status: RlcAmStatusPdu) {
        if self.stopped {
            return;
        }
        info!(
            "ue={} {} DL: Handling status PDU. {} {:?}",
            self.ue_index, self.rb_id, status, self.st
        );
        if !self.valid_ack_sn(status.ack_sn) {
            info!(
                "ue={} {} DL: Ignoring status PDU with invalid ack_sn={}. {:?}",
                self.ue_index, self.rb_id, status.ack_sn, self.st
            );
            return;
        }

        if self.poll_retransmit_timer.is_running()
            && self.tx_mod_base(self.st.poll_sn) < self.tx_mod_base(status.ack_sn)
        {
            debug!(
                "ue={} {} DL: Stopping t-PollRetransmit. poll_sn={} ack_sn={}",
                self.ue_index, self.rb_id, self.st.poll_sn, status.ack_sn
            );
            self.poll_retransmit_timer.stop();
        }

        let nacked = self.expand_nacks(&status);
        let nacked_sns: HashSet<u32> = nacked.iter().map(|n| n.sn).collect();
        let first_nack = status.nacks().first().map(|n| n.nack_sn);

        // ACKs
        let mut max_deliv_pdcp_sn = None;
        let mut max_deliv_retx_pdcp_sn = None;
        let mut notify = true;
        let mut new_tx_next_ack = None;
        let mut sn = self.st.tx_next_ack;
        while self.tx_mod_base(sn) < self.tx_mod_base(status.ack_sn) {
            if Some(sn) == first_nack {
                notify = false;
            }
            if nacked_sns.contains(&sn) {
                if new_tx_next_ack.is_none() && self.tx_window.has_sn(sn) {
                    new_tx_next_ack = Some(sn);
                }
            } else if let Some(info) = self.tx_window.remove_sn(sn) {
                if notify {
                    if info.is_retx {
                        max_deliv_retx_pdcp_sn = info.pdcp_sn.or(max_deliv_retx_pdcp_sn);
                    } else {
                        max_deliv_pdcp_sn = info.pdcp_sn.or(max_deliv_pdcp_sn);
                    }
                }
                if self.sn_under_segmentation == Some(sn) {
                    self.sn_under_segmentation = None;
                }
            } else if new_tx_next_ack.is_none() && notify {
                debug!(
                    "ue={} {} DL: ACKed SN is not in the Tx window. sn={}",
                    self.ue_index, self.rb_id, sn
                );
            }
            sn = self.next_sn(sn);
        }
        let acked_below = status.ack_sn;
        let old_tx_next_ack = self.st.tx_next_ack;
        self.retx_queue.retain(|r| {
            let base = mod_base(r.sn, old_tx_next_ack, self.modulus);
            base >= mod_base(acked_below, old_tx_next_ack, self.modulus) || nacked_sns.contains(&r.sn)
        });
        self.st.tx_next_ack = new_tx_next_ack.unwrap_or(status.ack_sn);

        if let Some(pdcp_sn) = max_deliv_pdcp_sn {
            self.upper_dn.on_delivered_sdu(pdcp_sn);
        }
        if let Some(pdcp_sn) = max_deliv_retx_pdcp_sn {
            self.upper_dn.on_delivered_retransmitted_sdu(pdcp_sn);
        }

        // NACKs
        let mut counted = HashSet::new();
        for nack in nacked {
            if self.handle_nack(nack) && counted.insert(nack.sn) {
                self.increment_retx_count(nack.sn);
            }
        }
        debug!(
            "ue={} {} DL: Status PDU handled. retx_queue_len={} {:?}",
            self.ue_index,
            self.rb_id,
            self.retx_queue.len(),
            self.st
        );
    }

    /// Split NACK ranges into one entry per SN
    fn expand_nacks(&self, status: &RlcAmStatusPdu) -> Vec<NackedRange> {
        let mut out = Vec::new();
        for nack in status.nacks() {
            let count = if nack.has_nack_range {
                u32::from(nack.nack_range).max(1)
            } else {
                1
            };
            for i in 0..count {
                let sn = (nack.nack_sn + i) % self.modulus;
                let mut range = NackedRange {
                    sn,
                    so_start: 0,
                    so_end: None,
                };
                if nack.has_so {
                    if i == 0 {
                        range.so_start = usize::from(nack.so_start);
                    }
                    if i + 1 == count && nack.so_end != SO_END_OF_SDU {
                        range.so_end = Some(usize::from(nack.so_end) + 1);
                    }
                }
                out.push(range);
            }
        }
        out
    }

    /// Queue a NACKed range for retransmission. Returns true if it was queued.
    fn handle_nack(&mut self, nack: NackedRange) -> bool {
        if !self.valid_nack_sn(nack.sn) {
            warn!(
                "ue={} {} DL: Ignoring NACK outside the Tx window. sn={} {:?}",
                self.ue_index, self.rb_id, nack.sn, self.st
            );
            return false;
        }
        let Some(info) = self.tx_window.get(nack.sn) else {
            info!(
                "ue={} {} DL: Ignoring NACK of SN not in the Tx window. sn={}",
                self.ue_index, self.rb_id, nack.sn
            );
            return false;
        };
        let mut so_end = nack.so_end.unwrap_or(info.sdu.len()).min(info.sdu.len());
        if self.sn_under_segmentation == Some(nack.sn) {
            so_end = so_end.min(info.next_so);
        }
        if nack.so_start >= so_end {
            warn!(
                "ue={} {} DL: Ignoring NACK with invalid segment. sn={} so={}..{}",
                self.ue_index, self.rb_id, nack.sn, nack.so_start, so_end
            );
            return false;
        }
        let overlaps = self.retx_queue.iter().any(|r| {
            r.sn == nack.sn && r.so < so_end && nack.so_start < r.so + r.length
        });
        if overlaps {
            debug!(
                "ue={} {} DL: NACKed range already queued. sn={} so={}..{}",
                self.ue_index, self.rb_id, nack.sn, nack.so_start, so_end
            );
            return false;
        }
        self.retx_queue.push_back(RlcTxAmRetxInfo {
            sn: nack.sn,
            so: nack.so_start,
            length: so_end - nack.so_start,
        });
        true
    }

    fn increment_retx_count(&mut self, sn: u32) {
        let Some(info) = self.tx_window.get_mut(sn) else {
            return;
        };
        let count = info.retx_count.map_or(0, |c| c + 1);
        info.retx_count = Some(count);
        if count == self.cfg.max_retx_thresh {
            self.metrics.num_max_retx += 1;
            if !self.max_retx_reached {
                warn!(
                    "ue={} {} DL: Reached max_retx_thresh. sn={} retx_count={}",
                    self.ue_index, self.rb_id, sn, count
                );
                self.max_retx_reached = true;
                self.upper_cn.on_max_retx();
            }
        }
    }

    /// t-PollRetransmit expiry (TS 38.322 clause 5.3.3.4)
    fn on_poll_retransmit_expiry(&mut self) {
        if !self.poll_retransmit_timer.has_expired() {
            debug!(
                "ue={} {} DL: Ignoring stale t-PollRetransmit expiry",
                self.ue_index, self.rb_id
            );
            return;
        }
        self.poll_retransmit_timer.stop();
        info!(
            "ue={} {} DL: t-PollRetransmit expired. {:?}",
            self.ue_index, self.rb_id, self.st
        );

        let buffers_empty = self.queue.size_sdus() == 0
            && self.retx_queue.is_empty()
            && self.sn_under_segmentation.is_none();
        if buffers_empty || self.is_tx_window_full() {
            let mut sn = (self.st.tx_next + self.modulus - 1) % self.modulus;
            let mut candidate = None;
            while self.tx_mod_base(sn) < self.tx_mod_base(self.st.tx_next) {
                if self.tx_window.has_sn(sn) {
                    candidate = Some(sn);
                    break;
                }
                if sn == self.st.tx_next_ack {
                    break;
                }
                sn = (sn + self.modulus - 1) % self.modulus;
            }
            match candidate {
                Some(sn) => {
                    let nack = NackedRange {
                        sn,
                        so_start: 0,
                        so_end: None,
                    };
                    if self.handle_nack(nack) {
                        self.increment_retx_count(sn);
                    }
                }
                None => debug!(
                    "ue={} {} DL: Nothing to retransmit on t-PollRetransmit expiry",
                    self.ue_index, self.rb_id
                ),
            }
        }
        self.poll_retx_expired = true;
        self.update_mac_buffer_state();
    }

    fn hol_toa(&self) -> Option<Instant> {
        if let Some(info) = self
            .retx_queue
            .front()
            .and_then(|retx| self.tx_window.get(retx.sn))
        {
            return Some(info.time_of_arrival);
        }
        if let Some(info) = self.sn_under_segmentation.and_then(|sn| self.tx_window.get(sn)) {
            return Some(info.time_of_arrival);
        }
        self.queue.front(|sdu| sdu.time_of_arrival)
    }
}

impl RlcTxLowerLayerInterface for RlcTxAmEntity {
    fn pull_pdu(&mut self, buf: &mut [u8]) -> usize {
        if self.stopped {
            return 0;
        }
        if self.process_status_pdus() {
            self.signal.changed();
        }

        if self.status_provider.status_report_required() {
            return self.build_status_pdu(buf);
        }
        if !self.retx_queue.is_empty() {
            let len = self.build_retx_pdu(buf);
            if len > 0 || !self.retx_queue.is_empty() {
                return len;
            }
        }
        if let Some(sn) = self.sn_under_segmentation {
            return self.continue_sdu_segmentation(sn, buf);
        }
        self.build_new_pdu(buf)
    }

    fn get_buffer_state(&mut self) -> RlcBufferState {
        self.process_status_pdus();
        let mut pending = 0usize;
        if self.status_provider.status_report_required() {
            pending += self.status_provider.status_pdu_length();
        }
        pending += self.retx_bytes();
        if let Some(info) = self.sn_under_segmentation.and_then(|sn| self.tx_window.get(sn)) {
            pending += info.sdu.len() - info.next_so + self.head_max;
        }
        let queued = self.queue.state();
        pending += queued.n_bytes as usize + queued.n_sdus as usize * self.head_min;
        RlcBufferState {
            pending_bytes: pending as u32,
            hol_toa: self.hol_toa(),
        }
    }
}

impl RlcTxEntity for RlcTxAmEntity {
    fn update_mac_buffer_state(&mut self) {
        let bs = self.get_buffer_state();
        self.signal.publish(bs);
    }

    fn handle_timer_expiry(&mut self, timer_id: TimerId) -> bool {
        if timer_id != self.poll_retransmit_timer.id() {
            return false;
        }
        if !self.stopped {
            self.on_poll_retransmit_expiry();
        }
        true
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.upper.stop();
        self.poll_retransmit_timer.stop();
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
