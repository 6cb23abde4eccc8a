//! RLC AM receiving entity (TS 38.322 clause 5.2.3.2)
//!
//! Besides reassembly the receiver builds the status reports that the
//! co-located transmitter sends, and forwards status PDUs received from the
//! peer to that transmitter.

use super::config::{RlcAmSnSize, RlcRxAmConfig};
use super::metrics::RlcRxMetrics;
use super::pdu::{is_control_pdu, RlcAmPduHeader};
use super::segments::SduSegments;
use super::status::{RlcAmStatusNack, RlcAmStatusPdu};
use super::tx_upper::BufferStateSignal;
use super::RlcRxEntity;
use crate::observer::{noop_observer, PduDirection, ProtocolObserver};
use bytes::Bytes;
use common::sn::{cardinality, mod_base, window_size};
use common::{RbId, SduWindow, TimerId, TimerManager, UeIndex, UniqueTimer};
use interfaces::channel::NotificationSender;
use interfaces::rlc::{RlcRxLowerLayerInterface, RlcRxUpperLayerDataNotifier};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Status report of the receiver, read by the transmitter of the same bearer
pub(crate) struct RxAmStatusProvider {
    status: Mutex<RlcAmStatusPdu>,
    status_size: AtomicUsize,
    do_status: AtomicBool,
    /// t-StatusProhibit, started when the transmitter takes a report
    prohibit_timer: UniqueTimer,
}

impl RxAmStatusProvider {
    pub(crate) fn new(cfg: &RlcRxAmConfig, timers: &TimerManager) -> Self {
        let prohibit_timer = timers.create_timer();
        if cfg.t_status_prohibit > 0 {
            prohibit_timer.set(Duration::from_millis(u64::from(cfg.t_status_prohibit)));
        }
        let status = RlcAmStatusPdu::new(cfg.sn_field_length);
        Self {
            status_size: AtomicUsize::new(status.packed_size()),
            status: Mutex::new(status),
            do_status: AtomicBool::new(false),
            prohibit_timer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RlcAmStatusPdu> {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn status_report_required(&self) -> bool {
        self.do_status.load(Ordering::Acquire) && !self.prohibit_timer.is_running()
    }

    pub(crate) fn status_pdu_length(&self) -> usize {
        self.status_size.load(Ordering::Relaxed)
    }

    /// Take the current report, clear the trigger and start t-StatusProhibit
    pub(crate) fn take_status_pdu(&self) -> RlcAmStatusPdu {
        let status = self.lock().clone();
        self.do_status.store(false, Ordering::Release);
        self.prohibit_timer.run();
        status
    }

    fn publish(&self, status: RlcAmStatusPdu) {
        self.status_size.store(status.packed_size(), Ordering::Relaxed);
        *self.lock() = status;
    }

    fn trigger(&self) {
        self.do_status.store(true, Ordering::Release);
    }

    fn is_triggered(&self) -> bool {
        self.do_status.load(Ordering::Acquire)
    }
}

/// Rx state variables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RlcRxAmState {
    /// Lower edge of the receive window
    pub rx_next: u32,
    /// SN following the one that started t-Reassembly
    pub rx_next_status_trigger: u32,
    /// Highest SN that may be reported as ACK_SN
    pub rx_highest_status: u32,
    /// SN following the highest SN received
    pub rx_next_highest: u32,
}

#[derive(Debug, Default)]
struct RlcRxAmSduInfo {
    segments: SduSegments,
    fully_received: bool,
    has_gap: bool,
}

pub struct RlcRxAmEntity {
    ue_index: UeIndex,
    rb_id: RbId,
    cfg: RlcRxAmConfig,
    modulus: u32,
    window: u32,
    max_sn_per_status: u32,
    st: RlcRxAmState,
    rx_window: SduWindow<RlcRxAmSduInfo>,
    reassembly_timer: UniqueTimer,
    status_provider: Arc<RxAmStatusProvider>,
    /// Status PDUs of the peer, consumed by our transmitter
    status_tx: NotificationSender<RlcAmStatusPdu>,
    signal: Arc<BufferStateSignal>,
    upper_dn: Arc<dyn RlcRxUpperLayerDataNotifier>,
    observer: Arc<dyn ProtocolObserver>,
    metrics: RlcRxMetrics,
    stopped: bool,
}

impl RlcRxAmEntity {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        ue_index: UeIndex,
        rb_id: RbId,
        cfg: RlcRxAmConfig,
        status_provider: Arc<RxAmStatusProvider>,
        status_tx: NotificationSender<RlcAmStatusPdu>,
        upper_dn: Arc<dyn RlcRxUpperLayerDataNotifier>,
        signal: Arc<BufferStateSignal>,
        timers: &TimerManager,
    ) -> Self {
        let sn_bits = cfg.sn_field_length.bits();
        let window = window_size(sn_bits);
        let reassembly_timer = timers.create_timer();
        reassembly_timer.set(Duration::from_millis(u64::from(cfg.t_reassembly)));
        info!(
            "ue={} {} UL: RLC AM Rx configured: sn_size={} t_reassembly={} t_status_prohibit={} max_sn_per_status={:?}",
            ue_index, rb_id, sn_bits, cfg.t_reassembly, cfg.t_status_prohibit, cfg.max_sn_per_status
        );
        Self {
            ue_index,
            rb_id,
            modulus: cardinality(sn_bits),
            window,
            max_sn_per_status: cfg.max_sn_per_status.unwrap_or(window),
            st: RlcRxAmState::default(),
            rx_window: SduWindow::new(window as usize),
            reassembly_timer,
            status_provider,
            status_tx,
            signal,
            upper_dn,
            observer: noop_observer(),
            metrics: RlcRxMetrics::default(),
            stopped: false,
            cfg,
        }
    }

    pub fn state(&self) -> RlcRxAmState {
        self.st
    }

    pub fn is_reassembly_timer_running(&self) -> bool {
        self.reassembly_timer.is_running()
    }

    fn sn_size(&self) -> RlcAmSnSize {
        self.cfg.sn_field_length
    }

    fn rx_mod_base(&self, sn: u32) -> u32 {
        mod_base(sn, self.st.rx_next, self.modulus)
    }

    fn inside_rx_window(&self, sn: u32) -> bool {
        self.rx_mod_base(sn) < self.window
    }

    fn next_sn(&self, sn: u32) -> u32 {
        (sn + 1) % self.modulus
    }

    fn is_fully_received(&self, sn: u32) -> bool {
        self.rx_window.get(sn).is_some_and(|info| info.fully_received)
    }

    fn has_gap(&self, sn: u32) -> bool {
        self.rx_window.get(sn).is_some_and(|info| info.has_gap)
    }

    /// First SN at or after `from` that is not fully received
    fn first_missing_from(&self, from: u32) -> u32 {
        let mut sn = from;
        while self.is_fully_received(sn) {
            sn = self.next_sn(sn);
        }
        sn
    }

    fn handle_control_pdu(&mut self, pdu: Bytes) {
        self.metrics.num_ctrl_pdus += 1;
        match RlcAmStatusPdu::unpack(&pdu, self.sn_size()) {
            Ok(status) => {
                debug!("ue={} {} UL: RX status PDU. {}", self.ue_index, self.rb_id, status);
                if self.status_tx.send(status).is_err() {
                    warn!(
                        "ue={} {} UL: Dropping status PDU. Transmitter is gone",
                        self.ue_index, self.rb_id
                    );
                    return;
                }
                self.signal.changed();
            }
            Err(e) => {
                warn!(
                    "ue={} {} UL: Failed to unpack status PDU: {}. pdu_len={}",
                    self.ue_index,
                    self.rb_id,
                    e,
                    pdu.len()
                );
                self.metrics.num_malformed_pdus += 1;
            }
        }
    }

    fn handle_data_pdu(&mut self, header: RlcAmPduHeader, payload: Bytes) {
        let sn = header.sn;
        if header.p {
            info!(
                "ue={} {} UL: Status report requested through polling bit. sn={}",
                self.ue_index, self.rb_id, sn
            );
            self.status_provider.trigger();
        }

        if !self.inside_rx_window(sn) {
            info!(
                "ue={} {} UL: Discarding PDU outside the Rx window. sn={} {:?}",
                self.ue_index, self.rb_id, sn, self.st
            );
            self.metrics.num_lost_pdus += 1;
            self.refresh_status_if_triggered();
            return;
        }
        if self.is_fully_received(sn) {
            info!(
                "ue={} {} UL: Discarding duplicate PDU. sn={}",
                self.ue_index, self.rb_id, sn
            );
            self.metrics.num_lost_pdus += 1;
            self.refresh_status_if_triggered();
            return;
        }

        if !self.rx_window.has_sn(sn) {
            self.rx_window.add_sn(sn);
        }
        let mut sdu = None;
        if let Some(info) = self.rx_window.get_mut(sn) {
            if !info.segments.insert(header.si, u32::from(header.so), payload) {
                debug!(
                    "ue={} {} UL: Segment carries no new bytes. {}",
                    self.ue_index, self.rb_id, header
                );
            }
            info.fully_received = info.segments.fully_received();
            info.has_gap = info.segments.has_gap();
            if info.fully_received {
                // the marker stays until RX_Next passes, the bytes go upstream
                sdu = Some(std::mem::take(&mut info.segments).reassemble());
                info.has_gap = false;
            }
        }

        if self.rx_mod_base(sn) >= self.rx_mod_base(self.st.rx_next_highest) {
            self.st.rx_next_highest = self.next_sn(sn);
        }

        if let Some(sdu) = sdu {
            debug!("ue={} {} UL: RX SDU. sn={} sdu_len={}", self.ue_index, self.rb_id, sn, sdu.len());
            self.metrics.add_sdu(sdu.len());
            self.upper_dn.on_new_sdu(sdu);

            if sn == self.st.rx_highest_status {
                self.st.rx_highest_status = self.first_missing_from(sn);
            }
            if sn == self.st.rx_next {
                let mut next = sn;
                while self.is_fully_received(next) {
                    self.rx_window.remove_sn(next);
                    next = self.next_sn(next);
                }
                self.st.rx_next = next;
            }
        }

        self.update_reassembly_timer();
        self.refresh_status_if_triggered();
    }

    fn update_reassembly_timer(&mut self) {
        let rx_next = self.st.rx_next;
        if self.reassembly_timer.is_running() {
            let trigger = self.st.rx_next_status_trigger;
            let at_rx_next = trigger == rx_next;
            let window_end = (rx_next + self.window) % self.modulus;
            let outside = !self.inside_rx_window(trigger) && trigger != window_end;
            let only_tail_missing = trigger == self.next_sn(rx_next) && !self.has_gap(rx_next);
            if at_rx_next || outside || only_tail_missing {
                debug!(
                    "ue={} {} UL: Stopping t-Reassembly. {:?}",
                    self.ue_index, self.rb_id, self.st
                );
                self.reassembly_timer.stop();
            }
        }
        if !self.reassembly_timer.is_running() {
            let next = self.next_sn(rx_next);
            let rx_next_highest = self.st.rx_next_highest;
            if self.rx_mod_base(rx_next_highest) > self.rx_mod_base(next)
                || (rx_next_highest == next && self.has_gap(rx_next))
            {
                self.st.rx_next_status_trigger = rx_next_highest;
                self.reassembly_timer.run();
                debug!(
                    "ue={} {} UL: Started t-Reassembly. {:?}",
                    self.ue_index, self.rb_id, self.st
                );
            }
        }
    }

    fn on_reassembly_expiry(&mut self) {
        if !self.reassembly_timer.has_expired() {
            debug!("ue={} {} UL: Ignoring stale t-Reassembly expiry", self.ue_index, self.rb_id);
            return;
        }
        self.reassembly_timer.stop();
        self.metrics.num_reassembly_timeouts += 1;
        info!(
            "ue={} {} UL: t-Reassembly expired. {:?}",
            self.ue_index, self.rb_id, self.st
        );

        let trigger = self.st.rx_next_status_trigger;
        if self.rx_mod_base(trigger) > self.window {
            error!(
                "ue={} {} UL: rx_next_status_trigger outside the Rx window. {:?}",
                self.ue_index, self.rb_id, self.st
            );
            return;
        }
        self.st.rx_highest_status = self.first_missing_from(trigger);

        let highest_status = self.st.rx_highest_status;
        let next = self.next_sn(highest_status);
        let rx_next_highest = self.st.rx_next_highest;
        if self.rx_mod_base(rx_next_highest) > self.rx_mod_base(next)
            || (rx_next_highest == next && self.has_gap(highest_status))
        {
            self.st.rx_next_status_trigger = rx_next_highest;
            self.reassembly_timer.run();
        }

        self.status_provider.trigger();
        self.refresh_status_if_triggered();
    }

    /// Build the status report for the current window (TS 38.322 clause 5.3.4)
    fn build_status(&self) -> RlcAmStatusPdu {
        let mut status = RlcAmStatusPdu::new(self.sn_size());
        let stop_sn = self.st.rx_highest_status;
        let mut sn = self.st.rx_next;
        let mut visited = 0;
        while self.rx_mod_base(sn) < self.rx_mod_base(stop_sn) && visited < self.max_sn_per_status {
            match self.rx_window.get(sn) {
                None => status.push_nack(RlcAmStatusNack::whole_sdu(sn)),
                Some(info) if !info.fully_received => {
                    for (so_start, so_end) in info.segments.missing_ranges() {
                        status.push_nack(RlcAmStatusNack::segment(sn, so_start, so_end));
                    }
                }
                Some(_) => {}
            }
            sn = self.next_sn(sn);
            visited += 1;
        }
        status.ack_sn = sn;
        status
    }

    fn refresh_status_if_triggered(&mut self) {
        if !self.status_provider.is_triggered() {
            return;
        }
        let status = self.build_status();
        debug!("ue={} {} UL: Status report refreshed. {}", self.ue_index, self.rb_id, status);
        self.status_provider.publish(status);
        if self.status_provider.status_report_required() {
            self.signal.changed();
        }
    }
}

impl RlcRxLowerLayerInterface for RlcRxAmEntity {
    fn handle_pdu(&mut self, pdu: Bytes) {
        if self.stopped {
            return;
        }
        self.metrics.add_pdu(pdu.len());
        self.observer
            .on_rlc_pdu(self.ue_index, self.rb_id, PduDirection::Rx, &pdu);

        if pdu.is_empty() {
            warn!("ue={} {} UL: Dropping empty PDU", self.ue_index, self.rb_id);
            self.metrics.num_malformed_pdus += 1;
            return;
        }
        if is_control_pdu(&pdu) {
            self.handle_control_pdu(pdu);
            return;
        }

        let (header, header_len) = match RlcAmPduHeader::parse(&pdu, self.sn_size()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(
                    "ue={} {} UL: Failed to unpack header: {}. pdu_len={}",
                    self.ue_index,
                    self.rb_id,
                    e,
                    pdu.len()
                );
                self.metrics.num_malformed_pdus += 1;
                return;
            }
        };
        let payload = pdu.slice(header_len..);
        if payload.is_empty() {
            warn!("ue={} {} UL: Dropping PDU without payload. {}", self.ue_index, self.rb_id, header);
            self.metrics.num_malformed_pdus += 1;
            return;
        }
        debug!(
            "ue={} {} UL: RX PDU. {} pdu_len={}",
            self.ue_index,
            self.rb_id,
            header,
            pdu.len()
        );
        self.handle_data_pdu(header, payload);
    }
}

impl RlcRxEntity for RlcRxAmEntity {
    fn handle_timer_expiry(&mut self, timer_id: TimerId) -> bool {
        if timer_id == self.reassembly_timer.id() {
            if !self.stopped {
                self.on_reassembly_expiry();
            }
            return true;
        }
        if timer_id == self.status_provider.prohibit_timer.id() {
            if !self.stopped && self.status_provider.is_triggered() {
                debug!("ue={} {} UL: t-StatusProhibit expired", self.ue_index, self.rb_id);
                self.refresh_status_if_triggered();
            }
            return true;
        }
        false
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.reassembly_timer.stop();
        self.status_provider.prohibit_timer.stop();
    }

    fn metrics(&self) -> RlcRxMetrics {
        self.metrics.clone()
    }

    fn reset_metrics(&mut self) {
        self.metrics = RlcRxMetrics::default();
    }

    fn set_observer(&mut self, observer: Arc<dyn ProtocolObserver>) {
        self.observer = observer;
    }
}
