//! RLC UM receiving entity (TS 38.322 clause 5.2.2.2)

use super::config::RlcRxUmConfig;
use super::metrics::RlcRxMetrics;
use super::pdu::{RlcSiField, RlcUmPduHeader};
use super::segments::SduSegments;
use super::RlcRxEntity;
use crate::observer::{noop_observer, PduDirection, ProtocolObserver};
use bytes::Bytes;
use common::sn::{cardinality, mod_base, window_size};
use common::{RbId, SduWindow, TimerId, TimerManager, UeIndex, UniqueTimer};
use interfaces::rlc::{RlcRxLowerLayerInterface, RlcRxUpperLayerDataNotifier};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Rx state variables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RlcRxUmState {
    /// Earliest SN still considered for reassembly
    pub rx_next_reassembly: u32,
    /// SN following the one that started t-Reassembly
    pub rx_timer_trigger: u32,
    /// SN following the highest SN received
    pub rx_next_highest: u32,
}

#[derive(Debug, Default)]
struct RlcRxUmSduInfo {
    segments: SduSegments,
    /// Reassembled and delivered, kept until RX_Next_Reassembly passes it
    delivered: bool,
}

pub struct RlcRxUmEntity {
    ue_index: UeIndex,
    rb_id: RbId,
    cfg: RlcRxUmConfig,
    modulus: u32,
    window: u32,
    st: RlcRxUmState,
    rx_window: SduWindow<RlcRxUmSduInfo>,
    reassembly_timer: UniqueTimer,
    upper_dn: Arc<dyn RlcRxUpperLayerDataNotifier>,
    observer: Arc<dyn ProtocolObserver>,
    metrics: RlcRxMetrics,
    stopped: bool,
}

impl RlcRxUmEntity {
    pub(crate) fn new(
        ue_index: UeIndex,
        rb_id: RbId,
        cfg: RlcRxUmConfig,
        upper_dn: Arc<dyn RlcRxUpperLayerDataNotifier>,
        timers: &TimerManager,
    ) -> Self {
        let sn_bits = cfg.sn_field_length.bits();
        let reassembly_timer = timers.create_timer();
        reassembly_timer.set(Duration::from_millis(u64::from(cfg.t_reassembly)));
        info!(
            "ue={} {} UL: RLC UM Rx configured: sn_size={} t_reassembly={}",
            ue_index, rb_id, sn_bits, cfg.t_reassembly
        );
        Self {
            ue_index,
            rb_id,
            modulus: cardinality(sn_bits),
            window: window_size(sn_bits),
            st: RlcRxUmState::default(),
            rx_window: SduWindow::new(window_size(sn_bits) as usize),
            reassembly_timer,
            upper_dn,
            observer: noop_observer(),
            metrics: RlcRxMetrics::default(),
            stopped: false,
            cfg,
        }
    }

    pub fn state(&self) -> RlcRxUmState {
        self.st
    }

    pub fn is_reassembly_timer_running(&self) -> bool {
        self.reassembly_timer.is_running()
    }

    /// Distance from the lower edge of the reassembly window
    fn rx_mod_base(&self, sn: u32) -> u32 {
        let base = self.st.rx_next_highest.wrapping_add(self.modulus - self.window) % self.modulus;
        mod_base(sn, base, self.modulus)
    }

    fn inside_reassembly_window(&self, sn: u32) -> bool {
        self.rx_mod_base(sn) < self.window
    }

    fn next_sn(&self, sn: u32) -> u32 {
        (sn + 1) % self.modulus
    }

    fn is_delivered(&self, sn: u32) -> bool {
        self.rx_window.get(sn).is_some_and(|info| info.delivered)
    }

    /// A byte is missing before the last received byte of `sn`
    fn has_gap(&self, sn: u32) -> bool {
        self.rx_window
            .get(sn)
            .is_some_and(|info| !info.delivered && info.segments.has_gap())
    }

    fn deliver_sdu(&mut self, sdu: Bytes) {
        debug!("ue={} {} UL: RX SDU. sdu_len={}", self.ue_index, self.rb_id, sdu.len());
        self.metrics.add_sdu(sdu.len());
        self.upper_dn.on_new_sdu(sdu);
    }

    /// Move RX_Next_Reassembly to the first SN at or after `from` that was not delivered
    fn advance_rx_next_reassembly(&mut self, from: u32) {
        let mut sn = from;
        while self.is_delivered(sn) {
            self.rx_window.remove_sn(sn);
            sn = self.next_sn(sn);
        }
        self.st.rx_next_reassembly = sn;
    }

    /// Drop every stored SN with `rx_mod_base` below `limit`
    fn discard_below(&mut self, limit: u32) {
        let stale: Vec<u32> = self
            .rx_window
            .iter()
            .map(|(sn, _)| sn)
            .filter(|sn| self.rx_mod_base(*sn) < limit)
            .collect();
        for sn in stale {
            if let Some(info) = self.rx_window.remove_sn(sn) {
                if !info.delivered {
                    self.metrics.num_lost_pdus += 1;
                }
            }
        }
    }

    fn handle_data_pdu(&mut self, header: RlcUmPduHeader, payload: Bytes) {
        let sn = header.sn;
        if self.rx_mod_base(sn) < self.rx_mod_base(self.st.rx_next_reassembly) {
            info!(
                "ue={} {} UL: Discarding PDU below RX_Next_Reassembly. sn={} {:?}",
                self.ue_index, self.rb_id, sn, self.st
            );
            self.metrics.num_lost_pdus += 1;
            return;
        }

        if !self.inside_reassembly_window(sn) {
            self.st.rx_next_highest = self.next_sn(sn);
            // everything now behind the window
            let outside: Vec<u32> = self
                .rx_window
                .iter()
                .map(|(s, _)| s)
                .filter(|s| !self.inside_reassembly_window(*s))
                .collect();
            for s in outside {
                if let Some(info) = self.rx_window.remove_sn(s) {
                    if !info.delivered {
                        self.metrics.num_lost_pdus += 1;
                    }
                }
            }
            if !self.inside_reassembly_window(self.st.rx_next_reassembly) {
                let lower_edge =
                    self.st.rx_next_highest.wrapping_add(self.modulus - self.window) % self.modulus;
                self.advance_rx_next_reassembly(lower_edge);
            }
        }

        if self.is_delivered(sn) {
            debug!("ue={} {} UL: Duplicate PDU of delivered SDU. sn={}", self.ue_index, self.rb_id, sn);
            self.metrics.num_lost_pdus += 1;
            return;
        }
        if !self.rx_window.has_sn(sn) {
            self.rx_window.add_sn(sn);
        }
        let complete = match self.rx_window.get_mut(sn) {
            Some(info) => {
                if !info.segments.insert(header.si, u32::from(header.so), payload) {
                    debug!("ue={} {} UL: Duplicate segment. {}", self.ue_index, self.rb_id, header);
                }
                info.segments.fully_received()
            }
            None => false,
        };

        if complete {
            let sdu = match self.rx_window.get_mut(sn) {
                Some(info) => {
                    info.delivered = true;
                    std::mem::take(&mut info.segments).reassemble()
                }
                None => return,
            };
            self.deliver_sdu(sdu);
            if sn == self.st.rx_next_reassembly {
                self.advance_rx_next_reassembly(sn);
            }
        }

        self.update_reassembly_timer();
    }

    fn update_reassembly_timer(&mut self) {
        let rx_next_reassembly = self.st.rx_next_reassembly;
        let rx_next_highest = self.st.rx_next_highest;
        if self.reassembly_timer.is_running() {
            let trigger = self.st.rx_timer_trigger;
            let behind = self.rx_mod_base(trigger) <= self.rx_mod_base(rx_next_reassembly);
            let outside = !self.inside_reassembly_window(trigger) && trigger != rx_next_highest;
            let only_tail_missing = rx_next_highest == self.next_sn(rx_next_reassembly)
                && !self.has_gap(rx_next_reassembly);
            if behind || outside || only_tail_missing {
                debug!(
                    "ue={} {} UL: Stopping t-Reassembly. {:?}",
                    self.ue_index, self.rb_id, self.st
                );
                self.reassembly_timer.stop();
            }
        }
        if !self.reassembly_timer.is_running() {
            self.maybe_start_reassembly_timer();
        }
    }

    fn maybe_start_reassembly_timer(&mut self) {
        let rx_next_reassembly = self.st.rx_next_reassembly;
        let rx_next_highest = self.st.rx_next_highest;
        let next = self.next_sn(rx_next_reassembly);
        if self.rx_mod_base(rx_next_highest) > self.rx_mod_base(next)
            || (rx_next_highest == next && self.has_gap(rx_next_reassembly))
        {
            self.st.rx_timer_trigger = rx_next_highest;
            self.reassembly_timer.run();
            debug!(
                "ue={} {} UL: Started t-Reassembly. {:?}",
                self.ue_index, self.rb_id, self.st
            );
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

        // first SN >= RX_Timer_Trigger not yet reassembled
        let trigger = self.st.rx_timer_trigger;
        self.advance_rx_next_reassembly(trigger);
        let limit = self.rx_mod_base(self.st.rx_next_reassembly);
        self.discard_below(limit);

        self.maybe_start_reassembly_timer();
    }
}

impl RlcRxLowerLayerInterface for RlcRxUmEntity {
    fn handle_pdu(&mut self, pdu: Bytes) {
        if self.stopped {
            return;
        }
        self.metrics.add_pdu(pdu.len());
        self.observer
            .on_rlc_pdu(self.ue_index, self.rb_id, PduDirection::Rx, &pdu);

        let (header, header_len) = match RlcUmPduHeader::parse(&pdu, self.cfg.sn_field_length) {
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

        if header.si == RlcSiField::FullSdu {
            self.deliver_sdu(payload);
            return;
        }
        self.handle_data_pdu(header, payload);
    }
}

impl RlcRxEntity for RlcRxUmEntity {
    fn handle_timer_expiry(&mut self, timer_id: TimerId) -> bool {
        if timer_id != self.reassembly_timer.id() {
            return false;
        }
        if !self.stopped {
            self.on_reassembly_expiry();
        }
        true
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.reassembly_timer.stop();
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

#[cfg(test)]
mod tests {
    use super::super::config::RlcUmSnSize;
    use super::super::test_utils::MockRlcNotifier;
    use super::*;

    fn entity(timers: &TimerManager) -> (RlcRxUmEntity, Arc<MockRlcNotifier>) {
        let mock = Arc::new(MockRlcNotifier::default());
        let cfg = RlcRxUmConfig {
            sn_field_length: RlcUmSnSize::Size6,
            t_reassembly: 5,
        };
        let rx = RlcRxUmEntity::new(UeIndex(0), RbId::Drb(1), cfg, mock.clone(), timers);
        (rx, mock)
    }

    /// 6-bit SN segment PDU
    fn segment(si: RlcSiField, sn: u32, so: u16, payload: &[u8]) -> Bytes {
        let header = RlcUmPduHeader {
            si,
            sn_size: RlcUmSnSize::Size6,
            sn,
            so,
        };
        let mut buf = vec![0u8; header.packed_size()];
        header.write(&mut buf);
        buf.extend_from_slice(payload);
        Bytes::from(buf)
    }

    fn tick(rx: &mut RlcRxUmEntity, timers: &TimerManager, n: usize) {
        for _ in 0..n {
            for id in timers.tick() {
                rx.handle_timer_expiry(id);
            }
        }
    }

    #[test]
    fn test_full_sdu_delivered_immediately() {
        let timers = TimerManager::new();
        let (mut rx, mock) = entity(&timers);
        rx.handle_pdu(Bytes::from_static(&[0x00, 0xaa, 0xbb]));
        assert_eq!(mock.take_sdus(), vec![Bytes::from_static(&[0xaa, 0xbb])]);
        assert_eq!(rx.state(), RlcRxUmState::default());
    }

    #[test]
    fn test_out_of_order_segments() {
        let timers = TimerManager::new();
        let (mut rx, mock) = entity(&timers);
        rx.handle_pdu(segment(RlcSiField::LastSegment, 0, 3, b"def"));
        assert_eq!(rx.state().rx_next_highest, 1);
        assert!(rx.is_reassembly_timer_running());
        rx.handle_pdu(segment(RlcSiField::FirstSegment, 0, 0, b"abc"));
        assert_eq!(mock.take_sdus(), vec![Bytes::from_static(b"abcdef")]);
        assert_eq!(rx.state().rx_next_reassembly, 1);
        assert!(!rx.is_reassembly_timer_running());
    }

    #[test]
    fn test_reassembly_timeout_skips_incomplete_sdu() {
        let timers = TimerManager::new();
        let (mut rx, mock) = entity(&timers);
        rx.handle_pdu(segment(RlcSiField::FirstSegment, 0, 0, b"ab"));
        rx.handle_pdu(segment(RlcSiField::FirstSegment, 1, 0, b"xy"));
        rx.handle_pdu(segment(RlcSiField::LastSegment, 1, 2, b"z"));
        assert_eq!(mock.take_sdus(), vec![Bytes::from_static(b"xyz")]);
        assert_eq!(rx.state().rx_next_reassembly, 0);
        assert!(rx.is_reassembly_timer_running());

        tick(&mut rx, &timers, 5);
        assert_eq!(rx.metrics().num_reassembly_timeouts, 1);
        assert_eq!(rx.state().rx_next_reassembly, 2);
        assert_eq!(rx.metrics().num_lost_pdus, 1);
        assert!(!rx.is_reassembly_timer_running());

        // late segment of the skipped SDU
        rx.handle_pdu(segment(RlcSiField::LastSegment, 0, 2, b"c"));
        assert!(mock.take_sdus().is_empty());
        assert_eq!(rx.metrics().num_lost_pdus, 2);
    }

    #[test]
    fn test_window_moves_with_far_sn() {
        let timers = TimerManager::new();
        let (mut rx, _mock) = entity(&timers);
        rx.handle_pdu(segment(RlcSiField::FirstSegment, 0, 0, b"a"));
        // window is 32 SNs, SN 32 pushes SN 0 out
        rx.handle_pdu(segment(RlcSiField::FirstSegment, 32, 0, b"b"));
        assert_eq!(rx.state().rx_next_highest, 33);
        assert_eq!(rx.state().rx_next_reassembly, 1);
        assert_eq!(rx.metrics().num_lost_pdus, 1);
        assert!(rx.is_reassembly_timer_running());
    }

    #[test]
    fn test_malformed_pdus() {
        let timers = TimerManager::new();
        let (mut rx, mock) = entity(&timers);
        rx.handle_pdu(Bytes::new());
        rx.handle_pdu(Bytes::from_static(&[0x00]));
        // last segment truncated inside SO
        rx.handle_pdu(Bytes::from_static(&[0x81, 0x00]));
        assert_eq!(rx.metrics().num_malformed_pdus, 3);
        assert!(mock.take_sdus().is_empty());
    }
}
