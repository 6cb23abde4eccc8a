//! PDCP transmitting entity (TS 38.323 clause 5.2.1)

use super::config::{PdcpDiscardTimer, PdcpRbType, PdcpRlcMode, PdcpTxConfig};
use super::metrics::PdcpTxMetrics;
use super::pdu::{write_data_pdu_header, PdcpStatusReport};
use super::validate_security_config;
use crate::observer::{noop_observer, PduDirection, ProtocolObserver};
use crate::security::{Sec128AsConfig, SecurityEngine, SecurityEngineTx, SecurityError, MAC_I_LEN};
use crate::LayerError;
use bytes::{BufMut, Bytes, BytesMut};
use common::sn::{cardinality, estimate_count, sn_of, window_size};
use common::{RbId, SduWindow, TimerId, TimerManager, UeIndex, UniqueTimer};
use interfaces::pdcp::{PdcpTxLowerNotifier, PdcpTxUpperControlNotifier};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tx state variables, all holding COUNT values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PdcpTxState {
    /// COUNT of the next SDU to be transmitted
    pub tx_next: u32,
    /// COUNT of the first PDU not yet handed over the air by the lower layer
    pub tx_trans: u32,
    /// COUNT of the first PDU not yet acknowledged (or discarded)
    pub tx_next_ack: u32,
}

#[derive(Debug)]
struct PdcpTxSduInfo {
    /// Plaintext kept for retransmission (AM only)
    sdu: Option<Bytes>,
    discard_timer: Option<UniqueTimer>,
}

pub struct PdcpEntityTx {
    ue_index: UeIndex,
    rb_id: RbId,
    cfg: PdcpTxConfig,
    sn_bits: u32,
    hdr_len: usize,
    st: PdcpTxState,
    tx_window: SduWindow<PdcpTxSduInfo>,
    timers: TimerManager,
    /// Discard timer id to the COUNT it guards
    discard_timers: HashMap<TimerId, u32>,

    sec_engine: Option<Box<dyn SecurityEngineTx>>,
    integrity_enabled: bool,
    ciphering_enabled: bool,

    max_count_notified: bool,
    max_count_overflow: bool,

    lower_dn: Arc<dyn PdcpTxLowerNotifier>,
    upper_cn: Arc<dyn PdcpTxUpperControlNotifier>,
    observer: Arc<dyn ProtocolObserver>,
    metrics: PdcpTxMetrics,
}

impl PdcpEntityTx {
    pub fn new(
        ue_index: UeIndex,
        rb_id: RbId,
        cfg: PdcpTxConfig,
        lower_dn: Arc<dyn PdcpTxLowerNotifier>,
        upper_cn: Arc<dyn PdcpTxUpperControlNotifier>,
        timers: &TimerManager,
    ) -> Result<Self, LayerError> {
        cfg.validate()?;
        let sn_bits = cfg.sn_size.bits();
        info!(
            "ue={} {} DL: PDCP Tx configured: sn_size={} discard_timer={:?} mode={:?}",
            ue_index, rb_id, sn_bits, cfg.discard_timer, cfg.rlc_mode
        );

        Ok(Self {
            ue_index,
            rb_id,
            hdr_len: cfg.sn_size.header_len(),
            sn_bits,
            st: PdcpTxState::default(),
            tx_window: SduWindow::new(window_size(sn_bits) as usize),
            timers: timers.clone(),
            discard_timers: HashMap::new(),
            sec_engine: None,
            integrity_enabled: false,
            ciphering_enabled: false,
            max_count_notified: false,
            max_count_overflow: false,
            lower_dn,
            upper_cn,
            observer: noop_observer(),
            metrics: PdcpTxMetrics::default(),
            cfg,
        })
    }

    pub fn set_observer(&mut self, observer: Arc<dyn ProtocolObserver>) {
        self.observer = observer;
    }

    pub fn state(&self) -> PdcpTxState {
        self.st
    }

    pub fn set_state(&mut self, st: PdcpTxState) {
        self.st = st;
    }

    pub fn metrics(&self) -> &PdcpTxMetrics {
        &self.metrics
    }

    pub fn reset_metrics(&mut self) {
        self.metrics = PdcpTxMetrics::default();
    }

    pub fn status_report_required(&self) -> bool {
        self.cfg.status_report_required
    }

    /// Number of SDUs held in the Tx window
    pub fn nof_pdus_in_window(&self) -> usize {
        self.tx_window.len()
    }

    fn is_srb(&self) -> bool {
        self.cfg.rb_type == PdcpRbType::Srb
    }

    fn is_am(&self) -> bool {
        self.cfg.rlc_mode == PdcpRlcMode::Am
    }

    fn log_drop(&self, reason: &str) {
        if self.cfg.custom.warn_on_drop {
            warn!(
                "ue={} {} DL: Dropping SDU: {}. {:?}",
                self.ue_index, self.rb_id, reason, self.st
            );
        } else {
            info!(
                "ue={} {} DL: Dropping SDU: {}. {:?}",
                self.ue_index, self.rb_id, reason, self.st
            );
        }
    }

    pub fn handle_sdu(&mut self, sdu: Bytes) {
        self.metrics.add_sdu(sdu.len());

        if self.st.tx_trans > self.st.tx_next {
            error!(
                "ue={} {} DL: Invalid state, tx_trans is larger than tx_next. {:?}",
                self.ue_index, self.rb_id, self.st
            );
            self.metrics.num_dropped_sdus += 1;
            return;
        }
        let in_flight = self.st.tx_next - self.st.tx_trans;
        if in_flight >= self.cfg.custom.rlc_sdu_queue {
            self.log_drop("RLC SDU queue is full");
            self.metrics.num_dropped_sdus += 1;
            return;
        }
        if in_flight >= window_size(self.sn_bits) - 1 {
            self.log_drop("Tx window is full");
            self.metrics.num_dropped_sdus += 1;
            return;
        }

        let max_count = self.cfg.custom.max_count;
        if self.st.tx_next >= max_count.hard {
            if !self.max_count_overflow {
                error!(
                    "ue={} {} DL: Reached max_count, refusing further TX. count={}",
                    self.ue_index, self.rb_id, self.st.tx_next
                );
                self.upper_cn.on_protocol_failure();
                self.max_count_overflow = true;
            }
            self.metrics.num_dropped_sdus += 1;
            return;
        }
        if self.st.tx_next >= max_count.notify && !self.max_count_notified {
            warn!(
                "ue={} {} DL: Approaching max_count, notifying RRC. count={}",
                self.ue_index, self.rb_id, self.st.tx_next
            );
            self.upper_cn.on_max_count_reached();
            self.max_count_notified = true;
        }

        let count = self.st.tx_next;
        let pdu = match self.build_protected_pdu(&sdu, count) {
            Ok(pdu) => pdu,
            Err(e) => {
                error!(
                    "ue={} {} DL: Could not protect PDU, dropping SDU. count={} error={}",
                    self.ue_index, self.rb_id, count, e
                );
                self.metrics.num_dropped_sdus += 1;
                return;
            }
        };

        if let Some(discard_timer) = self.cfg.discard_timer {
            if let Some(old) = self.tx_window.occupant(count) {
                warn!(
                    "ue={} {} DL: Tx window slot still in use, discarding count={} for count={}",
                    self.ue_index, self.rb_id, old, count
                );
                self.discard_pdu(old);
            }
            let timer = match discard_timer {
                PdcpDiscardTimer::Ms(ms) => {
                    let timer = self.timers.create_timer();
                    timer.set(Duration::from_millis(u64::from(ms)));
                    timer.run();
                    self.discard_timers.insert(timer.id(), count);
                    Some(timer)
                }
                PdcpDiscardTimer::Infinity => None,
            };
            let sdu = if self.is_am() { Some(sdu) } else { None };
            self.tx_window.insert(
                count,
                PdcpTxSduInfo {
                    sdu,
                    discard_timer: timer,
                },
            );
        }

        debug!(
            "ue={} {} DL: TX PDU. pdu_len={} sn={} count={}",
            self.ue_index,
            self.rb_id,
            pdu.len(),
            sn_of(count, self.sn_bits),
            count
        );
        self.write_data_pdu_to_lower_layers(pdu, false);
        self.st.tx_next += 1;

        if self.cfg.custom.test_mode {
            self.handle_transmit_notification(sn_of(count, self.sn_bits));
        }
    }

    fn build_protected_pdu(&self, sdu: &[u8], count: u32) -> Result<Bytes, SecurityError> {
        let mut buf = BytesMut::with_capacity(self.hdr_len + sdu.len() + MAC_I_LEN);
        write_data_pdu_header(&mut buf, self.cfg.rb_type, self.cfg.sn_size, sn_of(count, self.sn_bits));
        buf.put_slice(sdu);

        let buf = match &self.sec_engine {
            Some(engine) => engine.encrypt_and_protect_integrity(buf, self.hdr_len, count)?,
            None => {
                if self.is_srb() {
                    buf.put_bytes(0, MAC_I_LEN);
                }
                buf
            }
        };
        Ok(buf.freeze())
    }

    fn write_data_pdu_to_lower_layers(&mut self, pdu: Bytes, is_retx: bool) {
        self.metrics.add_pdu(pdu.len());
        if is_retx {
            self.metrics.num_retx_pdus += 1;
        }
        self.observer
            .on_pdcp_pdu(self.ue_index, self.rb_id, PduDirection::Tx, &pdu);
        self.lower_dn.on_new_pdu(pdu, is_retx);
    }

    /// Lower edge used to map notified SNs to COUNTs
    fn notification_reference(&self) -> u32 {
        if self.cfg.discard_timer.is_some() {
            self.st.tx_next_ack
        } else {
            self.st.tx_trans
        }
    }

    fn notification_count(&self, notif_sn: u32) -> Option<u32> {
        if notif_sn >= cardinality(self.sn_bits) {
            error!(
                "ue={} {} DL: Invalid notification SN exceeds SN space. sn={}",
                self.ue_index, self.rb_id, notif_sn
            );
            return None;
        }
        Some(estimate_count(self.notification_reference(), notif_sn, self.sn_bits))
    }

    /// All PDUs up to and including `notif_sn` were transmitted by the lower layer
    pub fn handle_transmit_notification(&mut self, notif_sn: u32) {
        let Some(count) = self.notification_count(notif_sn) else {
            return;
        };
        if count < self.st.tx_trans {
            debug!(
                "ue={} {} DL: Ignoring outdated transmit notification. count={} {:?}",
                self.ue_index, self.rb_id, count, self.st
            );
            return;
        }
        if count >= self.st.tx_next {
            error!(
                "ue={} {} DL: Transmit notification for a COUNT that was never sent. count={} {:?}",
                self.ue_index, self.rb_id, count, self.st
            );
            return;
        }
        self.st.tx_trans = count + 1;
        debug!(
            "ue={} {} DL: Transmit notification. count={} {:?}",
            self.ue_index, self.rb_id, count, self.st
        );
        if !self.is_am() {
            self.stop_discard_timer(count);
        }
    }

    /// All PDUs up to and including `notif_sn` were acknowledged by the peer
    pub fn handle_delivery_notification(&mut self, notif_sn: u32) {
        let Some(count) = self.notification_count(notif_sn) else {
            return;
        };
        if count >= self.st.tx_next {
            error!(
                "ue={} {} DL: Delivery notification for a COUNT that was never sent. count={} {:?}",
                self.ue_index, self.rb_id, count, self.st
            );
            return;
        }
        if self.is_am() {
            debug!(
                "ue={} {} DL: Delivery notification. count={} {:?}",
                self.ue_index, self.rb_id, count, self.st
            );
            self.stop_discard_timer(count);
        } else {
            error!(
                "ue={} {} DL: Delivery notification on a UM bearer. count={}",
                self.ue_index, self.rb_id, count
            );
        }
    }

    pub fn handle_retransmit_notification(&mut self, notif_sn: u32) {
        if self.is_srb() || !self.is_am() {
            error!(
                "ue={} {} DL: Retransmit notification is only valid on AM DRBs. sn={}",
                self.ue_index, self.rb_id, notif_sn
            );
            return;
        }
        debug!(
            "ue={} {} DL: Retransmit notification. sn={}",
            self.ue_index, self.rb_id, notif_sn
        );
    }

    pub fn handle_delivery_retransmitted_notification(&mut self, notif_sn: u32) {
        if self.is_srb() || !self.is_am() {
            error!(
                "ue={} {} DL: Delivery of retransmission is only valid on AM DRBs. sn={}",
                self.ue_index, self.rb_id, notif_sn
            );
            return;
        }
        debug!(
            "ue={} {} DL: Delivery retransmitted notification. sn={}",
            self.ue_index, self.rb_id, notif_sn
        );
    }

    /// Apply a status report received from the peer (TS 38.323 clause 5.4.2)
    pub fn handle_status_report(&mut self, status: Bytes) {
        let Some(report) = PdcpStatusReport::unpack(&status) else {
            warn!(
                "ue={} {} DL: Malformed status report. len={}",
                self.ue_index,
                self.rb_id,
                status.len()
            );
            return;
        };
        self.metrics.num_status_reports += 1;
        debug!(
            "ue={} {} DL: Status report. fmc={} bitmap_len={}",
            self.ue_index,
            self.rb_id,
            report.fmc,
            report.bitmap.len()
        );

        let end = report.fmc.min(self.st.tx_next);
        for count in self.st.tx_next_ack..end {
            if self.tx_window.has_sn(count) {
                self.discard_pdu(count);
            }
        }

        for (i, received) in report.bitmap.iter().enumerate() {
            let count = report.fmc.wrapping_add(1).wrapping_add(i as u32);
            if count >= self.st.tx_next {
                break;
            }
            if *received && self.tx_window.has_sn(count) {
                self.discard_pdu(count);
            }
        }
    }

    /// Discard a PDU and tell the lower layer. Advances TX_NEXT_ACK when it was the oldest.
    fn discard_pdu(&mut self, count: u32) {
        if count < self.st.tx_next_ack || count >= self.st.tx_next {
            warn!(
                "ue={} {} DL: Discarding PDU outside the Tx window. count={} {:?}",
                self.ue_index, self.rb_id, count, self.st
            );
            return;
        }
        if !self.tx_window.has_sn(count) {
            warn!(
                "ue={} {} DL: Discarding PDU not in the Tx window. count={}",
                self.ue_index, self.rb_id, count
            );
            return;
        }
        debug!("ue={} {} DL: Discarding PDU. count={}", self.ue_index, self.rb_id, count);
        self.lower_dn.on_discard_pdu(sn_of(count, self.sn_bits));
        self.remove_window_entry(count);

        while self.st.tx_next_ack < self.st.tx_next && !self.tx_window.has_sn(self.st.tx_next_ack) {
            self.st.tx_next_ack += 1;
        }
        if self.st.tx_trans < self.st.tx_next_ack {
            self.st.tx_trans = self.st.tx_next_ack;
        }
    }

    fn remove_window_entry(&mut self, count: u32) {
        if let Some(info) = self.tx_window.remove_sn(count) {
            if let Some(timer) = info.discard_timer {
                self.discard_timers.remove(&timer.id());
            }
        }
    }

    /// Stop the discard timers of all PDUs up to and including `highest_count`
    fn stop_discard_timer(&mut self, highest_count: u32) {
        if self.cfg.discard_timer.is_none() {
            return;
        }
        if highest_count < self.st.tx_next_ack || highest_count >= self.st.tx_next {
            debug!(
                "ue={} {} DL: Ignoring stop of discard timers outside the Tx window. count={} {:?}",
                self.ue_index, self.rb_id, highest_count, self.st
            );
            return;
        }
        while self.st.tx_next_ack <= highest_count {
            self.remove_window_entry(self.st.tx_next_ack);
            self.st.tx_next_ack += 1;
        }
        if self.st.tx_trans < self.st.tx_next_ack {
            self.st.tx_trans = self.st.tx_next_ack;
        }
    }

    /// Route an expired timer to this entity. Returns false if the timer is not ours.
    pub fn handle_timer_expiry(&mut self, id: TimerId) -> bool {
        let Some(count) = self.discard_timers.get(&id).copied() else {
            return false;
        };
        debug!(
            "ue={} {} DL: Discard timer expired. count={}",
            self.ue_index, self.rb_id, count
        );
        self.metrics.num_discard_timeouts += 1;
        self.discard_pdu(count);
        true
    }

    /// Drop all state and buffered PDUs
    pub fn reset(&mut self) {
        self.st = PdcpTxState::default();
        self.tx_window.clear();
        self.discard_timers.clear();
        debug!("ue={} {} DL: Entity was reset", self.ue_index, self.rb_id);
    }

    /// Re-establishment (TS 38.323 clause 5.1.2)
    pub fn reestablish(&mut self, sec_cfg: Sec128AsConfig) -> Result<(), LayerError> {
        if self.is_srb() || !self.is_am() {
            self.reset();
        }
        self.configure_security(sec_cfg, self.integrity_enabled, self.ciphering_enabled)?;
        self.max_count_notified = false;
        self.max_count_overflow = false;
        if self.is_am() && !self.is_srb() {
            self.retransmit_all_pdus();
        }
        info!("ue={} {} DL: Re-established", self.ue_index, self.rb_id);
        Ok(())
    }

    /// Data recovery (TS 38.323 clause 5.4). `status_report` is the report of the peer Rx half.
    pub fn data_recovery(&mut self, status_report: Option<Bytes>) -> Result<(), LayerError> {
        if self.is_srb() || !self.is_am() {
            error!(
                "ue={} {} DL: Data recovery is only valid on AM DRBs",
                self.ue_index, self.rb_id
            );
            return Err(LayerError::InvalidState(format!(
                "data recovery on {} which is not an AM DRB",
                self.rb_id
            )));
        }
        info!("ue={} {} DL: Data recovery requested", self.ue_index, self.rb_id);
        if self.cfg.status_report_required {
            match status_report {
                Some(report) => self.send_status_report(report),
                None => warn!(
                    "ue={} {} DL: Status report required but none was compiled",
                    self.ue_index, self.rb_id
                ),
            }
        }
        self.retransmit_all_pdus();
        Ok(())
    }

    /// Forward a control PDU (status report) to the lower layer
    pub fn send_status_report(&mut self, status_report: Bytes) {
        if self.is_srb() {
            error!(
                "ue={} {} DL: Status reports are not supported on SRBs",
                self.ue_index, self.rb_id
            );
            return;
        }
        debug!(
            "ue={} {} DL: Sending status report. len={}",
            self.ue_index,
            self.rb_id,
            status_report.len()
        );
        self.metrics.add_pdu(status_report.len());
        self.lower_dn.on_new_pdu(status_report, false);
    }

    /// Re-protect and resend every SDU still held in the Tx window
    pub fn retransmit_all_pdus(&mut self) {
        if self.cfg.discard_timer.is_none() {
            error!(
                "ue={} {} DL: Cannot retransmit without a discard timer",
                self.ue_index, self.rb_id
            );
            return;
        }
        if !self.is_am() {
            error!(
                "ue={} {} DL: Retransmission is only possible on AM bearers",
                self.ue_index, self.rb_id
            );
            return;
        }

        self.st.tx_trans = self.st.tx_next_ack;
        for count in self.st.tx_next_ack..self.st.tx_next {
            let Some(sdu) = self.tx_window.get(count).and_then(|info| info.sdu.clone()) else {
                continue;
            };
            match self.build_protected_pdu(&sdu, count) {
                Ok(pdu) => {
                    debug!(
                        "ue={} {} DL: RETX PDU. pdu_len={} count={}",
                        self.ue_index,
                        self.rb_id,
                        pdu.len(),
                        count
                    );
                    self.write_data_pdu_to_lower_layers(pdu, true);
                }
                Err(e) => error!(
                    "ue={} {} DL: Could not protect retransmission. count={} error={}",
                    self.ue_index, self.rb_id, count, e
                ),
            }
        }
    }

    pub fn configure_security(
        &mut self,
        sec_cfg: Sec128AsConfig,
        integrity_enabled: bool,
        ciphering_enabled: bool,
    ) -> Result<(), LayerError> {
        validate_security_config(self.rb_id, &sec_cfg, integrity_enabled, ciphering_enabled)?;
        let engine = SecurityEngine::new(
            &sec_cfg,
            self.rb_id.bearer_id(),
            self.cfg.direction,
            integrity_enabled,
            ciphering_enabled,
        )
        .map_err(|e| LayerError::ConfigurationError(e.to_string()))?;

        self.sec_engine = Some(Box::new(engine));
        self.integrity_enabled = integrity_enabled;
        self.ciphering_enabled = ciphering_enabled;
        info!(
            "ue={} {} DL: Security configured: integ_algo={:?} cipher_algo={:?} integrity={} ciphering={}",
            self.ue_index,
            self.rb_id,
            sec_cfg.integ_algo,
            sec_cfg.cipher_algo,
            integrity_enabled,
            ciphering_enabled
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdcp::config::{PdcpConfig, PdcpSnSize};
    use crate::security::{SecurityDirection, SecurityDomain};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        pdus: Mutex<Vec<(Bytes, bool)>>,
        discards: Mutex<Vec<u32>>,
        protocol_failures: Mutex<u32>,
        max_count: Mutex<u32>,
    }

    impl PdcpTxLowerNotifier for Recorder {
        fn on_new_pdu(&self, pdu: Bytes, is_retx: bool) {
            self.pdus.lock().unwrap().push((pdu, is_retx));
        }
        fn on_discard_pdu(&self, pdcp_sn: u32) {
            self.discards.lock().unwrap().push(pdcp_sn);
        }
    }

    impl PdcpTxUpperControlNotifier for Recorder {
        fn on_protocol_failure(&self) {
            *self.protocol_failures.lock().unwrap() += 1;
        }
        fn on_max_count_reached(&self) {
            *self.max_count.lock().unwrap() += 1;
        }
    }

    fn am_config() -> PdcpTxConfig {
        PdcpConfig::drb(PdcpRlcMode::Am, PdcpSnSize::Size12, SecurityDirection::Downlink).tx
    }

    fn setup(cfg: PdcpTxConfig) -> (PdcpEntityTx, Arc<Recorder>, TimerManager) {
        let timers = TimerManager::new();
        let rec = Arc::new(Recorder::default());
        let tx = PdcpEntityTx::new(UeIndex(1), RbId::Drb(1), cfg, rec.clone(), rec.clone(), &timers)
            .unwrap();
        (tx, rec, timers)
    }

    #[test]
    fn test_pdu_carries_header_and_sn() {
        let (mut tx, rec, _timers) = setup(am_config());
        tx.handle_sdu(Bytes::from_static(b"ab"));
        tx.handle_sdu(Bytes::from_static(b"cd"));
        let pdus = rec.pdus.lock().unwrap();
        assert_eq!(&pdus[0].0[..], &[0x80, 0x00, b'a', b'b']);
        assert_eq!(&pdus[1].0[..], &[0x80, 0x01, b'c', b'd']);
        assert!(!pdus[0].1);
        assert_eq!(tx.state().tx_next, 2);
        assert_eq!(tx.nof_pdus_in_window(), 2);
    }

    #[test]
    fn test_rlc_queue_limit_drops_sdu() {
        let mut cfg = am_config();
        cfg.custom.rlc_sdu_queue = 4;
        let (mut tx, rec, _timers) = setup(cfg);
        for _ in 0..5 {
            tx.handle_sdu(Bytes::from_static(b"x"));
        }
        assert_eq!(rec.pdus.lock().unwrap().len(), 4);
        assert_eq!(tx.metrics().num_dropped_sdus, 1);

        tx.handle_transmit_notification(1);
        assert_eq!(tx.state().tx_trans, 2);
        tx.handle_sdu(Bytes::from_static(b"x"));
        assert_eq!(rec.pdus.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_transmit_notification_bounds() {
        let (mut tx, _rec, _timers) = setup(am_config());
        tx.handle_sdu(Bytes::from_static(b"x"));
        tx.handle_transmit_notification(5);
        assert_eq!(tx.state().tx_trans, 0);
        tx.handle_transmit_notification(4096);
        assert_eq!(tx.state().tx_trans, 0);
        tx.handle_transmit_notification(0);
        assert_eq!(tx.state().tx_trans, 1);
    }

    #[test]
    fn test_discard_timer_expiry() {
        let mut cfg = am_config();
        cfg.discard_timer = Some(PdcpDiscardTimer::Ms(3));
        let (mut tx, rec, timers) = setup(cfg);
        tx.handle_sdu(Bytes::from_static(b"a"));
        tx.handle_sdu(Bytes::from_static(b"b"));
        for _ in 0..3 {
            for id in timers.tick() {
                assert!(tx.handle_timer_expiry(id));
            }
        }
        assert_eq!(*rec.discards.lock().unwrap(), vec![0, 1]);
        assert_eq!(tx.state().tx_next_ack, 2);
        assert_eq!(tx.state().tx_trans, 2);
        assert_eq!(tx.metrics().num_discard_timeouts, 2);
        assert_eq!(timers.nof_timers(), 0);
    }

    #[test]
    fn test_delivery_notification_stops_discard_timers() {
        let (mut tx, rec, timers) = setup(am_config());
        for _ in 0..3 {
            tx.handle_sdu(Bytes::from_static(b"a"));
        }
        tx.handle_delivery_notification(1);
        assert_eq!(tx.state().tx_next_ack, 2);
        assert_eq!(tx.nof_pdus_in_window(), 1);
        assert_eq!(timers.nof_running_timers(), 1);
        assert!(rec.discards.lock().unwrap().is_empty());
    }

    #[test]
    fn test_status_report_discards_acknowledged() {
        let (mut tx, rec, _timers) = setup(am_config());
        for _ in 0..5 {
            tx.handle_sdu(Bytes::from_static(b"a"));
        }
        // FMC = 2, COUNT 3 missing, COUNT 4 received
        let report = PdcpStatusReport {
            fmc: 2,
            bitmap: vec![false, true],
        };
        tx.handle_status_report(report.pack());
        assert_eq!(*rec.discards.lock().unwrap(), vec![0, 1, 4]);
        assert_eq!(tx.state().tx_next_ack, 2);
        assert_eq!(tx.nof_pdus_in_window(), 2);
    }

    #[test]
    fn test_retransmit_all_after_data_recovery() {
        let (mut tx, rec, _timers) = setup(am_config());
        tx.handle_sdu(Bytes::from_static(b"a"));
        tx.handle_sdu(Bytes::from_static(b"b"));
        tx.handle_transmit_notification(1);
        let report = PdcpStatusReport { fmc: 0, bitmap: vec![] }.pack();
        tx.data_recovery(Some(report.clone())).unwrap();

        let pdus = rec.pdus.lock().unwrap();
        assert_eq!(pdus.len(), 5);
        assert_eq!(pdus[2], (report, false));
        assert_eq!(&pdus[3].0[..], &[0x80, 0x00, b'a']);
        assert!(pdus[3].1 && pdus[4].1);
        assert_eq!(tx.state().tx_trans, 0);
        assert_eq!(tx.metrics().num_retx_pdus, 2);
    }

    #[test]
    fn test_data_recovery_rejected_on_um() {
        let cfg = PdcpConfig::drb(PdcpRlcMode::Um, PdcpSnSize::Size12, SecurityDirection::Downlink).tx;
        let (mut tx, _rec, _timers) = setup(cfg);
        assert!(matches!(tx.data_recovery(None), Err(LayerError::InvalidState(_))));
    }

    #[test]
    fn test_um_reestablish_resets() {
        let cfg = PdcpConfig::drb(PdcpRlcMode::Um, PdcpSnSize::Size12, SecurityDirection::Downlink).tx;
        let (mut tx, _rec, timers) = setup(cfg);
        tx.handle_sdu(Bytes::from_static(b"a"));
        tx.reestablish(Sec128AsConfig::null(SecurityDomain::Up)).unwrap();
        assert_eq!(tx.state(), PdcpTxState::default());
        assert_eq!(tx.nof_pdus_in_window(), 0);
        assert_eq!(timers.nof_timers(), 0);
    }

    #[test]
    fn test_max_count_one_shot() {
        let mut cfg = am_config();
        cfg.custom.max_count.notify = 1;
        cfg.custom.max_count.hard = 2;
        let (mut tx, rec, _timers) = setup(cfg);
        for _ in 0..4 {
            tx.handle_sdu(Bytes::from_static(b"a"));
        }
        assert_eq!(rec.pdus.lock().unwrap().len(), 2);
        assert_eq!(*rec.max_count.lock().unwrap(), 1);
        assert_eq!(*rec.protocol_failures.lock().unwrap(), 1);
        assert_eq!(tx.metrics().num_dropped_sdus, 2);
    }

    #[test]
    fn test_test_mode_self_notifies() {
        let mut cfg = am_config();
        cfg.custom.test_mode = true;
        cfg.custom.rlc_sdu_queue = 1;
        let (mut tx, rec, _timers) = setup(cfg);
        for _ in 0..3 {
            tx.handle_sdu(Bytes::from_static(b"a"));
        }
        assert_eq!(rec.pdus.lock().unwrap().len(), 3);
        assert_eq!(tx.state().tx_trans, 3);
    }

    #[test]
    fn test_srb_without_security_appends_zero_mac() {
        let timers = TimerManager::new();
        let rec = Arc::new(Recorder::default());
        let cfg = PdcpConfig::srb(SecurityDirection::Downlink).tx;
        let mut tx =
            PdcpEntityTx::new(UeIndex(1), RbId::Srb(1), cfg, rec.clone(), rec.clone(), &timers)
                .unwrap();
        tx.handle_sdu(Bytes::from_static(&[0xaa]));
        assert_eq!(&rec.pdus.lock().unwrap()[0].0[..], &[0x00, 0x00, 0xaa, 0, 0, 0, 0]);
    }
}
