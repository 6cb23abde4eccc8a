//! PDCP receiving entity (TS 38.323 clause 5.2.2)

use super::config::{PdcpRbType, PdcpRlcMode, PdcpRxConfig, PdcpTReordering};
use super::metrics::PdcpRxMetrics;
use super::pdu::{
    control_pdu_type, pdu_dc_field, read_data_pdu_sn, PdcpControlPduType, PdcpDcField,
    PdcpStatusReport,
};
use super::validate_security_config;
use crate::observer::{noop_observer, PduDirection, ProtocolObserver};
use crate::security::{Sec128AsConfig, SecurityEngine, SecurityEngineRx, SecurityError, MAC_I_LEN};
use crate::LayerError;
use bytes::{Buf, Bytes, BytesMut};
use common::sn::{estimate_count, hfn_underflows, sn_of, window_size};
use common::{RbId, SduWindow, TimerId, TimerManager, UeIndex, UniqueTimer};
use interfaces::pdcp::{PdcpRxUpperControlNotifier, PdcpRxUpperDataNotifier, PdcpTxStatusHandler};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Rx state variables, all holding COUNT values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PdcpRxState {
    /// COUNT of the next PDU expected to be received
    pub rx_next: u32,
    /// COUNT of the first SDU not yet delivered
    pub rx_deliv: u32,
    /// COUNT following the one that triggered t-Reordering
    pub rx_reord: u32,
}

#[derive(Debug)]
struct PdcpRxSduInfo {
    sdu: Bytes,
    count: u32,
}

pub struct PdcpEntityRx {
    ue_index: UeIndex,
    rb_id: RbId,
    cfg: PdcpRxConfig,
    sn_bits: u32,
    hdr_len: usize,
    st: PdcpRxState,
    rx_window: SduWindow<PdcpRxSduInfo>,
    reordering_timer: UniqueTimer,

    sec_engine: Option<Box<dyn SecurityEngineRx>>,
    integrity_enabled: bool,
    ciphering_enabled: bool,

    max_count_notified: bool,
    max_count_overflow: bool,

    upper_dn: Arc<dyn PdcpRxUpperDataNotifier>,
    upper_cn: Arc<dyn PdcpRxUpperControlNotifier>,
    status_handler: Option<Arc<dyn PdcpTxStatusHandler>>,
    observer: Arc<dyn ProtocolObserver>,
    metrics: PdcpRxMetrics,
}

impl PdcpEntityRx {
    pub fn new(
        ue_index: UeIndex,
        rb_id: RbId,
        cfg: PdcpRxConfig,
        upper_dn: Arc<dyn PdcpRxUpperDataNotifier>,
        upper_cn: Arc<dyn PdcpRxUpperControlNotifier>,
        timers: &TimerManager,
    ) -> Result<Self, LayerError> {
        cfg.validate()?;
        let sn_bits = cfg.sn_size.bits();

        let reordering_timer = timers.create_timer();
        if let PdcpTReordering::Ms(ms) = cfg.t_reordering {
            if ms > 0 {
                reordering_timer.set(Duration::from_millis(u64::from(ms)));
            }
        }

        info!(
            "ue={} {} UL: PDCP Rx configured: sn_size={} t_reordering={:?} mode={:?}",
            ue_index, rb_id, sn_bits, cfg.t_reordering, cfg.rlc_mode
        );

        Ok(Self {
            ue_index,
            rb_id,
            hdr_len: cfg.sn_size.header_len(),
            sn_bits,
            st: PdcpRxState::default(),
            rx_window: SduWindow::new(window_size(sn_bits) as usize),
            reordering_timer,
            sec_engine: None,
            integrity_enabled: false,
            ciphering_enabled: false,
            max_count_notified: false,
            max_count_overflow: false,
            upper_dn,
            upper_cn,
            status_handler: None,
            observer: noop_observer(),
            metrics: PdcpRxMetrics::default(),
            cfg,
        })
    }

    /// Register the Tx half that receives status reports arriving on this bearer
    pub fn set_status_handler(&mut self, handler: Arc<dyn PdcpTxStatusHandler>) {
        self.status_handler = Some(handler);
    }

    pub fn set_observer(&mut self, observer: Arc<dyn ProtocolObserver>) {
        self.observer = observer;
    }

    pub fn state(&self) -> PdcpRxState {
        self.st
    }

    /// Overwrite the state variables. Buffered SDUs are kept.
    pub fn set_state(&mut self, st: PdcpRxState) {
        self.st = st;
    }

    pub fn metrics(&self) -> &PdcpRxMetrics {
        &self.metrics
    }

    pub fn reset_metrics(&mut self) {
        self.metrics = PdcpRxMetrics::default();
    }

    pub fn is_reordering_timer_running(&self) -> bool {
        self.reordering_timer.is_running()
    }

    pub fn reordering_timer_id(&self) -> TimerId {
        self.reordering_timer.id()
    }

    /// Number of SDUs waiting for reordering
    pub fn nof_buffered_sdus(&self) -> usize {
        self.rx_window.len()
    }

    fn is_srb(&self) -> bool {
        self.cfg.rb_type == PdcpRbType::Srb
    }

    pub fn handle_pdu(&mut self, pdu: Bytes) {
        self.metrics.add_pdu(pdu.len());
        if pdu.is_empty() {
            warn!("ue={} {} UL: Dropping empty PDU", self.ue_index, self.rb_id);
            self.metrics.num_dropped_pdus += 1;
            return;
        }
        self.observer
            .on_pdcp_pdu(self.ue_index, self.rb_id, PduDirection::Rx, &pdu);

        if self.is_srb() || pdu_dc_field(&pdu) == Some(PdcpDcField::Data) {
            self.handle_data_pdu(pdu);
        } else {
            self.handle_control_pdu(pdu);
        }
    }

    fn handle_data_pdu(&mut self, pdu: Bytes) {
        if pdu.len() <= self.hdr_len {
            error!(
                "ue={} {} UL: PDU too small. pdu_len={} hdr_len={}",
                self.ue_index,
                self.rb_id,
                pdu.len(),
                self.hdr_len
            );
            self.metrics.num_dropped_pdus += 1;
            return;
        }
        let Some(rcvd_sn) = read_data_pdu_sn(&pdu, self.cfg.sn_size) else {
            self.metrics.num_dropped_pdus += 1;
            return;
        };

        if hfn_underflows(self.st.rx_deliv, rcvd_sn, self.sn_bits) {
            debug!(
                "ue={} {} UL: Dropping stale PDU from before COUNT 0. sn={} rx_deliv={}",
                self.ue_index, self.rb_id, rcvd_sn, self.st.rx_deliv
            );
            self.metrics.num_dropped_pdus += 1;
            return;
        }
        let rcvd_count = estimate_count(self.st.rx_deliv, rcvd_sn, self.sn_bits);
        debug!(
            "ue={} {} UL: RX PDU. pdu_len={} sn={} count={}",
            self.ue_index,
            self.rb_id,
            pdu.len(),
            rcvd_sn,
            rcvd_count
        );

        let max_count = self.cfg.custom.max_count;
        if rcvd_count > max_count.notify && !self.max_count_notified {
            warn!(
                "ue={} {} UL: Approaching max_count, notifying RRC. count={}",
                self.ue_index, self.rb_id, rcvd_count
            );
            self.upper_cn.on_max_count_reached();
            self.max_count_notified = true;
        }
        if rcvd_count >= max_count.hard {
            if !self.max_count_overflow {
                error!(
                    "ue={} {} UL: Reached max_count, refusing further RX. count={}",
                    self.ue_index, self.rb_id, rcvd_count
                );
                self.upper_cn.on_protocol_failure();
                self.max_count_overflow = true;
            }
            self.metrics.num_dropped_pdus += 1;
            return;
        }

        let Some(mut buf) = self.apply_deciphering_and_integrity_check(pdu, rcvd_count) else {
            self.metrics.num_dropped_pdus += 1;
            return;
        };
        buf.advance(self.hdr_len);
        let sdu = buf.freeze();

        if rcvd_count < self.st.rx_deliv {
            debug!(
                "ue={} {} UL: Out-of-order after timeout or duplicate. count={} rx_deliv={}",
                self.ue_index, self.rb_id, rcvd_count, self.st.rx_deliv
            );
            self.metrics.num_dropped_pdus += 1;
            return;
        }

        match self.rx_window.occupant(rcvd_count) {
            Some(count) if count == rcvd_count => {
                debug!(
                    "ue={} {} UL: Duplicate PDU dropped. count={}",
                    self.ue_index, self.rb_id, rcvd_count
                );
                self.metrics.num_dropped_pdus += 1;
                return;
            }
            Some(old) => {
                error!(
                    "ue={} {} UL: Removing old PDU with count={} for new PDU with count={}",
                    self.ue_index, self.rb_id, old, rcvd_count
                );
                self.rx_window.remove_sn(old);
            }
            None => {}
        }

        self.rx_window.insert(
            rcvd_count,
            PdcpRxSduInfo {
                sdu,
                count: rcvd_count,
            },
        );

        if rcvd_count >= self.st.rx_next {
            self.st.rx_next = rcvd_count + 1;
        }

        if rcvd_count == self.st.rx_deliv {
            self.deliver_all_consecutive_counts();
        }

        if self.reordering_timer.is_running() && self.st.rx_deliv >= self.st.rx_reord {
            self.reordering_timer.stop();
            debug!("ue={} {} UL: Stopped t-Reordering", self.ue_index, self.rb_id);
        }

        match self.cfg.t_reordering {
            PdcpTReordering::Infinity => {}
            PdcpTReordering::Ms(0) => {
                self.st.rx_reord = self.st.rx_next;
                self.handle_t_reordering_expire();
            }
            PdcpTReordering::Ms(_) => {
                if !self.reordering_timer.is_running() && self.st.rx_deliv < self.st.rx_next {
                    self.st.rx_reord = self.st.rx_next;
                    self.reordering_timer.run();
                    debug!("ue={} {} UL: Started t-Reordering", self.ue_index, self.rb_id);
                }
            }
        }
        debug!("ue={} {} UL: {:?}", self.ue_index, self.rb_id, self.st);
    }

    fn handle_control_pdu(&mut self, pdu: Bytes) {
        self.metrics.num_control_pdus += 1;
        match control_pdu_type(&pdu) {
            Some(PdcpControlPduType::StatusReport) => match &self.status_handler {
                Some(handler) => handler.on_status_report(pdu),
                None => warn!(
                    "ue={} {} UL: No status handler, dropping status report",
                    self.ue_index, self.rb_id
                ),
            },
            Some(other) => {
                warn!(
                    "ue={} {} UL: Unsupported control PDU type {:?}",
                    self.ue_index, self.rb_id, other
                );
                self.metrics.num_dropped_pdus += 1;
            }
            None => {
                warn!("ue={} {} UL: Invalid control PDU type", self.ue_index, self.rb_id);
                self.metrics.num_dropped_pdus += 1;
            }
        }
    }

    fn apply_deciphering_and_integrity_check(&mut self, pdu: Bytes, count: u32) -> Option<BytesMut> {
        let mut buf = BytesMut::from(&pdu[..]);
        let Some(engine) = &self.sec_engine else {
            if self.is_srb() {
                if buf.len() <= MAC_I_LEN {
                    warn!(
                        "ue={} {} UL: Failed to trim MAC-I from PDU. count={}",
                        self.ue_index, self.rb_id, count
                    );
                    return None;
                }
                buf.truncate(buf.len() - MAC_I_LEN);
            }
            return Some(buf);
        };

        match engine.decrypt_and_verify_integrity(buf, self.hdr_len, count) {
            Ok(buf) => {
                if self.integrity_enabled {
                    self.metrics.num_integrity_verified_pdus += 1;
                }
                Some(buf)
            }
            Err(SecurityError::IntegrityFailure) => {
                warn!(
                    "ue={} {} UL: Integrity failed, dropping PDU. count={}",
                    self.ue_index, self.rb_id, count
                );
                self.metrics.num_integrity_failed_pdus += 1;
                self.upper_cn.on_integrity_failure();
                None
            }
            Err(e) => {
                warn!(
                    "ue={} {} UL: Deciphering failed, dropping PDU. count={} error={}",
                    self.ue_index, self.rb_id, count, e
                );
                self.upper_cn.on_protocol_failure();
                None
            }
        }
    }

    fn deliver_sdu(&mut self, info: PdcpRxSduInfo) {
        debug!(
            "ue={} {} UL: Delivering SDU. count={} sdu_len={}",
            self.ue_index,
            self.rb_id,
            info.count,
            info.sdu.len()
        );
        self.metrics.add_sdu(info.sdu.len());
        self.upper_dn.on_new_sdu(info.sdu);
    }

    fn deliver_all_consecutive_counts(&mut self) {
        while self.st.rx_deliv != self.st.rx_next {
            let Some(info) = self.rx_window.remove_sn(self.st.rx_deliv) else {
                break;
            };
            self.deliver_sdu(info);
            self.st.rx_deliv += 1;
        }
    }

    fn handle_t_reordering_expire(&mut self) {
        self.metrics.num_t_reordering_timeouts += 1;
        while self.st.rx_deliv < self.st.rx_reord {
            if let Some(info) = self.rx_window.remove_sn(self.st.rx_deliv) {
                self.deliver_sdu(info);
            }
            self.st.rx_deliv += 1;
        }
        self.deliver_all_consecutive_counts();

        if self.st.rx_deliv < self.st.rx_next {
            if self.cfg.t_reordering == PdcpTReordering::Ms(0) {
                error!(
                    "ue={} {} UL: Undelivered SDUs after expiry of zero t-Reordering. {:?}",
                    self.ue_index, self.rb_id, self.st
                );
                return;
            }
            self.st.rx_reord = self.st.rx_next;
            self.reordering_timer.run();
        }
    }

    /// Route an expired timer to this entity. Returns false if the timer is not ours.
    pub fn handle_timer_expiry(&mut self, id: TimerId) -> bool {
        if id != self.reordering_timer.id() {
            return false;
        }
        if !self.reordering_timer.has_expired() {
            debug!("ue={} {} UL: Ignoring stale t-Reordering expiry", self.ue_index, self.rb_id);
            return true;
        }
        self.reordering_timer.stop();
        debug!(
            "ue={} {} UL: t-Reordering expired. {:?}",
            self.ue_index, self.rb_id, self.st
        );
        self.handle_t_reordering_expire();
        true
    }

    /// Build a status report from the current reception state
    pub fn compile_status_report(&self) -> Bytes {
        let fmc = self.st.rx_deliv;
        let bitmap = (fmc.wrapping_add(1)..self.st.rx_next)
            .map(|count| self.rx_window.has_sn(count))
            .collect();
        let report = PdcpStatusReport { fmc, bitmap }.pack();
        debug!(
            "ue={} {} UL: Compiled status report. fmc={} len={}",
            self.ue_index,
            self.rb_id,
            fmc,
            report.len()
        );
        report
    }

    /// Re-establishment (TS 38.323 clause 5.1.2)
    pub fn reestablish(&mut self, sec_cfg: Sec128AsConfig) -> Result<(), LayerError> {
        if self.is_srb() {
            self.rx_window.clear();
        }
        if self.is_srb() || self.cfg.rlc_mode == PdcpRlcMode::Um {
            self.reordering_timer.stop();
            if self.cfg.rlc_mode == PdcpRlcMode::Um {
                let mut buffered: Vec<u32> = self.rx_window.iter().map(|(count, _)| count).collect();
                buffered.sort_unstable();
                for count in buffered {
                    if let Some(info) = self.rx_window.remove_sn(count) {
                        self.deliver_sdu(info);
                    }
                }
            }
            self.rx_window.clear();
            self.st = PdcpRxState::default();
        }
        self.max_count_notified = false;
        self.max_count_overflow = false;
        info!("ue={} {} UL: Re-established", self.ue_index, self.rb_id);
        self.configure_security(sec_cfg, self.integrity_enabled, self.ciphering_enabled)
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
            "ue={} {} UL: Security configured: integ_algo={:?} cipher_algo={:?} integrity={} ciphering={}",
            self.ue_index,
            self.rb_id,
            sec_cfg.integ_algo,
            sec_cfg.cipher_algo,
            integrity_enabled,
            ciphering_enabled
        );
        Ok(())
    }

    /// SN of the next expected PDU
    pub fn rx_next_sn(&self) -> u32 {
        sn_of(self.st.rx_next, self.sn_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdcp::config::{PdcpConfig, PdcpSnSize};
    use crate::pdcp::pdu::write_data_pdu_header;
    use crate::security::{
        CipheringAlgorithm, IntegrityAlgorithm, SecurityDirection, SecurityDomain, SecurityEngineTx,
    };
    use bytes::BufMut;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sdus: Mutex<Vec<Bytes>>,
        protocol_failures: Mutex<u32>,
        integrity_failures: Mutex<u32>,
        max_count: Mutex<u32>,
        status_reports: Mutex<Vec<Bytes>>,
    }

    impl PdcpRxUpperDataNotifier for Recorder {
        fn on_new_sdu(&self, sdu: Bytes) {
            self.sdus.lock().unwrap().push(sdu);
        }
    }

    impl PdcpRxUpperControlNotifier for Recorder {
        fn on_protocol_failure(&self) {
            *self.protocol_failures.lock().unwrap() += 1;
        }
        fn on_integrity_failure(&self) {
            *self.integrity_failures.lock().unwrap() += 1;
        }
        fn on_max_count_reached(&self) {
            *self.max_count.lock().unwrap() += 1;
        }
    }

    impl PdcpTxStatusHandler for Recorder {
        fn on_status_report(&self, status: Bytes) {
            self.status_reports.lock().unwrap().push(status);
        }
    }

    fn rx_config(t_reordering: PdcpTReordering) -> PdcpRxConfig {
        let mut cfg =
            PdcpConfig::drb(PdcpRlcMode::Am, PdcpSnSize::Size12, SecurityDirection::Uplink).rx;
        cfg.t_reordering = t_reordering;
        cfg
    }

    fn setup(cfg: PdcpRxConfig, rb_id: RbId) -> (PdcpEntityRx, Arc<Recorder>, TimerManager) {
        let timers = TimerManager::new();
        let rec = Arc::new(Recorder::default());
        let rx = PdcpEntityRx::new(UeIndex(0), rb_id, cfg, rec.clone(), rec.clone(), &timers)
            .unwrap();
        (rx, rec, timers)
    }

    fn data_pdu(count: u32, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        write_data_pdu_header(&mut buf, PdcpRbType::Drb, PdcpSnSize::Size12, sn_of(count, 12));
        buf.put_slice(payload);
        buf.freeze()
    }

    fn delivered(rec: &Recorder) -> Vec<u8> {
        rec.sdus.lock().unwrap().iter().map(|s| s[0]).collect()
    }

    fn tick_and_dispatch(rx: &mut PdcpEntityRx, timers: &TimerManager) {
        for id in timers.tick() {
            rx.handle_timer_expiry(id);
        }
    }

    #[test]
    fn test_in_order_delivery() {
        let (mut rx, rec, _timers) = setup(rx_config(PdcpTReordering::Ms(10)), RbId::Drb(1));
        for count in 0..3 {
            rx.handle_pdu(data_pdu(count, &[count as u8]));
        }
        assert_eq!(delivered(&rec), vec![0, 1, 2]);
        assert_eq!(rx.state().rx_deliv, 3);
        assert_eq!(rx.state().rx_next, 3);
        assert!(!rx.is_reordering_timer_running());
    }

    #[test]
    fn test_reordering_timer_starts_and_stops() {
        let (mut rx, rec, _timers) = setup(rx_config(PdcpTReordering::Ms(10)), RbId::Drb(1));
        rx.handle_pdu(data_pdu(0, &[0]));
        rx.handle_pdu(data_pdu(2, &[2]));
        assert!(rx.is_reordering_timer_running());
        assert_eq!(rx.state().rx_reord, 3);
        rx.handle_pdu(data_pdu(1, &[1]));
        assert!(!rx.is_reordering_timer_running());
        assert_eq!(delivered(&rec), vec![0, 1, 2]);
    }

    #[test]
    fn test_reordering_timeout_skips_gap() {
        let (mut rx, rec, timers) = setup(rx_config(PdcpTReordering::Ms(5)), RbId::Drb(1));
        rx.handle_pdu(data_pdu(1, &[1]));
        rx.handle_pdu(data_pdu(3, &[3]));
        assert!(delivered(&rec).is_empty());
        for _ in 0..5 {
            tick_and_dispatch(&mut rx, &timers);
        }
        // First expiry skips COUNT 0, the timer restarts for the gap at COUNT 2
        assert_eq!(delivered(&rec), vec![1]);
        assert_eq!(rx.state().rx_deliv, 2);
        assert!(rx.is_reordering_timer_running());
        for _ in 0..5 {
            tick_and_dispatch(&mut rx, &timers);
        }
        assert_eq!(delivered(&rec), vec![1, 3]);
        assert_eq!(rx.state().rx_deliv, 4);
        assert_eq!(rx.metrics().num_t_reordering_timeouts, 2);

        // A late PDU below rx_deliv is dropped
        rx.handle_pdu(data_pdu(0, &[0]));
        assert_eq!(delivered(&rec), vec![1, 3]);
    }

    #[test]
    fn test_zero_t_reordering_delivers_inline() {
        let (mut rx, rec, _timers) = setup(rx_config(PdcpTReordering::Ms(0)), RbId::Drb(1));
        rx.handle_pdu(data_pdu(2, &[2]));
        assert_eq!(delivered(&rec), vec![2]);
        assert_eq!(rx.state().rx_deliv, 3);
    }

    #[test]
    fn test_infinite_t_reordering_never_starts() {
        let (mut rx, rec, _timers) = setup(rx_config(PdcpTReordering::Infinity), RbId::Drb(1));
        rx.handle_pdu(data_pdu(1, &[1]));
        assert!(!rx.is_reordering_timer_running());
        assert!(delivered(&rec).is_empty());
    }

    #[test]
    fn test_duplicate_dropped() {
        let (mut rx, rec, _timers) = setup(rx_config(PdcpTReordering::Ms(10)), RbId::Drb(1));
        rx.handle_pdu(data_pdu(1, &[1]));
        rx.handle_pdu(data_pdu(1, &[1]));
        assert_eq!(rx.metrics().num_dropped_pdus, 1);
        assert_eq!(rx.nof_buffered_sdus(), 1);
        assert!(delivered(&rec).is_empty());
    }

    #[test]
    fn test_short_pdu_dropped() {
        let (mut rx, _rec, _timers) = setup(rx_config(PdcpTReordering::Ms(10)), RbId::Drb(1));
        rx.handle_pdu(Bytes::from_static(&[0x80, 0x00]));
        rx.handle_pdu(Bytes::new());
        assert_eq!(rx.metrics().num_dropped_pdus, 2);
    }

    #[test]
    fn test_stale_pdu_from_before_count_zero_dropped() {
        let (mut rx, rec, _timers) = setup(rx_config(PdcpTReordering::Ms(10)), RbId::Drb(1));
        rx.handle_pdu(data_pdu(4000, &[0]));
        assert!(delivered(&rec).is_empty());
        assert_eq!(rx.state(), PdcpRxState::default());
        assert_eq!(rx.metrics().num_dropped_pdus, 1);
    }

    #[test]
    fn test_status_report_forwarded_to_handler() {
        let (mut rx, rec, _timers) = setup(rx_config(PdcpTReordering::Ms(10)), RbId::Drb(1));
        rx.set_status_handler(rec.clone());
        let report = PdcpStatusReport { fmc: 7, bitmap: vec![] }.pack();
        rx.handle_pdu(report.clone());
        assert_eq!(*rec.status_reports.lock().unwrap(), vec![report]);
    }

    #[test]
    fn test_compile_status_report() {
        let (mut rx, _rec, _timers) = setup(rx_config(PdcpTReordering::Ms(10)), RbId::Drb(1));
        rx.handle_pdu(data_pdu(0, &[0]));
        rx.handle_pdu(data_pdu(2, &[2]));
        rx.handle_pdu(data_pdu(4, &[4]));
        let report = PdcpStatusReport::unpack(&rx.compile_status_report()).unwrap();
        assert_eq!(report.fmc, 1);
        assert_eq!(&report.bitmap[..3], &[true, false, true]);
    }

    #[test]
    fn test_max_count_notifications() {
        let mut cfg = rx_config(PdcpTReordering::Ms(10));
        cfg.custom.max_count.notify = 1;
        cfg.custom.max_count.hard = 3;
        let (mut rx, rec, _timers) = setup(cfg, RbId::Drb(1));
        for count in 0..5 {
            rx.handle_pdu(data_pdu(count, &[count as u8]));
        }
        assert_eq!(*rec.max_count.lock().unwrap(), 1);
        assert_eq!(*rec.protocol_failures.lock().unwrap(), 1);
        assert_eq!(delivered(&rec), vec![0, 1, 2]);
    }

    #[test]
    fn test_um_reestablish_flushes_in_order() {
        let mut cfg = rx_config(PdcpTReordering::Ms(10));
        cfg.rlc_mode = PdcpRlcMode::Um;
        let (mut rx, rec, _timers) = setup(cfg, RbId::Drb(1));
        rx.handle_pdu(data_pdu(3, &[3]));
        rx.handle_pdu(data_pdu(1, &[1]));
        rx.reestablish(Sec128AsConfig::null(SecurityDomain::Up)).unwrap();
        assert_eq!(delivered(&rec), vec![1, 3]);
        assert_eq!(rx.state(), PdcpRxState::default());
        assert!(!rx.is_reordering_timer_running());
    }

    #[test]
    fn test_am_reestablish_keeps_state() {
        let (mut rx, _rec, _timers) = setup(rx_config(PdcpTReordering::Ms(10)), RbId::Drb(1));
        rx.handle_pdu(data_pdu(0, &[0]));
        rx.handle_pdu(data_pdu(2, &[2]));
        rx.reestablish(Sec128AsConfig::null(SecurityDomain::Up)).unwrap();
        assert_eq!(rx.state().rx_deliv, 1);
        assert_eq!(rx.nof_buffered_sdus(), 1);
    }

    #[test]
    fn test_srb_without_security_strips_mac() {
        let cfg = PdcpConfig::srb(SecurityDirection::Downlink).rx;
        let (mut rx, rec, _timers) = setup(cfg, RbId::Srb(1));
        rx.handle_pdu(Bytes::from_static(&[0x00, 0x00, 0xaa, 0, 0, 0, 0]));
        assert_eq!(*rec.sdus.lock().unwrap(), vec![Bytes::from_static(&[0xaa])]);
    }

    #[test]
    fn test_integrity_failure_notified() {
        let cfg = rx_config(PdcpTReordering::Ms(10));
        let (mut rx, rec, _timers) = setup(cfg.clone(), RbId::Drb(1));
        let sec = Sec128AsConfig {
            domain: SecurityDomain::Up,
            integ_algo: Some(IntegrityAlgorithm::Nia2),
            cipher_algo: CipheringAlgorithm::Nea2,
            k_128_int: Some([1; 16]),
            k_128_enc: [2; 16],
        };
        rx.configure_security(sec.clone(), true, true).unwrap();

        let tx_engine = SecurityEngine::new(&sec, 0, cfg.direction, true, true).unwrap();
        let mut pdu = BytesMut::new();
        write_data_pdu_header(&mut pdu, PdcpRbType::Drb, PdcpSnSize::Size12, 0);
        pdu.put_slice(b"hello");
        let protected = tx_engine.encrypt_and_protect_integrity(pdu, 2, 0).unwrap();

        let mut corrupted = protected.clone();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0x01;
        rx.handle_pdu(corrupted.freeze());
        assert_eq!(*rec.integrity_failures.lock().unwrap(), 1);
        assert_eq!(rx.metrics().num_integrity_failed_pdus, 1);

        rx.handle_pdu(protected.freeze());
        assert_eq!(*rec.sdus.lock().unwrap(), vec![Bytes::from_static(b"hello")]);
        assert_eq!(rx.metrics().num_integrity_verified_pdus, 1);
    }

    #[test]
    fn test_wrong_security_domain_rejected() {
        let (mut rx, _rec, _timers) = setup(rx_config(PdcpTReordering::Ms(10)), RbId::Drb(1));
        assert!(rx
            .configure_security(Sec128AsConfig::null(SecurityDomain::Rrc), false, false)
            .is_err());
    }
}
