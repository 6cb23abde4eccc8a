//! PDCP bearer: a Tx/Rx entity pair with status report forwarding

use super::config::PdcpConfig;
use super::rx::PdcpEntityRx;
use super::tx::PdcpEntityTx;
use crate::observer::ProtocolObserver;
use crate::security::Sec128AsConfig;
use crate::LayerError;
use bytes::Bytes;
use common::{RbId, TimerId, TimerManager, UeIndex};
use interfaces::channel::{notification_channel, NotificationReceiver, NotificationSender};
use interfaces::pdcp::{
    PdcpRxUpperControlNotifier, PdcpRxUpperDataNotifier, PdcpTxLowerNotifier, PdcpTxStatusHandler,
    PdcpTxUpperControlNotifier,
};
use std::sync::Arc;
use tracing::warn;

/// Hands status reports from the Rx half to the Tx half through a channel
struct StatusReportForwarder {
    ue_index: UeIndex,
    rb_id: RbId,
    tx: NotificationSender<Bytes>,
}

impl PdcpTxStatusHandler for StatusReportForwarder {
    fn on_status_report(&self, status: Bytes) {
        if self.tx.send(status).is_err() {
            warn!(
                "ue={} {}: Dropping status report, Tx half is gone",
                self.ue_index, self.rb_id
            );
        }
    }
}

/// Upper and lower notifiers of one PDCP bearer
pub struct PdcpEntityNotifiers {
    pub rx_upper_dn: Arc<dyn PdcpRxUpperDataNotifier>,
    pub rx_upper_cn: Arc<dyn PdcpRxUpperControlNotifier>,
    pub tx_lower_dn: Arc<dyn PdcpTxLowerNotifier>,
    pub tx_upper_cn: Arc<dyn PdcpTxUpperControlNotifier>,
}

pub struct PdcpEntity {
    tx: PdcpEntityTx,
    rx: PdcpEntityRx,
    status_rx: NotificationReceiver<Bytes>,
}

impl PdcpEntity {
    pub fn new(
        ue_index: UeIndex,
        rb_id: RbId,
        cfg: PdcpConfig,
        notifiers: PdcpEntityNotifiers,
        timers: &TimerManager,
    ) -> Result<Self, LayerError> {
        cfg.validate()?;
        let tx = PdcpEntityTx::new(
            ue_index,
            rb_id,
            cfg.tx,
            notifiers.tx_lower_dn,
            notifiers.tx_upper_cn,
            timers,
        )?;
        let mut rx = PdcpEntityRx::new(
            ue_index,
            rb_id,
            cfg.rx,
            notifiers.rx_upper_dn,
            notifiers.rx_upper_cn,
            timers,
        )?;
        let (status_tx, status_rx) = notification_channel();
        rx.set_status_handler(Arc::new(StatusReportForwarder {
            ue_index,
            rb_id,
            tx: status_tx,
        }));
        Ok(Self { tx, rx, status_rx })
    }

    pub fn tx(&mut self) -> &mut PdcpEntityTx {
        &mut self.tx
    }

    pub fn rx(&mut self) -> &mut PdcpEntityRx {
        &mut self.rx
    }

    pub fn set_observer(&mut self, observer: Arc<dyn ProtocolObserver>) {
        self.tx.set_observer(observer.clone());
        self.rx.set_observer(observer);
    }

    /// Receive a PDU and apply any status report it carried to the Tx half
    pub fn handle_pdu(&mut self, pdu: Bytes) {
        self.rx.handle_pdu(pdu);
        self.process_status_reports();
    }

    /// Apply status reports queued by the Rx half
    pub fn process_status_reports(&mut self) {
        while let Some(status) = self.status_rx.try_next() {
            self.tx.handle_status_report(status);
        }
    }

    pub fn handle_sdu(&mut self, sdu: Bytes) {
        self.tx.handle_sdu(sdu);
    }

    /// Data recovery, sending the Rx half's status report when configured
    pub fn data_recovery(&mut self) -> Result<(), LayerError> {
        let report = if self.tx.status_report_required() {
            Some(self.rx.compile_status_report())
        } else {
            None
        };
        self.tx.data_recovery(report)
    }

    pub fn reestablish(&mut self, sec_cfg: Sec128AsConfig) -> Result<(), LayerError> {
        self.tx.reestablish(sec_cfg.clone())?;
        self.rx.reestablish(sec_cfg)
    }

    pub fn configure_security(
        &mut self,
        sec_cfg: Sec128AsConfig,
        integrity_enabled: bool,
        ciphering_enabled: bool,
    ) -> Result<(), LayerError> {
        self.tx
            .configure_security(sec_cfg.clone(), integrity_enabled, ciphering_enabled)?;
        self.rx
            .configure_security(sec_cfg, integrity_enabled, ciphering_enabled)
    }

    /// Route an expired timer to whichever half owns it
    pub fn handle_timer_expiry(&mut self, id: TimerId) -> bool {
        self.tx.handle_timer_expiry(id) || self.rx.handle_timer_expiry(id)
    }

    /// Separate the halves for use in different execution contexts.
    /// Status reports keep flowing into the returned receiver.
    pub fn split(self) -> (PdcpEntityTx, PdcpEntityRx, NotificationReceiver<Bytes>) {
        (self.tx, self.rx, self.status_rx)
    }
}
