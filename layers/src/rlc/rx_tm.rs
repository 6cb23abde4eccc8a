//! RLC TM receiving entity (TS 38.322 clause 5.2.1.2)

use super::metrics::RlcRxMetrics;
use super::RlcRxEntity;
use crate::observer::{noop_observer, PduDirection, ProtocolObserver};
use bytes::Bytes;
use common::{RbId, TimerId, UeIndex};
use interfaces::rlc::{RlcRxLowerLayerInterface, RlcRxUpperLayerDataNotifier};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RlcRxTmEntity {
    ue_index: UeIndex,
    rb_id: RbId,
    upper_dn: Arc<dyn RlcRxUpperLayerDataNotifier>,
    observer: Arc<dyn ProtocolObserver>,
    metrics: RlcRxMetrics,
    stopped: bool,
}

impl RlcRxTmEntity {
    pub(crate) fn new(
        ue_index: UeIndex,
        rb_id: RbId,
        upper_dn: Arc<dyn RlcRxUpperLayerDataNotifier>,
    ) -> Self {
        info!("ue={} {} UL: RLC TM Rx configured", ue_index, rb_id);
        Self {
            ue_index,
            rb_id,
            upper_dn,
            observer: noop_observer(),
            metrics: RlcRxMetrics::default(),
            stopped: false,
        }
    }
}

impl RlcRxLowerLayerInterface for RlcRxTmEntity {
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
        debug!("ue={} {} UL: RX SDU. sdu_len={}", self.ue_index, self.rb_id, pdu.len());
        self.metrics.add_sdu(pdu.len());
        self.upper_dn.on_new_sdu(pdu);
    }
}

impl RlcRxEntity for RlcRxTmEntity {
    fn handle_timer_expiry(&mut self, _timer_id: TimerId) -> bool {
        false
    }

    fn stop(&mut self) {
        self.stopped = true;
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
    use super::super::test_utils::MockRlcNotifier;
    use super::*;

    #[test]
    fn test_pdu_passes_through() {
        let mock = Arc::new(MockRlcNotifier::default());
        let mut rx = RlcRxTmEntity::new(UeIndex(0), RbId::Srb(0), mock.clone());
        rx.handle_pdu(Bytes::from_static(b"msg3"));
        rx.handle_pdu(Bytes::new());
        assert_eq!(mock.take_sdus(), vec![Bytes::from_static(b"msg3")]);
        assert_eq!(rx.metrics().num_pdus, 2);
        assert_eq!(rx.metrics().num_malformed_pdus, 1);
    }
}
