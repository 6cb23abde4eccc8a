//! RLC TM transmitting entity (TS 38.322 clause 5.2.1.1)

use super::metrics::RlcTxMetrics;
use super::sdu_queue::RlcSduQueue;
use super::tx_upper::{BufferStateSignal, RlcTxUpperHandle};
use super::RlcTxEntity;
use crate::observer::{noop_observer, PduDirection, ProtocolObserver};
use common::{RbId, TimerId, UeIndex};
use interfaces::rlc::{RlcBufferState, RlcTxLowerLayerInterface};
use std::sync::Arc;
use tracing::{debug, info};

pub struct RlcTxTmEntity {
    ue_index: UeIndex,
    rb_id: RbId,
    queue: Arc<RlcSduQueue>,
    upper: Arc<RlcTxUpperHandle>,
    signal: Arc<BufferStateSignal>,
    observer: Arc<dyn ProtocolObserver>,
    metrics: RlcTxMetrics,
    stopped: bool,
}

impl RlcTxTmEntity {
    pub(crate) fn new(
        ue_index: UeIndex,
        rb_id: RbId,
        queue: Arc<RlcSduQueue>,
        upper: Arc<RlcTxUpperHandle>,
        signal: Arc<BufferStateSignal>,
    ) -> Self {
        info!("ue={} {} DL: RLC TM Tx configured", ue_index, rb_id);
        Self {
            ue_index,
            rb_id,
            queue,
            upper,
            signal,
            observer: noop_observer(),
            metrics: RlcTxMetrics::default(),
            stopped: false,
        }
    }
}

impl RlcTxLowerLayerInterface for RlcTxTmEntity {
    /// Send one whole SDU if it fits `buf`
    fn pull_pdu(&mut self, buf: &mut [u8]) -> usize {
        if self.stopped {
            return 0;
        }
        let Some(sdu_len) = self.queue.front(|sdu| sdu.buf.len()) else {
            debug!("ue={} {} DL: No SDUs left in the queue", self.ue_index, self.rb_id);
            return 0;
        };
        if sdu_len > buf.len() {
            info!(
                "ue={} {} DL: Tx grant too small for SDU. grant_len={} sdu_len={}",
                self.ue_index,
                self.rb_id,
                buf.len(),
                sdu_len
            );
            self.metrics.num_small_allocs += 1;
            return 0;
        }
        let Some(sdu) = self.queue.read() else {
            return 0;
        };
        let len = sdu.buf.len();
        buf[..len].copy_from_slice(&sdu.buf);
        debug!(
            "ue={} {} DL: TX PDU. pdu_len={} grant_len={}",
            self.ue_index,
            self.rb_id,
            len,
            buf.len()
        );
        self.metrics.add_pdu(len);
        self.observer
            .on_rlc_pdu(self.ue_index, self.rb_id, PduDirection::Tx, &buf[..len]);
        len
    }

    fn get_buffer_state(&mut self) -> RlcBufferState {
        RlcBufferState {
            pending_bytes: self.queue.size_bytes(),
            hol_toa: self.queue.front(|sdu| sdu.time_of_arrival),
        }
    }
}

impl RlcTxEntity for RlcTxTmEntity {
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

#[cfg(test)]
mod tests {
    use super::super::test_utils::MockRlcNotifier;
    use super::super::{new_tm_bearer, RlcTmConfig};
    use super::*;
    use bytes::Bytes;
    use interfaces::rlc::RlcTxUpperLayerDataInterface;

    #[test]
    fn test_whole_sdu_or_nothing() {
        let mock = Arc::new(MockRlcNotifier::default());
        let (mut tx, _rx, upper) =
            new_tm_bearer(UeIndex(0), RbId::Srb(0), &RlcTmConfig::default(), mock.notifiers());
        upper.handle_sdu(Bytes::from_static(b"rrc-setup"), false);
        assert_eq!(tx.get_buffer_state().pending_bytes, 9);

        let mut small = [0u8; 8];
        assert_eq!(tx.pull_pdu(&mut small), 0);
        assert_eq!(tx.metrics().num_small_allocs, 1);

        let mut buf = [0u8; 20];
        assert_eq!(tx.pull_pdu(&mut buf), 9);
        assert_eq!(&buf[..9], b"rrc-setup");
        assert_eq!(tx.pull_pdu(&mut buf), 0);

        let bs = tx.get_buffer_state();
        assert_eq!(bs.pending_bytes, 0);
        assert!(bs.hol_toa.is_none());
        assert_eq!(tx.metrics().num_pdus, 1);
        assert_eq!(tx.metrics().num_sdus, 1);
    }

    #[test]
    fn test_buffer_state_update_reaches_mac() {
        let mock = Arc::new(MockRlcNotifier::default());
        let (mut tx, _rx, upper) =
            new_tm_bearer(UeIndex(0), RbId::Srb(0), &RlcTmConfig::default(), mock.notifiers());
        upper.handle_sdu(Bytes::from_static(b"abc"), false);
        assert_eq!(*mock.bs_changed.lock().unwrap(), 1);
        tx.update_mac_buffer_state();
        assert_eq!(mock.last_bs().map(|bs| bs.pending_bytes), Some(3));
    }
}
