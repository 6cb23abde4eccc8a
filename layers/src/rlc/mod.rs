//! RLC Layer Implementation
//!
//! Implements the Radio Link Control protocol (TS 38.322) in transparent,
//! unacknowledged and acknowledged mode.
//!
//! An RLC entity is split in two halves that live in different execution
//! contexts. The Tx upper handle takes SDUs from PDCP; the Tx entity builds
//! PDUs when the MAC pulls them; the Rx entity takes PDUs from the MAC. The
//! halves talk through the lock-free SDU queue, atomics and notification
//! channels only.

pub mod config;
pub mod metrics;
pub mod pdu;
mod rx_am;
mod rx_tm;
mod rx_um;
pub mod sdu_queue;
mod segments;
pub mod status;
mod tx_am;
mod tx_tm;
mod tx_um;
mod tx_upper;

pub use config::*;
pub use metrics::{RlcRxMetrics, RlcTxMetrics};
pub use rx_am::{RlcRxAmEntity, RlcRxAmState};
pub use rx_tm::RlcRxTmEntity;
pub use rx_um::{RlcRxUmEntity, RlcRxUmState};
pub use tx_am::{RlcTxAmEntity, RlcTxAmState};
pub use tx_tm::RlcTxTmEntity;
pub use tx_um::RlcTxUmEntity;
pub use tx_upper::RlcTxUpperHandle;

use crate::observer::ProtocolObserver;
use crate::pdcp::PdcpSnSize;
use crate::LayerError;
use common::{RbId, TimerId, TimerManager, UeIndex};
use interfaces::channel::notification_channel;
use interfaces::rlc::{
    RlcRxLowerLayerInterface, RlcRxUpperLayerDataNotifier, RlcTxLowerLayerInterface,
    RlcTxLowerLayerNotifier, RlcTxUpperLayerControlNotifier, RlcTxUpperLayerDataNotifier,
};
use rx_am::RxAmStatusProvider;
use sdu_queue::RlcSduQueue;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::info;
use tx_upper::BufferStateSignal;

/// RLC mode of a bearer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RlcMode {
    Tm,
    Um,
    Am,
}

impl fmt::Display for RlcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RlcMode::Tm => write!(f, "TM"),
            RlcMode::Um => write!(f, "UM"),
            RlcMode::Am => write!(f, "AM"),
        }
    }
}

/// Lower (MAC-facing) side of an RLC Tx entity
pub trait RlcTxEntity: RlcTxLowerLayerInterface {
    /// Compute the buffer state and report it to the MAC
    fn update_mac_buffer_state(&mut self);
    /// Handle an expiry reported by the lower context timer service.
    /// Returns false if the timer does not belong to this entity.
    fn handle_timer_expiry(&mut self, timer_id: TimerId) -> bool;
    /// Stop timers and ignore any further SDUs and grants
    fn stop(&mut self);
    fn metrics(&self) -> RlcTxMetrics;
    fn reset_metrics(&mut self);
    fn set_observer(&mut self, observer: Arc<dyn ProtocolObserver>);
}

/// RLC Rx entity
pub trait RlcRxEntity: RlcRxLowerLayerInterface {
    /// Handle an expiry reported by the UE context timer service
    fn handle_timer_expiry(&mut self, timer_id: TimerId) -> bool;
    fn stop(&mut self);
    fn metrics(&self) -> RlcRxMetrics;
    fn reset_metrics(&mut self);
    fn set_observer(&mut self, observer: Arc<dyn ProtocolObserver>);
}

/// Neighbours of an RLC entity
#[derive(Clone)]
pub struct RlcNotifiers {
    pub rx_upper_dn: Arc<dyn RlcRxUpperLayerDataNotifier>,
    pub tx_upper_dn: Arc<dyn RlcTxUpperLayerDataNotifier>,
    pub tx_upper_cn: Arc<dyn RlcTxUpperLayerControlNotifier>,
    pub tx_lower_dn: Arc<dyn RlcTxLowerLayerNotifier>,
}

/// A complete RLC bearer
pub struct RlcEntity {
    pub mode: RlcMode,
    /// Driven by the lower (cell) context
    pub tx: Box<dyn RlcTxEntity>,
    /// Driven by the UE context
    pub rx: Box<dyn RlcRxEntity>,
    /// Shared with the upper layer
    pub tx_upper: Arc<RlcTxUpperHandle>,
}

impl RlcEntity {
    pub fn stop(&mut self) {
        self.tx.stop();
        self.rx.stop();
    }

    pub fn set_observer(&mut self, observer: Arc<dyn ProtocolObserver>) {
        self.tx.set_observer(observer.clone());
        self.rx.set_observer(observer);
    }
}

fn sdu_queue(queue_size: u32, queue_size_bytes: u32) -> Arc<RlcSduQueue> {
    Arc::new(RlcSduQueue::new(queue_size, queue_size_bytes))
}

pub(crate) fn new_tm_bearer(
    ue_index: UeIndex,
    rb_id: RbId,
    cfg: &RlcTmConfig,
    notifiers: RlcNotifiers,
) -> (RlcTxTmEntity, RlcRxTmEntity, Arc<RlcTxUpperHandle>) {
    let queue = sdu_queue(cfg.tx.queue_size, cfg.tx.queue_size_bytes);
    let signal = Arc::new(BufferStateSignal::new(notifiers.tx_lower_dn));
    let upper = Arc::new(RlcTxUpperHandle::new(
        ue_index,
        rb_id,
        RlcMode::Tm,
        queue.clone(),
        None,
        signal.clone(),
    ));
    let tx = RlcTxTmEntity::new(ue_index, rb_id, queue, upper.clone(), signal);
    let rx = RlcRxTmEntity::new(ue_index, rb_id, notifiers.rx_upper_dn);
    (tx, rx, upper)
}

pub(crate) fn new_um_bearer(
    ue_index: UeIndex,
    rb_id: RbId,
    cfg: &RlcUmConfig,
    notifiers: RlcNotifiers,
    ue_timers: &TimerManager,
) -> (RlcTxUmEntity, RlcRxUmEntity, Arc<RlcTxUpperHandle>) {
    let queue = sdu_queue(cfg.tx.queue_size, cfg.tx.queue_size_bytes);
    let signal = Arc::new(BufferStateSignal::new(notifiers.tx_lower_dn));
    let upper = Arc::new(RlcTxUpperHandle::new(
        ue_index,
        rb_id,
        RlcMode::Um,
        queue.clone(),
        Some(cfg.tx.pdcp_sn_len),
        signal.clone(),
    ));
    let tx = RlcTxUmEntity::new(
        ue_index,
        rb_id,
        cfg.tx.clone(),
        queue,
        upper.clone(),
        notifiers.tx_upper_dn,
        signal,
    );
    let rx = RlcRxUmEntity::new(ue_index, rb_id, cfg.rx.clone(), notifiers.rx_upper_dn, ue_timers);
    (tx, rx, upper)
}

pub(crate) fn new_am_bearer(
    ue_index: UeIndex,
    rb_id: RbId,
    cfg: &RlcAmConfig,
    notifiers: RlcNotifiers,
    lower_timers: &TimerManager,
    ue_timers: &TimerManager,
) -> (RlcTxAmEntity, RlcRxAmEntity, Arc<RlcTxUpperHandle>) {
    let queue = sdu_queue(cfg.tx.queue_size, cfg.tx.queue_size_bytes);
    let signal = Arc::new(BufferStateSignal::new(notifiers.tx_lower_dn));
    let pdcp_sn_len: PdcpSnSize = cfg.tx.pdcp_sn_len;
    let upper = Arc::new(RlcTxUpperHandle::new(
        ue_index,
        rb_id,
        RlcMode::Am,
        queue.clone(),
        Some(pdcp_sn_len),
        signal.clone(),
    ));
    let status_provider = Arc::new(RxAmStatusProvider::new(&cfg.rx, ue_timers));
    let (status_tx, status_rx) = notification_channel();

    let tx = RlcTxAmEntity::new(
        ue_index,
        rb_id,
        cfg.tx.clone(),
        queue,
        upper.clone(),
        status_provider.clone(),
        status_rx,
        notifiers.tx_upper_dn,
        notifiers.tx_upper_cn,
        signal.clone(),
        lower_timers,
    );
    let rx = RlcRxAmEntity::new(
        ue_index,
        rb_id,
        cfg.rx.clone(),
        status_provider,
        status_tx,
        notifiers.rx_upper_dn,
        signal,
        ue_timers,
    );
    (tx, rx, upper)
}

/// Build the Tx and Rx halves of an RLC bearer.
///
/// Tx timers run on `lower_timers`, Rx timers on `ue_timers`. The two may be
/// the same service when both halves share a context.
pub fn create_rlc_entity(
    ue_index: UeIndex,
    rb_id: RbId,
    cfg: &RlcConfig,
    notifiers: RlcNotifiers,
    lower_timers: &TimerManager,
    ue_timers: &TimerManager,
) -> Result<RlcEntity, LayerError> {
    cfg.validate()?;
    info!("ue={} {}: Creating RLC {} entity", ue_index, rb_id, cfg.mode());

    let entity = match cfg {
        RlcConfig::Tm(tm) => {
            let (tx, rx, tx_upper) = new_tm_bearer(ue_index, rb_id, tm, notifiers);
            RlcEntity {
                mode: RlcMode::Tm,
                tx: Box::new(tx),
                rx: Box::new(rx),
                tx_upper,
            }
        }
        RlcConfig::Um(um) => {
            let (tx, rx, tx_upper) = new_um_bearer(ue_index, rb_id, um, notifiers, ue_timers);
            RlcEntity {
                mode: RlcMode::Um,
                tx: Box::new(tx),
                rx: Box::new(rx),
                tx_upper,
            }
        }
        RlcConfig::Am(am) => {
            let (tx, rx, tx_upper) =
                new_am_bearer(ue_index, rb_id, am, notifiers, lower_timers, ue_timers);
            RlcEntity {
                mode: RlcMode::Am,
                tx: Box::new(tx),
                rx: Box::new(rx),
                tx_upper,
            }
        }
    };
    Ok(entity)
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use bytes::Bytes;
    use interfaces::rlc::RlcBufferState;
    use std::sync::Mutex;

    /// Records every notification of an RLC entity
    #[derive(Default)]
    pub(crate) struct MockRlcNotifier {
        pub sdus: Mutex<Vec<Bytes>>,
        pub transmitted: Mutex<Vec<u32>>,
        pub delivered: Mutex<Vec<u32>>,
        pub retransmitted: Mutex<Vec<u32>>,
        pub delivered_retx: Mutex<Vec<u32>>,
        pub max_retx: Mutex<u32>,
        pub protocol_failures: Mutex<u32>,
        pub bs_changed: Mutex<u32>,
        pub bs_updates: Mutex<Vec<RlcBufferState>>,
    }

    impl MockRlcNotifier {
        pub(crate) fn notifiers(self: &Arc<Self>) -> RlcNotifiers {
            RlcNotifiers {
                rx_upper_dn: self.clone(),
                tx_upper_dn: self.clone(),
                tx_upper_cn: self.clone(),
                tx_lower_dn: self.clone(),
            }
        }

        pub(crate) fn take_sdus(&self) -> Vec<Bytes> {
            std::mem::take(&mut *self.sdus.lock().unwrap())
        }

        pub(crate) fn last_bs(&self) -> Option<RlcBufferState> {
            self.bs_updates.lock().unwrap().last().copied()
        }
    }

    impl RlcRxUpperLayerDataNotifier for MockRlcNotifier {
        fn on_new_sdu(&self, sdu: Bytes) {
            self.sdus.lock().unwrap().push(sdu);
        }
    }

    impl RlcTxUpperLayerDataNotifier for MockRlcNotifier {
        fn on_transmitted_sdu(&self, max_tx_pdcp_sn: u32, _desired_buf_size: u32) {
            self.transmitted.lock().unwrap().push(max_tx_pdcp_sn);
        }

        fn on_delivered_sdu(&self, max_deliv_pdcp_sn: u32) {
            self.delivered.lock().unwrap().push(max_deliv_pdcp_sn);
        }

        fn on_retransmitted_sdu(&self, max_retx_pdcp_sn: u32) {
            self.retransmitted.lock().unwrap().push(max_retx_pdcp_sn);
        }

        fn on_delivered_retransmitted_sdu(&self, max_deliv_retx_pdcp_sn: u32) {
            self.delivered_retx.lock().unwrap().push(max_deliv_retx_pdcp_sn);
        }
    }

    impl RlcTxUpperLayerControlNotifier for MockRlcNotifier {
        fn on_protocol_failure(&self) {
            *self.protocol_failures.lock().unwrap() += 1;
        }

        fn on_max_retx(&self) {
            *self.max_retx.lock().unwrap() += 1;
        }
    }

    impl RlcTxLowerLayerNotifier for MockRlcNotifier {
        fn on_buffer_state_changed(&self) {
            *self.bs_changed.lock().unwrap() += 1;
        }

        fn on_buffer_state_update(&self, bs: RlcBufferState) {
            self.bs_updates.lock().unwrap().push(bs);
        }
    }

    /// PDCP data PDU with a 12-bit SN (DRB) and `len` payload bytes
    pub(crate) fn pdcp_pdu(sn: u32, len: usize) -> Bytes {
        let mut pdu = vec![0x80 | ((sn >> 8) & 0x0f) as u8, sn as u8];
        pdu.extend((0..len).map(|i| (sn as usize + i) as u8));
        Bytes::from(pdu)
    }
}
