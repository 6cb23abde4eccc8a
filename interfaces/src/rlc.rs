//! RLC boundary traits
//!
//! Upper notifiers point at PDCP (or RRC for SRB0), the lower notifier points
//! at the MAC scheduler.

use bytes::Bytes;
use std::time::Instant;

/// Pending data reported to the MAC scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RlcBufferState {
    /// Bytes pending transmission, including estimated header overhead
    pub pending_bytes: u32,
    /// Arrival time of the head-of-line SDU
    pub hol_toa: Option<Instant>,
}

/// Data path notifications from RLC Tx towards PDCP Tx
pub trait RlcTxUpperLayerDataNotifier: Send + Sync {
    /// All SDUs up to and including `max_tx_pdcp_sn` left the RLC entity
    fn on_transmitted_sdu(&self, max_tx_pdcp_sn: u32, desired_buf_size: u32);
    /// All SDUs up to and including `max_deliv_pdcp_sn` were acknowledged by the peer
    fn on_delivered_sdu(&self, max_deliv_pdcp_sn: u32);
    fn on_retransmitted_sdu(&self, max_retx_pdcp_sn: u32);
    fn on_delivered_retransmitted_sdu(&self, max_deliv_retx_pdcp_sn: u32);
}

/// Control path notifications from RLC Tx towards RRC
pub trait RlcTxUpperLayerControlNotifier: Send + Sync {
    fn on_protocol_failure(&self);
    fn on_max_retx(&self);
}

/// Buffer state signalling from RLC Tx towards the MAC scheduler
pub trait RlcTxLowerLayerNotifier: Send + Sync {
    /// The buffer changed outside the lower context; the owner of the lower
    /// context should call `update_mac_buffer_state` on the entity.
    fn on_buffer_state_changed(&self);
    fn on_buffer_state_update(&self, bs: RlcBufferState);
}

/// Delivery of reassembled SDUs from RLC Rx to the upper layer
pub trait RlcRxUpperLayerDataNotifier: Send + Sync {
    fn on_new_sdu(&self, sdu: Bytes);
}

/// SDU input of an RLC Tx entity, callable from the upper context
pub trait RlcTxUpperLayerDataInterface: Send + Sync {
    fn handle_sdu(&self, sdu: Bytes, is_retx: bool);
    fn discard_sdu(&self, pdcp_sn: u32);
}

/// PDU output of an RLC Tx entity, driven by the lower context
pub trait RlcTxLowerLayerInterface: Send {
    /// Write the next PDU into `buf` and return its length (0 if nothing fits)
    fn pull_pdu(&mut self, buf: &mut [u8]) -> usize;
    fn get_buffer_state(&mut self) -> RlcBufferState;
}

/// PDU input of an RLC Rx entity
pub trait RlcRxLowerLayerInterface: Send {
    fn handle_pdu(&mut self, pdu: Bytes);
}
