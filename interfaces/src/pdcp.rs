//! PDCP boundary traits
//!
//! Notifiers are implemented by the neighbour of the PDCP entity and injected
//! at construction. All methods are fire-and-forget.

use bytes::Bytes;

/// Delivery of SDUs from PDCP Rx to the upper layer (RRC or SDAP)
pub trait PdcpRxUpperDataNotifier: Send + Sync {
    fn on_new_sdu(&self, sdu: Bytes);
}

/// Control events raised by PDCP Rx towards RRC
pub trait PdcpRxUpperControlNotifier: Send + Sync {
    fn on_protocol_failure(&self);
    fn on_integrity_failure(&self);
    fn on_max_count_reached(&self);
}

/// PDUs and discards from PDCP Tx to the lower layer (RLC)
pub trait PdcpTxLowerNotifier: Send + Sync {
    fn on_new_pdu(&self, pdu: Bytes, is_retx: bool);
    fn on_discard_pdu(&self, pdcp_sn: u32);
}

/// Control events raised by PDCP Tx towards RRC
pub trait PdcpTxUpperControlNotifier: Send + Sync {
    fn on_protocol_failure(&self);
    fn on_max_count_reached(&self);
}

/// Receives PDCP status reports that arrived on the Rx half of a bearer
pub trait PdcpTxStatusHandler: Send + Sync {
    fn on_status_report(&self, status: Bytes);
}
