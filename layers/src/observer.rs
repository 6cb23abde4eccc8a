//! Protocol event observer
//!
//! Entities report every PDU they send or receive to an observer. The default
//! observer discards everything; the loopback binary installs one that traces
//! PDUs as hex dumps.

use common::{RbId, UeIndex};
use std::sync::Arc;

/// Direction of a PDU relative to the entity reporting it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduDirection {
    Tx,
    Rx,
}

pub trait ProtocolObserver: Send + Sync {
    fn on_pdcp_pdu(&self, _ue: UeIndex, _rb: RbId, _dir: PduDirection, _pdu: &[u8]) {}

    fn on_rlc_pdu(&self, _ue: UeIndex, _rb: RbId, _dir: PduDirection, _pdu: &[u8]) {}
}

/// Observer that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProtocolObserver for NoopObserver {}

pub fn noop_observer() -> Arc<dyn ProtocolObserver> {
    Arc::new(NoopObserver)
}
