//! Layer Boundary Interfaces Library
//!
//! This crate defines the notifier traits through which the PDCP and RLC
//! entities talk to their neighbours (upper layers, lower layers, the MAC
//! scheduler), and the channel used to hand notifications across execution
//! contexts.

pub mod channel;
pub mod pdcp;
pub mod rlc;

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("Notification channel closed")]
    ChannelClosed,
}
