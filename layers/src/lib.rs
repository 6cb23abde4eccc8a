//! L2 User Plane Layers Library
//!
//! This crate implements the 5G NR user-plane protocol entities of a gNB:
//! PDCP (TS 38.323), RLC in TM/UM/AM (TS 38.322), the PDCP security engine
//! (TS 33.501) and the MAC inter-slice scheduler.

pub mod mac;
pub mod observer;
pub mod pdcp;
pub mod rlc;
pub mod security;

use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}
