//! Common Utilities and Types Library
//!
//! This crate provides shared types and utilities used across the L2 user plane:
//! identifiers, slot arithmetic, SN/COUNT arithmetic, SDU windows and the
//! cooperative timer service.

pub mod sdu_window;
pub mod slot;
pub mod sn;
pub mod timers;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use sdu_window::SduWindow;
pub use slot::SlotPoint;
pub use timers::{TimerId, TimerManager, UniqueTimer};
pub use types::*;
pub use utils::*;
