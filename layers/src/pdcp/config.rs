//! PDCP entity configuration (TS 38.331 PDCP-Config plus local options)

use crate::security::SecurityDirection;
use crate::LayerError;
use serde::{Deserialize, Serialize};

/// PDCP SN field length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PdcpSnSize {
    Size12 = 12,
    Size18 = 18,
}

impl PdcpSnSize {
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Length of a data PDU header in bytes
    pub fn header_len(self) -> usize {
        match self {
            PdcpSnSize::Size12 => 2,
            PdcpSnSize::Size18 => 3,
        }
    }
}

impl TryFrom<u8> for PdcpSnSize {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            12 => Ok(PdcpSnSize::Size12),
            18 => Ok(PdcpSnSize::Size18),
            other => Err(format!("invalid PDCP SN size {}", other)),
        }
    }
}

impl From<PdcpSnSize> for u8 {
    fn from(sn: PdcpSnSize) -> u8 {
        sn as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdcpRbType {
    Srb,
    Drb,
}

/// Mode of the RLC entity below the PDCP entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdcpRlcMode {
    Um,
    Am,
}

/// Timer value that is either a number of milliseconds or the keyword `infinity`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum TimerValue {
    Ms(u32),
    Keyword(String),
}

/// t-Reordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TimerValue", into = "TimerValue")]
pub enum PdcpTReordering {
    /// Expire immediately (0 ms) or after the given number of milliseconds
    Ms(u32),
    Infinity,
}

/// discardTimer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TimerValue", into = "TimerValue")]
pub enum PdcpDiscardTimer {
    Ms(u32),
    Infinity,
}

macro_rules! timer_value_conversions {
    ($ty:ident) => {
        impl TryFrom<TimerValue> for $ty {
            type Error = String;

            fn try_from(value: TimerValue) -> Result<Self, Self::Error> {
                match value {
                    TimerValue::Ms(ms) => Ok($ty::Ms(ms)),
                    TimerValue::Keyword(k) if k.eq_ignore_ascii_case("infinity") => Ok($ty::Infinity),
                    TimerValue::Keyword(k) => Err(format!("invalid timer value '{}'", k)),
                }
            }
        }

        impl From<$ty> for TimerValue {
            fn from(value: $ty) -> TimerValue {
                match value {
                    $ty::Ms(ms) => TimerValue::Ms(ms),
                    $ty::Infinity => TimerValue::Keyword("infinity".to_string()),
                }
            }
        }
    };
}

timer_value_conversions!(PdcpTReordering);
timer_value_conversions!(PdcpDiscardTimer);

/// COUNT ceilings. Crossing `notify` warns the upper layer once, reaching `hard` stops the bearer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdcpMaxCount {
    pub notify: u32,
    pub hard: u32,
}

impl Default for PdcpMaxCount {
    fn default() -> Self {
        Self {
            notify: 0xc000_0000,
            hard: 0xfc00_0000,
        }
    }
}

/// Local Tx options not signalled over the air
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdcpCustomConfigTx {
    /// Maximum number of SDUs handed to RLC but not yet transmitted
    pub rlc_sdu_queue: u32,
    /// Log dropped SDUs as warnings instead of info
    pub warn_on_drop: bool,
    /// Treat every PDU as transmitted as soon as it is handed to RLC
    pub test_mode: bool,
    pub max_count: PdcpMaxCount,
}

impl Default for PdcpCustomConfigTx {
    fn default() -> Self {
        Self {
            rlc_sdu_queue: 4096,
            warn_on_drop: false,
            test_mode: false,
            max_count: PdcpMaxCount::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdcpCustomConfigRx {
    pub max_count: PdcpMaxCount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdcpTxConfig {
    pub rb_type: PdcpRbType,
    pub rlc_mode: PdcpRlcMode,
    pub sn_size: PdcpSnSize,
    pub direction: SecurityDirection,
    /// `None` keeps no Tx window at all
    #[serde(default)]
    pub discard_timer: Option<PdcpDiscardTimer>,
    #[serde(default)]
    pub status_report_required: bool,
    #[serde(default)]
    pub custom: PdcpCustomConfigTx,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdcpRxConfig {
    pub rb_type: PdcpRbType,
    pub rlc_mode: PdcpRlcMode,
    pub sn_size: PdcpSnSize,
    pub direction: SecurityDirection,
    pub t_reordering: PdcpTReordering,
    #[serde(default)]
    pub custom: PdcpCustomConfigRx,
}

fn validate_bearer(rb_type: PdcpRbType, rlc_mode: PdcpRlcMode, sn_size: PdcpSnSize) -> Result<(), LayerError> {
    if rb_type == PdcpRbType::Srb {
        if rlc_mode != PdcpRlcMode::Am {
            return Err(LayerError::InvalidConfiguration(
                "SRBs must be mapped on RLC AM".to_string(),
            ));
        }
        if sn_size != PdcpSnSize::Size12 {
            return Err(LayerError::InvalidConfiguration(
                "SRBs must use 12 bit PDCP SNs".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_max_count(max_count: &PdcpMaxCount) -> Result<(), LayerError> {
    if max_count.notify >= max_count.hard {
        return Err(LayerError::InvalidConfiguration(format!(
            "max_count.notify ({:#x}) must be below max_count.hard ({:#x})",
            max_count.notify, max_count.hard
        )));
    }
    Ok(())
}

impl PdcpTxConfig {
    pub fn validate(&self) -> Result<(), LayerError> {
        validate_bearer(self.rb_type, self.rlc_mode, self.sn_size)?;
        validate_max_count(&self.custom.max_count)?;
        if self.custom.rlc_sdu_queue == 0 {
            return Err(LayerError::InvalidConfiguration(
                "rlc_sdu_queue must not be zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl PdcpRxConfig {
    pub fn validate(&self) -> Result<(), LayerError> {
        validate_bearer(self.rb_type, self.rlc_mode, self.sn_size)?;
        validate_max_count(&self.custom.max_count)
    }
}

/// Tx and Rx configuration of one bearer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdcpConfig {
    pub tx: PdcpTxConfig,
    pub rx: PdcpRxConfig,
}

impl PdcpConfig {
    /// SRB configuration as used for SRB1/SRB2
    pub fn srb(direction: SecurityDirection) -> Self {
        Self {
            tx: PdcpTxConfig {
                rb_type: PdcpRbType::Srb,
                rlc_mode: PdcpRlcMode::Am,
                sn_size: PdcpSnSize::Size12,
                direction,
                discard_timer: Some(PdcpDiscardTimer::Infinity),
                status_report_required: false,
                custom: PdcpCustomConfigTx::default(),
            },
            rx: PdcpRxConfig {
                rb_type: PdcpRbType::Srb,
                rlc_mode: PdcpRlcMode::Am,
                sn_size: PdcpSnSize::Size12,
                direction: direction.opposite(),
                t_reordering: PdcpTReordering::Infinity,
                custom: PdcpCustomConfigRx::default(),
            },
        }
    }

    /// DRB configuration with the given RLC mode and SN size
    pub fn drb(rlc_mode: PdcpRlcMode, sn_size: PdcpSnSize, direction: SecurityDirection) -> Self {
        Self {
            tx: PdcpTxConfig {
                rb_type: PdcpRbType::Drb,
                rlc_mode,
                sn_size,
                direction,
                discard_timer: Some(PdcpDiscardTimer::Ms(100)),
                status_report_required: rlc_mode == PdcpRlcMode::Am,
                custom: PdcpCustomConfigTx::default(),
            },
            rx: PdcpRxConfig {
                rb_type: PdcpRbType::Drb,
                rlc_mode,
                sn_size,
                direction: direction.opposite(),
                t_reordering: PdcpTReordering::Ms(35),
                custom: PdcpCustomConfigRx::default(),
            },
        }
    }

    pub fn validate(&self) -> Result<(), LayerError> {
        self.tx.validate()?;
        self.rx.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_values_from_yaml() {
        let t: PdcpTReordering = serde_yaml::from_str("35").unwrap();
        assert_eq!(t, PdcpTReordering::Ms(35));
        let t: PdcpTReordering = serde_yaml::from_str("infinity").unwrap();
        assert_eq!(t, PdcpTReordering::Infinity);
        assert!(serde_yaml::from_str::<PdcpDiscardTimer>("forever").is_err());
    }

    #[test]
    fn test_sn_size_from_yaml() {
        let sn: PdcpSnSize = serde_yaml::from_str("18").unwrap();
        assert_eq!(sn, PdcpSnSize::Size18);
        assert_eq!(sn.header_len(), 3);
        assert!(serde_yaml::from_str::<PdcpSnSize>("16").is_err());
    }

    #[test]
    fn test_srb_on_um_rejected() {
        let mut cfg = PdcpConfig::srb(SecurityDirection::Downlink);
        cfg.tx.rlc_mode = PdcpRlcMode::Um;
        assert!(matches!(cfg.validate(), Err(LayerError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_max_count_order_checked() {
        let mut cfg = PdcpConfig::drb(PdcpRlcMode::Am, PdcpSnSize::Size18, SecurityDirection::Downlink);
        assert!(cfg.validate().is_ok());
        cfg.rx.custom.max_count.notify = cfg.rx.custom.max_count.hard;
        assert!(cfg.validate().is_err());
    }
}
