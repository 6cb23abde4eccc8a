//! RLC bearer configuration (TS 38.331 RLC-Config)

use crate::pdcp::PdcpSnSize;
use crate::LayerError;
use serde::{Deserialize, Serialize};

const DEFAULT_QUEUE_SIZE: u32 = 4096;
const DEFAULT_QUEUE_SIZE_BYTES: u32 = 4096 * 1500;

/// SN field length of UMD PDUs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RlcUmSnSize {
    Size6,
    Size12,
}

impl RlcUmSnSize {
    pub fn bits(self) -> u32 {
        match self {
            RlcUmSnSize::Size6 => 6,
            RlcUmSnSize::Size12 => 12,
        }
    }
}

impl TryFrom<u8> for RlcUmSnSize {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            6 => Ok(RlcUmSnSize::Size6),
            12 => Ok(RlcUmSnSize::Size12),
            other => Err(format!("invalid RLC UM SN size {}", other)),
        }
    }
}

impl From<RlcUmSnSize> for u8 {
    fn from(size: RlcUmSnSize) -> u8 {
        size.bits() as u8
    }
}

/// SN field length of AMD PDUs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RlcAmSnSize {
    Size12,
    Size18,
}

impl RlcAmSnSize {
    pub fn bits(self) -> u32 {
        match self {
            RlcAmSnSize::Size12 => 12,
            RlcAmSnSize::Size18 => 18,
        }
    }
}

impl TryFrom<u8> for RlcAmSnSize {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            12 => Ok(RlcAmSnSize::Size12),
            18 => Ok(RlcAmSnSize::Size18),
            other => Err(format!("invalid RLC AM SN size {}", other)),
        }
    }
}

impl From<RlcAmSnSize> for u8 {
    fn from(size: RlcAmSnSize) -> u8 {
        size.bits() as u8
    }
}

fn validate_queue(queue_size: u32, queue_size_bytes: u32) -> Result<(), LayerError> {
    if queue_size == 0 {
        return Err(LayerError::InvalidConfiguration(
            "RLC SDU queue size must be positive".to_string(),
        ));
    }
    if queue_size_bytes == 0 {
        return Err(LayerError::InvalidConfiguration(
            "RLC SDU queue byte limit must be positive".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RlcTxTmConfig {
    pub queue_size: u32,
    pub queue_size_bytes: u32,
}

impl Default for RlcTxTmConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            queue_size_bytes: DEFAULT_QUEUE_SIZE_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RlcTmConfig {
    pub tx: RlcTxTmConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RlcTxUmConfig {
    pub sn_field_length: RlcUmSnSize,
    /// SN length of the PDCP PDUs carried as SDUs
    pub pdcp_sn_len: PdcpSnSize,
    pub queue_size: u32,
    pub queue_size_bytes: u32,
}

impl Default for RlcTxUmConfig {
    fn default() -> Self {
        Self {
            sn_field_length: RlcUmSnSize::Size12,
            pdcp_sn_len: PdcpSnSize::Size12,
            queue_size: DEFAULT_QUEUE_SIZE,
            queue_size_bytes: DEFAULT_QUEUE_SIZE_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RlcRxUmConfig {
    pub sn_field_length: RlcUmSnSize,
    /// t-Reassembly in ms, 0 expires on the next tick
    pub t_reassembly: u32,
}

impl Default for RlcRxUmConfig {
    fn default() -> Self {
        Self {
            sn_field_length: RlcUmSnSize::Size12,
            t_reassembly: 35,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RlcUmConfig {
    pub tx: RlcTxUmConfig,
    pub rx: RlcRxUmConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RlcTxAmConfig {
    pub sn_field_length: RlcAmSnSize,
    pub pdcp_sn_len: PdcpSnSize,
    /// t-PollRetransmit in ms
    pub t_poll_retx: u32,
    pub max_retx_thresh: u32,
    /// PDUs between polls, `None` for infinity
    pub poll_pdu: Option<u32>,
    /// Bytes between polls, `None` for infinity
    pub poll_byte: Option<u32>,
    /// Cap on the Tx window below AM_Window_Size, 0 for none
    pub max_window: u32,
    pub queue_size: u32,
    pub queue_size_bytes: u32,
}

impl Default for RlcTxAmConfig {
    fn default() -> Self {
        Self {
            sn_field_length: RlcAmSnSize::Size12,
            pdcp_sn_len: PdcpSnSize::Size12,
            t_poll_retx: 45,
            max_retx_thresh: 8,
            poll_pdu: Some(16),
            poll_byte: Some(25_000),
            max_window: 0,
            queue_size: DEFAULT_QUEUE_SIZE,
            queue_size_bytes: DEFAULT_QUEUE_SIZE_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RlcRxAmConfig {
    pub sn_field_length: RlcAmSnSize,
    /// t-Reassembly in ms
    pub t_reassembly: u32,
    /// t-StatusProhibit in ms, 0 disables the prohibit
    pub t_status_prohibit: u32,
    /// Upper bound on the SNs visited when building a status report
    pub max_sn_per_status: Option<u32>,
}

impl Default for RlcRxAmConfig {
    fn default() -> Self {
        Self {
            sn_field_length: RlcAmSnSize::Size12,
            t_reassembly: 35,
            t_status_prohibit: 10,
            max_sn_per_status: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RlcAmConfig {
    pub tx: RlcTxAmConfig,
    pub rx: RlcRxAmConfig,
}

/// Mode-specific RLC configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RlcConfig {
    Tm(RlcTmConfig),
    Um(RlcUmConfig),
    Am(RlcAmConfig),
}

impl Default for RlcConfig {
    fn default() -> Self {
        RlcConfig::Am(RlcAmConfig::default())
    }
}

impl RlcConfig {
    pub fn mode(&self) -> super::RlcMode {
        match self {
            RlcConfig::Tm(_) => super::RlcMode::Tm,
            RlcConfig::Um(_) => super::RlcMode::Um,
            RlcConfig::Am(_) => super::RlcMode::Am,
        }
    }

    pub fn validate(&self) -> Result<(), LayerError> {
        match self {
            RlcConfig::Tm(cfg) => validate_queue(cfg.tx.queue_size, cfg.tx.queue_size_bytes),
            RlcConfig::Um(cfg) => {
                if cfg.tx.sn_field_length != cfg.rx.sn_field_length {
                    return Err(LayerError::InvalidConfiguration(
                        "RLC UM Tx and Rx SN field lengths differ".to_string(),
                    ));
                }
                validate_queue(cfg.tx.queue_size, cfg.tx.queue_size_bytes)
            }
            RlcConfig::Am(cfg) => {
                if cfg.tx.sn_field_length != cfg.rx.sn_field_length {
                    return Err(LayerError::InvalidConfiguration(
                        "RLC AM Tx and Rx SN field lengths differ".to_string(),
                    ));
                }
                if cfg.tx.max_retx_thresh == 0 {
                    return Err(LayerError::InvalidConfiguration(
                        "max_retx_thresh must be positive".to_string(),
                    ));
                }
                if cfg.tx.t_poll_retx == 0 {
                    return Err(LayerError::InvalidConfiguration(
                        "t_poll_retx must be positive".to_string(),
                    ));
                }
                let window = common::sn::window_size(cfg.rx.sn_field_length.bits());
                if let Some(max_sn) = cfg.rx.max_sn_per_status {
                    if max_sn == 0 || max_sn > window {
                        return Err(LayerError::InvalidConfiguration(format!(
                            "max_sn_per_status must be within 1..={}, got {}",
                            window, max_sn
                        )));
                    }
                }
                validate_queue(cfg.tx.queue_size, cfg.tx.queue_size_bytes)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_am_config_from_yaml() {
        let yaml = r#"
mode: am
tx:
  sn_field_length: 18
  t_poll_retx: 20
  poll_pdu: null
rx:
  sn_field_length: 18
  max_sn_per_status: 128
"#;
        let cfg: RlcConfig = serde_yaml::from_str(yaml).unwrap();
        let RlcConfig::Am(am) = &cfg else {
            panic!("expected AM config");
        };
        assert_eq!(am.tx.sn_field_length, RlcAmSnSize::Size18);
        assert_eq!(am.tx.t_poll_retx, 20);
        assert_eq!(am.tx.poll_pdu, None);
        assert_eq!(am.tx.poll_byte, Some(25_000));
        assert_eq!(am.rx.t_status_prohibit, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_um_sn_size_rejected() {
        let yaml = "mode: um\ntx:\n  sn_field_length: 7\n";
        assert!(serde_yaml::from_str::<RlcConfig>(yaml).is_err());
    }

    #[test]
    fn test_mismatched_sn_lengths() {
        let mut cfg = RlcAmConfig::default();
        cfg.rx.sn_field_length = RlcAmSnSize::Size18;
        assert!(matches!(
            RlcConfig::Am(cfg).validate(),
            Err(LayerError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_max_sn_per_status_bounds() {
        let mut cfg = RlcAmConfig::default();
        cfg.rx.max_sn_per_status = Some(0);
        assert!(RlcConfig::Am(cfg.clone()).validate().is_err());
        cfg.rx.max_sn_per_status = Some(2049);
        assert!(RlcConfig::Am(cfg.clone()).validate().is_err());
        cfg.rx.max_sn_per_status = Some(2048);
        assert!(RlcConfig::Am(cfg).validate().is_ok());
    }

    #[test]
    fn test_tm_queue_must_be_positive() {
        let cfg = RlcConfig::Tm(RlcTmConfig {
            tx: RlcTxTmConfig {
                queue_size: 0,
                queue_size_bytes: 100,
            },
        });
        assert!(cfg.validate().is_err());
    }
}
