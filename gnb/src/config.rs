//! YAML/TOML configuration of the L2 loopback application

use anyhow::{anyhow, bail, Context};
use common::{Lcid, Pci, PlmnId, SNssai, SubcarrierSpacing};
use layers::mac::slicing::{RrmPolicyMember, SliceCellConfig, SliceRrmPolicyConfig, TddPattern};
use layers::pdcp::{PdcpConfig, PdcpRlcMode, PdcpSnSize};
use layers::rlc::RlcConfig;
use layers::security::{
    CipheringAlgorithm, IntegrityAlgorithm, Sec128AsConfig, SecKey, SecurityDirection,
    SecurityDomain,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoopbackConfig {
    /// Bearer under test
    #[serde(default)]
    pub bearer: BearerConfig,
    /// Cell seen by the slice scheduler
    #[serde(default)]
    pub cell: CellConfig,
    /// RRM policies, one RAN slice each
    #[serde(default)]
    pub slices: Vec<SliceConfig>,
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// DRB configuration. The gNB side uses it as is, the UE side mirrors the directions.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BearerConfig {
    /// DRB identity
    #[serde(default = "default_drb_id")]
    pub drb_id: u8,
    /// Logical channel of the DRB
    #[serde(default = "default_lcid")]
    pub lcid: u8,
    /// Slice the DRB is mapped to, the default DRB slice if unset
    #[serde(default)]
    pub s_nssai: Option<SNssai>,
    #[serde(default = "default_pdcp_config")]
    pub pdcp: PdcpConfig,
    #[serde(default)]
    pub rlc: RlcConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

fn default_drb_id() -> u8 {
    1
}

fn default_lcid() -> u8 {
    4
}

fn default_pdcp_config() -> PdcpConfig {
    PdcpConfig::drb(PdcpRlcMode::Am, PdcpSnSize::Size12, SecurityDirection::Downlink)
}

impl Default for BearerConfig {
    fn default() -> Self {
        Self {
            drb_id: default_drb_id(),
            lcid: default_lcid(),
            s_nssai: None,
            pdcp: default_pdcp_config(),
            rlc: RlcConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl BearerConfig {
    /// PDCP configuration of the UE side of the bearer
    pub fn mirrored_pdcp(&self) -> PdcpConfig {
        let mut cfg = self.pdcp.clone();
        cfg.tx.direction = self.pdcp.tx.direction.opposite();
        cfg.rx.direction = self.pdcp.rx.direction.opposite();
        cfg
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.drb_id == 0 || self.drb_id > 32 {
            bail!("Invalid DRB id: {}", self.drb_id);
        }
        if Lcid(self.lcid).is_srb() || self.lcid > 32 {
            bail!("Invalid DRB LCID: {}", self.lcid);
        }
        self.pdcp.validate()?;
        self.rlc.validate()?;

        let (rlc_mode, pdcp_sn_len) = match &self.rlc {
            RlcConfig::Tm(_) => bail!("DRBs cannot be mapped on RLC TM"),
            RlcConfig::Um(um) => (PdcpRlcMode::Um, um.tx.pdcp_sn_len),
            RlcConfig::Am(am) => (PdcpRlcMode::Am, am.tx.pdcp_sn_len),
        };
        if self.pdcp.tx.rlc_mode != rlc_mode || self.pdcp.rx.rlc_mode != rlc_mode {
            bail!(
                "PDCP expects RLC {:?} but RLC is configured in {}",
                self.pdcp.tx.rlc_mode,
                self.rlc.mode()
            );
        }
        if self.pdcp.tx.sn_size != pdcp_sn_len {
            bail!(
                "RLC pdcp_sn_len {} differs from the PDCP SN size {}",
                pdcp_sn_len.bits(),
                self.pdcp.tx.sn_size.bits()
            );
        }
        self.security.as_config()?;
        Ok(())
    }
}

/// User plane security of the bearer, applied on both sides
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// Enable 128-NIA2
    #[serde(default)]
    pub integrity: bool,
    /// Enable 128-NEA2
    #[serde(default)]
    pub ciphering: bool,
    /// 128-bit key as 32 hex digits, all zeros if unset
    #[serde(default)]
    pub key: Option<String>,
}

impl SecurityConfig {
    pub fn enabled(&self) -> bool {
        self.integrity || self.ciphering
    }

    pub fn as_config(&self) -> anyhow::Result<Sec128AsConfig> {
        let key = match &self.key {
            Some(hex) => parse_key(hex)?,
            None => [0; 16],
        };
        Ok(Sec128AsConfig {
            domain: SecurityDomain::Up,
            integ_algo: Some(IntegrityAlgorithm::Nia2),
            cipher_algo: CipheringAlgorithm::Nea2,
            k_128_int: Some(key),
            k_128_enc: key,
        })
    }
}

fn parse_key(hex: &str) -> anyhow::Result<SecKey> {
    let hex = hex.trim();
    if hex.len() != 32 || !hex.is_ascii() {
        bail!("Security key must be 32 hex digits, got {:?}", hex);
    }
    let mut key = [0u8; 16];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
            .with_context(|| format!("Invalid security key {:?}", hex))?;
    }
    Ok(key)
}

/// Cell configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfig {
    /// Physical Cell ID
    #[serde(default)]
    pub pci: u16,
    /// PLMN (e.g. "00101")
    #[serde(default = "default_plmn")]
    pub plmn: String,
    /// Subcarrier spacing in kHz
    #[serde(default = "default_scs_khz")]
    pub scs_khz: u16,
    /// CRBs of the carrier
    #[serde(default = "default_nof_crbs")]
    pub nof_crbs: u32,
    /// PUSCH k2 values
    #[serde(default = "default_k2_list")]
    pub k2_list: Vec<u32>,
    /// TDD pattern, FDD if unset
    #[serde(default)]
    pub tdd: Option<TddPattern>,
}

fn default_plmn() -> String {
    "00101".to_string()
}

fn default_scs_khz() -> u16 {
    15
}

fn default_nof_crbs() -> u32 {
    52
}

fn default_k2_list() -> Vec<u32> {
    vec![4]
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            pci: 0,
            plmn: default_plmn(),
            scs_khz: default_scs_khz(),
            nof_crbs: default_nof_crbs(),
            k2_list: default_k2_list(),
            tdd: None,
        }
    }
}

impl CellConfig {
    pub fn plmn_id(&self) -> anyhow::Result<PlmnId> {
        PlmnId::parse(&self.plmn).ok_or_else(|| anyhow!("Invalid PLMN: {}", self.plmn))
    }

    pub fn scs(&self) -> anyhow::Result<SubcarrierSpacing> {
        SubcarrierSpacing::from_khz(self.scs_khz)
            .ok_or_else(|| anyhow!("Invalid subcarrier spacing: {} kHz", self.scs_khz))
    }

    pub fn slice_cell_config(&self) -> anyhow::Result<SliceCellConfig> {
        let pci = Pci::new(self.pci).ok_or_else(|| anyhow!("Invalid PCI: {}", self.pci))?;
        let cfg = SliceCellConfig {
            pci,
            scs: self.scs()?,
            nof_crbs: self.nof_crbs,
            k2_list: self.k2_list.clone(),
            tdd: self.tdd,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Slice configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SliceConfig {
    /// Slice/Service Type
    pub sst: u8,
    /// Slice Differentiator (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sd: Option<u32>,
    #[serde(default)]
    pub min_prb_ratio: u32,
    #[serde(default = "default_max_prb_ratio")]
    pub max_prb_ratio: u32,
    #[serde(default)]
    pub priority: u32,
}

fn default_max_prb_ratio() -> u32 {
    100
}

impl SliceConfig {
    pub fn s_nssai(&self) -> SNssai {
        SNssai {
            sst: self.sst,
            sd: self.sd,
        }
    }
}

/// Traffic and radio link model
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Run time in ms, until Ctrl-C if unset
    pub duration_ms: Option<u64>,
    /// DL SDUs generated per ms
    pub sdus_per_ms: u32,
    /// DL SDU size in bytes
    pub sdu_size: usize,
    /// The UE sends every received SDU back in UL
    pub echo: bool,
    /// Probability that a MAC PDU is lost on the air interface
    pub loss_probability: f64,
    /// Payload bytes carried per PRB
    pub bytes_per_prb: u32,
    /// Period of the metrics report in ms, 0 disables it
    pub metrics_period_ms: u64,
    /// Seed of the loss model, random if unset
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration_ms: None,
            sdus_per_ms: 1,
            sdu_size: 1000,
            echo: true,
            loss_probability: 0.0,
            bytes_per_prb: 100,
            metrics_period_ms: 1000,
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.loss_probability) {
            bail!("loss_probability {} not in [0, 1]", self.loss_probability);
        }
        if self.bytes_per_prb == 0 {
            bail!("bytes_per_prb must not be zero");
        }
        if self.sdu_size < 8 {
            bail!("sdu_size must be at least 8 bytes, got {}", self.sdu_size);
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// All layers log level
    #[serde(default = "default_log_level")]
    pub all_level: String,
    /// MAC layer log level
    #[serde(default)]
    pub mac_level: Option<String>,
    /// RLC layer log level
    #[serde(default)]
    pub rlc_level: Option<String>,
    /// PDCP layer log level
    #[serde(default)]
    pub pdcp_level: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            all_level: default_log_level(),
            mac_level: None,
            rlc_level: None,
            pdcp_level: None,
        }
    }
}

impl LogConfig {
    /// `tracing_subscriber::EnvFilter` directive for the configured levels
    pub fn filter_directive(&self) -> String {
        let mut directive = self.all_level.clone();
        let layers = [
            ("layers::mac", &self.mac_level),
            ("layers::rlc", &self.rlc_level),
            ("layers::pdcp", &self.pdcp_level),
        ];
        for (target, level) in layers {
            if let Some(level) = level {
                directive.push_str(&format!(",{}={}", target, level));
            }
        }
        directive
    }
}

impl LoopbackConfig {
    /// Load configuration from a TOML (`.toml`) or YAML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        let config: LoopbackConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&contents)?,
            _ => serde_yaml::from_str(&contents)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.bearer.validate()?;
        self.cell.slice_cell_config()?;
        self.cell.plmn_id()?;
        self.simulation.validate()?;
        if let Some(s_nssai) = &self.bearer.s_nssai {
            if !self.slices.iter().any(|s| s.s_nssai() == *s_nssai) {
                bail!("Bearer S-NSSAI {:?} matches no configured slice", s_nssai);
            }
        }
        Ok(())
    }

    pub fn rrm_policies(&self) -> anyhow::Result<Vec<SliceRrmPolicyConfig>> {
        let plmn = self.cell.plmn_id()?;
        Ok(self
            .slices
            .iter()
            .map(|s| SliceRrmPolicyConfig {
                member: RrmPolicyMember {
                    plmn,
                    s_nssai: s.s_nssai(),
                },
                min_prb_ratio: s.min_prb_ratio,
                max_prb_ratio: s.max_prb_ratio,
                priority: s.priority,
            })
            .collect())
    }

    /// RRM policy member the DRB is mapped to
    pub fn bearer_rrm_policy(&self) -> anyhow::Result<Option<RrmPolicyMember>> {
        let plmn = self.cell.plmn_id()?;
        Ok(self
            .bearer
            .s_nssai
            .map(|s_nssai| RrmPolicyMember { plmn, s_nssai }))
    }
}
