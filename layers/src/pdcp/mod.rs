//! PDCP Layer Implementation
//!
//! Implements the Packet Data Convergence Protocol according to 3GPP TS 38.323.
//! Each bearer owns a transmitting and a receiving entity; status reports
//! received on the Rx half are handed to the Tx half of the same bearer.

pub mod config;
mod entity;
pub mod metrics;
pub mod pdu;
mod rx;
mod tx;

pub use config::*;
pub use entity::{PdcpEntity, PdcpEntityNotifiers};
pub use metrics::{PdcpRxMetrics, PdcpTxMetrics};
pub use rx::{PdcpEntityRx, PdcpRxState};
pub use tx::{PdcpEntityTx, PdcpTxState};

use crate::security::{CipheringAlgorithm, IntegrityAlgorithm, Sec128AsConfig, SecurityDomain};
use crate::LayerError;
use common::RbId;
use tracing::error;

/// Check a security configuration against the bearer it is applied to
pub(crate) fn validate_security_config(
    rb_id: RbId,
    cfg: &Sec128AsConfig,
    integrity_enabled: bool,
    ciphering_enabled: bool,
) -> Result<(), LayerError> {
    let expected = if rb_id.is_srb() {
        SecurityDomain::Rrc
    } else {
        SecurityDomain::Up
    };
    if cfg.domain != expected {
        error!(
            "{}: Invalid security domain. domain={:?} expected={:?}",
            rb_id, cfg.domain, expected
        );
        return Err(LayerError::InvalidConfiguration(format!(
            "{} requires the {:?} security domain",
            rb_id, expected
        )));
    }

    if rb_id.is_srb() && !integrity_enabled {
        error!("{}: Integrity protection cannot be disabled on SRBs", rb_id);
        return Err(LayerError::InvalidConfiguration(format!(
            "integrity protection is mandatory on {}",
            rb_id
        )));
    }

    if integrity_enabled {
        let Some(integ_algo) = cfg.integ_algo else {
            error!("{}: Integrity enabled without an integrity algorithm", rb_id);
            return Err(LayerError::InvalidConfiguration(
                "integrity enabled without an integrity algorithm".to_string(),
            ));
        };
        if cfg.k_128_int.is_none() {
            error!("{}: Integrity enabled without an integrity key", rb_id);
            return Err(LayerError::InvalidConfiguration(
                "integrity enabled without an integrity key".to_string(),
            ));
        }
        if integ_algo == IntegrityAlgorithm::Nia0 {
            if rb_id.is_drb() {
                error!("{}: NIA0 is not permitted on DRBs", rb_id);
            } else if ciphering_enabled && cfg.cipher_algo != CipheringAlgorithm::Nea0 {
                error!(
                    "{}: NIA0 is only permitted together with NEA0. cipher_algo={:?}",
                    rb_id, cfg.cipher_algo
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_must_match_bearer() {
        let cfg = Sec128AsConfig::null(SecurityDomain::Up);
        assert!(validate_security_config(RbId::Drb(1), &cfg, false, false).is_ok());
        assert!(validate_security_config(RbId::Srb(1), &cfg, true, true).is_err());
    }

    #[test]
    fn test_srb_requires_integrity() {
        let cfg = Sec128AsConfig::null(SecurityDomain::Rrc);
        assert!(validate_security_config(RbId::Srb(2), &cfg, true, false).is_ok());
        assert!(matches!(
            validate_security_config(RbId::Srb(2), &cfg, false, false),
            Err(LayerError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_integrity_needs_algorithm_and_key() {
        let mut cfg = Sec128AsConfig::null(SecurityDomain::Up);
        cfg.k_128_int = None;
        assert!(validate_security_config(RbId::Drb(1), &cfg, true, false).is_err());
        cfg.k_128_int = Some([1; 16]);
        cfg.integ_algo = None;
        assert!(validate_security_config(RbId::Drb(1), &cfg, true, false).is_err());
        assert!(validate_security_config(RbId::Drb(1), &cfg, false, true).is_ok());
    }
}
