//! Access Stratum security for PDCP
//!
//! Implements ciphering (NEA0, 128-NEA2) and integrity protection (NIA0,
//! 128-NIA2) according to 3GPP TS 33.501 Annex D. NEA2 is AES-128 in counter
//! mode, NIA2 is AES-128-CMAC truncated to 32 bits.

use aes::Aes128;
use bytes::{BufMut, BytesMut};
use cmac::{Cmac, Mac};
use ctr::cipher::{KeyIvInit, StreamCipher};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Length of the MAC-I field appended to protected PDUs
pub const MAC_I_LEN: usize = 4;

/// 128-bit security key
pub type SecKey = [u8; 16];

/// Which part of the stack a security context protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityDomain {
    /// Control plane (SRBs)
    Rrc,
    /// User plane (DRBs)
    Up,
}

/// Ciphering algorithms (TS 33.501 clause 5.11.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipheringAlgorithm {
    Nea0,
    Nea1,
    Nea2,
    Nea3,
}

/// Integrity algorithms (TS 33.501 clause 5.11.1.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityAlgorithm {
    Nia0,
    Nia1,
    Nia2,
    Nia3,
}

/// DIRECTION input of the security algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityDirection {
    Uplink = 0,
    Downlink = 1,
}

impl SecurityDirection {
    pub fn opposite(self) -> Self {
        match self {
            SecurityDirection::Uplink => SecurityDirection::Downlink,
            SecurityDirection::Downlink => SecurityDirection::Uplink,
        }
    }
}

/// Keys and algorithms of a 128-bit AS security context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sec128AsConfig {
    pub domain: SecurityDomain,
    pub integ_algo: Option<IntegrityAlgorithm>,
    pub cipher_algo: CipheringAlgorithm,
    pub k_128_int: Option<SecKey>,
    pub k_128_enc: SecKey,
}

impl Sec128AsConfig {
    /// Null algorithms for the given domain, with integrity enabled on RRC
    pub fn null(domain: SecurityDomain) -> Self {
        Self {
            domain,
            integ_algo: Some(IntegrityAlgorithm::Nia0),
            cipher_algo: CipheringAlgorithm::Nea0,
            k_128_int: Some([0; 16]),
            k_128_enc: [0; 16],
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("Integrity check failed")]
    IntegrityFailure,

    #[error("Ciphering failed")]
    CipheringFailure,

    #[error("Buffer too short for protected PDU")]
    BufferFailure,

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Missing key: {0}")]
    MissingKey(&'static str),
}

/// Transmit side of a security engine
pub trait SecurityEngineTx: Send {
    /// Append MAC-I over `buf` (when integrity is enabled), then cipher everything after `hdr_len`
    fn encrypt_and_protect_integrity(
        &self,
        buf: BytesMut,
        hdr_len: usize,
        count: u32,
    ) -> Result<BytesMut, SecurityError>;
}

/// Receive side of a security engine
pub trait SecurityEngineRx: Send {
    /// Decipher everything after `hdr_len`, verify and strip the MAC-I
    fn decrypt_and_verify_integrity(
        &self,
        buf: BytesMut,
        hdr_len: usize,
        count: u32,
    ) -> Result<BytesMut, SecurityError>;
}

#[derive(Debug, Clone)]
enum Integrity {
    Nia0,
    Nia2(SecKey),
}

#[derive(Debug, Clone)]
enum Ciphering {
    Nea0,
    Nea2(SecKey),
}

/// Security engine bound to one bearer and direction
#[derive(Debug, Clone)]
pub struct SecurityEngine {
    bearer_id: u8,
    direction: SecurityDirection,
    integrity: Option<Integrity>,
    ciphering: Option<Ciphering>,
}

impl SecurityEngine {
    pub fn new(
        cfg: &Sec128AsConfig,
        bearer_id: u8,
        direction: SecurityDirection,
        integrity_enabled: bool,
        ciphering_enabled: bool,
    ) -> Result<Self, SecurityError> {
        let integrity = if integrity_enabled {
            let algo = cfg.integ_algo.ok_or(SecurityError::MissingKey("integrity algorithm"))?;
            let key = cfg.k_128_int.ok_or(SecurityError::MissingKey("k_128_int"))?;
            Some(match algo {
                IntegrityAlgorithm::Nia0 => Integrity::Nia0,
                IntegrityAlgorithm::Nia2 => Integrity::Nia2(key),
                other => return Err(SecurityError::UnsupportedAlgorithm(format!("{:?}", other))),
            })
        } else {
            None
        };

        let ciphering = if ciphering_enabled {
            Some(match cfg.cipher_algo {
                CipheringAlgorithm::Nea0 => Ciphering::Nea0,
                CipheringAlgorithm::Nea2 => Ciphering::Nea2(cfg.k_128_enc),
                other => return Err(SecurityError::UnsupportedAlgorithm(format!("{:?}", other))),
            })
        } else {
            None
        };

        debug!(
            "Security engine created: bearer={} dir={:?} integ={:?} cipher={:?}",
            bearer_id, direction, cfg.integ_algo, cfg.cipher_algo
        );

        Ok(Self {
            bearer_id: bearer_id & 0x1f,
            direction,
            integrity,
            ciphering,
        })
    }

    pub fn integrity_enabled(&self) -> bool {
        self.integrity.is_some()
    }

    pub fn ciphering_enabled(&self) -> bool {
        self.ciphering.is_some()
    }

    fn compute_mac(&self, data: &[u8], count: u32) -> Result<[u8; MAC_I_LEN], SecurityError> {
        match &self.integrity {
            None | Some(Integrity::Nia0) => Ok([0; MAC_I_LEN]),
            Some(Integrity::Nia2(key)) => {
                nia2_compute_mac(key, count, self.bearer_id, self.direction, data)
            }
        }
    }

    fn apply_keystream(&self, data: &mut [u8], count: u32) {
        if let Some(Ciphering::Nea2(key)) = &self.ciphering {
            nea2_apply(key, count, self.bearer_id, self.direction, data);
        }
    }
}

impl SecurityEngineTx for SecurityEngine {
    fn encrypt_and_protect_integrity(
        &self,
        mut buf: BytesMut,
        hdr_len: usize,
        count: u32,
    ) -> Result<BytesMut, SecurityError> {
        if buf.len() < hdr_len {
            return Err(SecurityError::BufferFailure);
        }
        if self.integrity.is_some() {
            let mac = self.compute_mac(&buf, count)?;
            buf.put_slice(&mac);
        }
        self.apply_keystream(&mut buf[hdr_len..], count);
        Ok(buf)
    }
}

impl SecurityEngineRx for SecurityEngine {
    fn decrypt_and_verify_integrity(
        &self,
        mut buf: BytesMut,
        hdr_len: usize,
        count: u32,
    ) -> Result<BytesMut, SecurityError> {
        if buf.len() < hdr_len {
            return Err(SecurityError::BufferFailure);
        }
        self.apply_keystream(&mut buf[hdr_len..], count);
        if self.integrity.is_some() {
            if buf.len() < hdr_len + MAC_I_LEN {
                return Err(SecurityError::BufferFailure);
            }
            let mac_pos = buf.len() - MAC_I_LEN;
            let expected = self.compute_mac(&buf[..mac_pos], count)?;
            if buf[mac_pos..] != expected {
                return Err(SecurityError::IntegrityFailure);
            }
            buf.truncate(mac_pos);
        }
        Ok(buf)
    }
}

fn nea2_iv(count: u32, bearer: u8, direction: SecurityDirection) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..4].copy_from_slice(&count.to_be_bytes());
    iv[4] = ((bearer & 0x1f) << 3) | ((direction as u8 & 0x01) << 2);
    iv
}

/// 128-NEA2: XOR `data` with the AES-128-CTR keystream. Encryption and decryption are the same operation.
pub fn nea2_apply(key: &SecKey, count: u32, bearer: u8, direction: SecurityDirection, data: &mut [u8]) {
    let iv = nea2_iv(count, bearer, direction);
    let mut cipher = Aes128Ctr::new(key.into(), &iv.into());
    cipher.apply_keystream(data);
}

/// 128-NIA2: first 32 bits of AES-128-CMAC over COUNT | BEARER | DIRECTION | 0 | MESSAGE
pub fn nia2_compute_mac(
    key: &SecKey,
    count: u32,
    bearer: u8,
    direction: SecurityDirection,
    data: &[u8],
) -> Result<[u8; MAC_I_LEN], SecurityError> {
    let mut mac = Cmac::<Aes128>::new_from_slice(key)
        .map_err(|_| SecurityError::MissingKey("invalid NIA2 key length"))?;
    mac.update(&count.to_be_bytes());
    mac.update(&[((bearer & 0x1f) << 3) | ((direction as u8 & 0x01) << 2), 0, 0, 0]);
    mac.update(data);
    let tag = mac.finalize().into_bytes();
    let mut out = [0u8; MAC_I_LEN];
    out.copy_from_slice(&tag[..MAC_I_LEN]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: SecKey = [
        0xd3, 0xc5, 0xd5, 0x92, 0x32, 0x7f, 0xb1, 0x1c, 0x40, 0x35, 0xc6, 0x68, 0x0a, 0xf8, 0xc6,
        0xd1,
    ];

    fn nea2_nia2_config() -> Sec128AsConfig {
        Sec128AsConfig {
            domain: SecurityDomain::Up,
            integ_algo: Some(IntegrityAlgorithm::Nia2),
            cipher_algo: CipheringAlgorithm::Nea2,
            k_128_int: Some(KEY),
            k_128_enc: KEY,
        }
    }

    #[test]
    fn test_nea2_test_set_1() {
        let mut data = [
            0x98, 0x1b, 0xa6, 0x82, 0x4c, 0x1b, 0xfb, 0x1a, 0xb4, 0x85, 0x47, 0x20, 0x29, 0xb7,
            0x1d, 0x80,
        ];
        nea2_apply(&KEY, 0x398a59b4, 0x15, SecurityDirection::Downlink, &mut data);
        assert_eq!(
            data,
            [
                0xe9, 0xfe, 0xd8, 0xa6, 0x3d, 0x15, 0x53, 0x04, 0xd7, 0x1d, 0xf2, 0x0b, 0xf3, 0xe8,
                0x22, 0x14
            ]
        );
    }

    #[test]
    fn test_nia2_depends_on_count() {
        let a = nia2_compute_mac(&KEY, 1, 3, SecurityDirection::Uplink, b"payload").unwrap();
        let b = nia2_compute_mac(&KEY, 2, 3, SecurityDirection::Uplink, b"payload").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_protect_then_verify() {
        let cfg = nea2_nia2_config();
        let tx = SecurityEngine::new(&cfg, 2, SecurityDirection::Downlink, true, true).unwrap();
        let rx = SecurityEngine::new(&cfg, 2, SecurityDirection::Downlink, true, true).unwrap();

        let pdu = BytesMut::from(&[0x80, 0x05, 1, 2, 3, 4, 5][..]);
        let protected = tx.encrypt_and_protect_integrity(pdu, 2, 5).unwrap();
        assert_eq!(protected.len(), 7 + MAC_I_LEN);
        assert_eq!(&protected[..2], &[0x80, 0x05]);
        assert_ne!(&protected[2..7], &[1, 2, 3, 4, 5]);

        let plain = rx.decrypt_and_verify_integrity(protected, 2, 5).unwrap();
        assert_eq!(&plain[..], &[0x80, 0x05, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_wrong_count_fails_integrity() {
        let cfg = nea2_nia2_config();
        let engine = SecurityEngine::new(&cfg, 1, SecurityDirection::Uplink, true, true).unwrap();
        let protected = engine
            .encrypt_and_protect_integrity(BytesMut::from(&[0x00, 0x01, 9, 9][..]), 2, 1)
            .unwrap();
        assert_eq!(
            engine.decrypt_and_verify_integrity(protected, 2, 2),
            Err(SecurityError::IntegrityFailure)
        );
    }

    #[test]
    fn test_nia0_appends_zero_mac() {
        let cfg = Sec128AsConfig::null(SecurityDomain::Rrc);
        let engine = SecurityEngine::new(&cfg, 0, SecurityDirection::Downlink, true, false).unwrap();
        let out = engine
            .encrypt_and_protect_integrity(BytesMut::from(&[0x00, 0x00, 0xaa][..]), 2, 0)
            .unwrap();
        assert_eq!(&out[..], &[0x00, 0x00, 0xaa, 0, 0, 0, 0]);
    }

    #[test]
    fn test_unsupported_algorithm_rejected() {
        let mut cfg = nea2_nia2_config();
        cfg.cipher_algo = CipheringAlgorithm::Nea1;
        assert!(matches!(
            SecurityEngine::new(&cfg, 1, SecurityDirection::Uplink, false, true),
            Err(SecurityError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_short_buffer_rejected() {
        let cfg = nea2_nia2_config();
        let engine = SecurityEngine::new(&cfg, 1, SecurityDirection::Uplink, true, false).unwrap();
        assert_eq!(
            engine.decrypt_and_verify_integrity(BytesMut::from(&[0x00, 0x01, 0xff][..]), 2, 0),
            Err(SecurityError::BufferFailure)
        );
    }
}
