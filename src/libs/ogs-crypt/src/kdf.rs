//! Key Derivation Functions
//!
//! Implements the generic 3GPP key derivation function of TS 33.220 clause
//! B.2.0 and the derivations a TNGF performs on top of it (TS 33.501 Annex A.22).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

/// Output size of the KDF (HMAC-SHA-256)
pub const OGS_SHA256_DIGEST_SIZE: usize = 32;

/// FC for Ktipsec/Ktnap derivation from Ktngf
const FC_FOR_KTIPSEC_KTNAP_DERIVATION: u8 = 0x86;

/// Usage type distinguisher for the IPsec key
pub const OGS_KDF_USAGE_TYPE_IPSEC: u8 = 0x01;
/// Usage type distinguisher for the TNAP key
pub const OGS_KDF_USAGE_TYPE_TNAP: u8 = 0x02;

/// KDF errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KdfError {
    #[error("KDF parameter {index} is {len} bytes, longer than a 16-bit length allows")]
    ParameterTooLong { index: usize, len: usize },

    #[error("invalid HMAC key")]
    InvalidKey,
}

pub type KdfResult<T> = Result<T, KdfError>;

type HmacSha256 = Hmac<Sha256>;

/// Common KDF function as defined in TS 33.220 clause B.2.0
///
/// `S = FC || P0 || L0 || P1 || L1 ...`, output `HMAC-SHA-256(Key, S)`.
/// Empty parameters are skipped along with their length field.
pub fn ogs_kdf_common(key: &[u8], fc: u8, params: &[&[u8]]) -> KdfResult<[u8; OGS_SHA256_DIGEST_SIZE]> {
    let mut s = Vec::with_capacity(1 + params.iter().map(|p| p.len() + 2).sum::<usize>());
    s.push(fc);

    for (index, param) in params.iter().enumerate() {
        if param.is_empty() {
            continue;
        }
        let len = u16::try_from(param.len()).map_err(|_| KdfError::ParameterTooLong {
            index,
            len: param.len(),
        })?;
        s.extend_from_slice(param);
        s.extend_from_slice(&len.to_be_bytes());
    }

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| KdfError::InvalidKey)?;
    mac.update(&s);

    let mut output = [0u8; OGS_SHA256_DIGEST_SIZE];
    output.copy_from_slice(&mac.finalize().into_bytes());
    Ok(output)
}

/// Derive Ktipsec or Ktnap from Ktngf
pub fn ogs_kdf_ktngf_usage(
    ktngf: &[u8],
    usage_type: u8,
) -> KdfResult<[u8; OGS_SHA256_DIGEST_SIZE]> {
    ogs_kdf_common(ktngf, FC_FOR_KTIPSEC_KTNAP_DERIVATION, &[&[usage_type]])
}

/// Ktipsec, the key the UE and TNGF use to authenticate IKE_AUTH
pub fn ogs_kdf_ktipsec(ktngf: &[u8]) -> KdfResult<[u8; OGS_SHA256_DIGEST_SIZE]> {
    ogs_kdf_ktngf_usage(ktngf, OGS_KDF_USAGE_TYPE_IPSEC)
}

/// Ktnap, delivered to the TNAP in the RADIUS Access-Accept
pub fn ogs_kdf_ktnap(ktngf: &[u8]) -> KdfResult<[u8; OGS_SHA256_DIGEST_SIZE]> {
    ogs_kdf_ktngf_usage(ktngf, OGS_KDF_USAGE_TYPE_TNAP)
}
