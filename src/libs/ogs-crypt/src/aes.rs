//! AES-CBC Operations
//!
//! Unpadded AES-CBC over the `aes` and `cbc` crates. Callers own the padding
//! scheme (IKEv2 pads with a trailing pad-length byte).
//!
//! Supports AES-128, AES-192, and AES-256.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use thiserror::Error;

/// AES block size in bytes
pub const AES_BLOCK_SIZE: usize = 16;

/// Error type for AES operations
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AesError {
    /// Key must be 16, 24 or 32 bytes
    #[error("invalid AES key size {0}")]
    InvalidKeySize(usize),
    /// IV must be one block
    #[error("invalid IV size {0}")]
    InvalidIvSize(usize),
    /// Input must be a multiple of the block size
    #[error("input length {0} is not a multiple of the block size")]
    InvalidInputLength(usize),
}

pub type AesResult<T> = Result<T, AesError>;

fn check(key: &[u8], iv: &[u8], data: &[u8]) -> AesResult<()> {
    if !matches!(key.len(), 16 | 24 | 32) {
        return Err(AesError::InvalidKeySize(key.len()));
    }
    if iv.len() != AES_BLOCK_SIZE {
        return Err(AesError::InvalidIvSize(iv.len()));
    }
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(AesError::InvalidInputLength(data.len()));
    }
    Ok(())
}

/// Encrypt `data` (a whole number of blocks) with AES-CBC
pub fn aes_cbc_encrypt(key: &[u8], iv: &[u8], data: &[u8]) -> AesResult<Vec<u8>> {
    check(key, iv, data)?;
    let invalid = |_| AesError::InvalidKeySize(key.len());
    Ok(match key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<NoPadding>(data),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<NoPadding>(data),
        _ => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<NoPadding>(data),
    })
}

/// Decrypt `data` (a whole number of blocks) with AES-CBC
pub fn aes_cbc_decrypt(key: &[u8], iv: &[u8], data: &[u8]) -> AesResult<Vec<u8>> {
    check(key, iv, data)?;
    let invalid = |_| AesError::InvalidKeySize(key.len());
    let unpad = |_| AesError::InvalidInputLength(data.len());
    match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<NoPadding>(data)
            .map_err(unpad),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<NoPadding>(data)
            .map_err(unpad),
        _ => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<NoPadding>(data)
            .map_err(unpad),
    }
}
