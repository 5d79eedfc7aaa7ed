//! NextGCore Cryptographic Library
//!
//! This crate provides the cryptographic building blocks the TNGF needs from
//! 3GPP specifications.

pub mod aes;        // AES-CBC without padding
pub mod kdf;        // Key Derivation Functions


pub use aes::{aes_cbc_decrypt, aes_cbc_encrypt, AesError, AES_BLOCK_SIZE};
pub use kdf::{ogs_kdf_common, ogs_kdf_ktipsec, ogs_kdf_ktnap, KdfError, KdfResult};
