//! NextGCore ASN.1 Codec Library
//!
//! Aligned PER encoder/decoder and the NGAP (3GPP TS 38.413) building blocks
//! shared by the message layer in `ogs-ngap`.
//!
//! # Modules
//!
//! - `per` - Packed Encoding Rules (APER) encoder/decoder
//! - `ngap` - NGAP common types, IE containers, PDU wrapper and causes

pub mod per;
pub mod ngap;


pub use per::{AperDecode, AperDecoder, AperEncode, AperEncoder, PerError, PerResult};
