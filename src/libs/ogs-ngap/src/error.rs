//! NGAP Error Types

use ogs_asn1c::PerError;
use thiserror::Error;

/// Errors that can occur during NGAP message processing
#[derive(Error, Debug)]
pub enum NgapError {
    /// ASN.1 encoding/decoding error
    #[error("ASN.1 codec error: {0}")]
    Asn1(#[from] PerError),

    /// Missing mandatory IE
    #[error("Missing mandatory IE: {ie_name} (id={ie_id})")]
    MissingMandatoryIe { ie_name: &'static str, ie_id: u16 },

    /// Invalid IE value
    #[error("Invalid IE value for {ie_name}: {reason}")]
    InvalidIeValue {
        ie_name: &'static str,
        reason: String,
    },

    /// List outside its SIZE constraint
    #[error("{list} holds {len} items, allowed {min}..={max}")]
    ListSize {
        list: &'static str,
        len: usize,
        min: usize,
        max: usize,
    },
}

pub type NgapResult<T> = Result<T, NgapError>;
