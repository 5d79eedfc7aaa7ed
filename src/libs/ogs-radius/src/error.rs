//! RADIUS Error types

use thiserror::Error;

/// RADIUS Error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadiusError {
    /// Buffer too short for operation
    #[error("Truncated {what}: need {needed} bytes, have {available}")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    /// A length field disagrees with the data
    #[error("Invalid {what} length: {length}")]
    InvalidLength { what: &'static str, length: usize },

    /// Value too long for its length field
    #[error("{what} too long: {length} bytes")]
    TooLong { what: &'static str, length: usize },

    /// Malformed EAP packet
    #[error("Invalid EAP packet: {0}")]
    InvalidEap(String),

    /// Malformed EAP-5G data
    #[error("Invalid EAP-5G data: {0}")]
    InvalidEap5g(String),
}

/// RADIUS Result type
pub type RadiusResult<T> = Result<T, RadiusError>;

pub(crate) fn need(what: &'static str, needed: usize, available: usize) -> RadiusResult<()> {
    if available < needed {
        return Err(RadiusError::Truncated {
            what,
            needed,
            available,
        });
    }
    Ok(())
}
