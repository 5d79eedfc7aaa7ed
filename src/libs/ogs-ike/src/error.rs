//! IKE Error types

use thiserror::Error;

/// IKE Error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IkeError {
    /// Buffer too short for operation
    #[error("Truncated {what}: need {needed} bytes, have {available}")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    /// A length field disagrees with the surrounding structure
    #[error("Invalid {what} length: {length}")]
    InvalidLength { what: &'static str, length: usize },

    /// Payload body is malformed
    #[error("Invalid payload type {payload_type}: {reason}")]
    InvalidPayload { payload_type: u8, reason: String },

    /// Encoded structure does not fit its length field
    #[error("{what} too large: {length} bytes")]
    TooLarge { what: &'static str, length: usize },
}

/// IKE Result type
pub type IkeResult<T> = Result<T, IkeError>;

pub(crate) fn need(what: &'static str, needed: usize, available: usize) -> IkeResult<()> {
    if available < needed {
        return Err(IkeError::Truncated {
            what,
            needed,
            available,
        });
    }
    Ok(())
}
