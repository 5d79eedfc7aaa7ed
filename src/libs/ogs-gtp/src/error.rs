//! GTP Error types

use thiserror::Error;

/// GTP Error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GtpError {
    /// Buffer too short for operation
    #[error("Buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort { needed: usize, available: usize },

    /// Invalid header
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Invalid message type
    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),

    /// Invalid version
    #[error("Invalid GTP version: {0}")]
    InvalidVersion(u8),

    /// Invalid extension header
    #[error("Invalid extension header type {ext_type:#04x}: {reason}")]
    InvalidExtensionHeader { ext_type: u8, reason: String },

    /// E flag set but no PDU Session Container in the chain
    #[error("No PDU Session Container in extension headers")]
    MissingPduSessionContainer,

    /// Payload too large for the 16-bit length field
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

/// GTP Result type
pub type GtpResult<T> = Result<T, GtpError>;
