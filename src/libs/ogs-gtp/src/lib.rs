//! NextGCore GTP Protocol Library
//!
//! This crate provides GTPv1-U message building and parsing as specified in
//! 3GPP TS 29.281, including the PDU Session Container used on N3.

pub mod error;
pub mod v1;


pub use error::{GtpError, GtpResult};

/// GTPv1-U UDP port (2152)
pub const GTPV1_U_UDP_PORT: u16 = 2152;
