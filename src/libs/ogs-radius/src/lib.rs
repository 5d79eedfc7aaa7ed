//! NextGCore RADIUS Protocol Library
//!
//! This crate provides the RADIUS (RFC 2865, RFC 3579) packet codec used on
//! the Ta interface between a trusted non-3GPP access point and the TNGF,
//! together with the EAP (RFC 3748), EAP-5G (TS 24.502) and MS-MPPE key
//! (RFC 2548) encodings carried inside it.

pub mod eap;
pub mod eap5g;
pub mod error;
pub mod message;
pub mod mppe;

#[cfg(test)]
mod property_tests;

pub use eap::{EapData, EapPacket};
pub use eap5g::{eap5g_data, AnGuami, AnParameters, AnSnssai, AnUeIdentity, Eap5gRequest, Eap5gResponse};
pub use error::{RadiusError, RadiusResult};
pub use message::{message_authenticator, response_authenticator, RadiusAttribute, RadiusMessage};

/// RADIUS authentication UDP port
pub const RADIUS_AUTH_UDP_PORT: u16 = 1812;

/// Shared secret used when none is configured
pub const DEFAULT_RADIUS_SECRET: &str = "free5GC";
