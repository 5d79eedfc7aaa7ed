//! NextGCore IKEv2 Protocol Library
//!
//! This crate provides IKEv2 message building and parsing as specified in
//! RFC 7296, with the 3GPP private notify payloads of TS 24.502 used on NWt.
//! Encryption of the SK payload is left to the caller; the codec carries its
//! body opaque.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use ogs_ike::{ExchangeType, IkeHeader, IkeMessage, Payload, IKE_FLAG_RESPONSE};
//!
//! let header = IkeHeader::new(1, 2, ExchangeType::Informational as u8, IKE_FLAG_RESPONSE, 5);
//! let mut msg = IkeMessage::new(header);
//! msg.push(Payload::Nonce(Bytes::from_static(b"nonce")));
//! let bytes = msg.encode().unwrap();
//! assert_eq!(IkeMessage::decode(&bytes).unwrap().payloads, msg.payloads);
//! ```

pub mod error;
pub mod header;
pub mod message;
pub mod payload;
pub mod types;


pub use error::{IkeError, IkeResult};
pub use header::IkeHeader;
pub use message::IkeMessage;
pub use payload::{
    decode_payloads, encode_payloads, first_payload_type, Authentication, Certificate, ConfigAttribute,
    Configuration, Delete, Identification, KeyExchange, Notification, Payload, Proposal, QosInfo,
    TrafficSelector, Transform,
};
pub use types::*;

/// IKE UDP port
pub const IKE_UDP_PORT: u16 = 500;
/// IKE NAT traversal UDP port
pub const IKE_NATT_UDP_PORT: u16 = 4500;
/// Non-ESP marker prepended on the NAT-T port
pub const NON_ESP_MARKER: [u8; 4] = [0; 4];
