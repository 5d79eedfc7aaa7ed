//! NextGCore NGAP Protocol Library
//!
//! This crate provides high-level NGAP (NG Application Protocol) message building
//! and parsing for the non-3GPP access gateway side of N2, as defined in
//! 3GPP TS 38.413.
//!
//! # Architecture
//!
//! The library is layered on top of `ogs-asn1c` which provides raw ASN.1 APER
//! encoding/decoding. This crate adds:
//!
//! - **Strongly-typed message types** (`types`) for each NGAP procedure
//! - **Builder functions** (`builder`) to construct APER-encoded NGAP PDUs
//! - **Parser functions** (`parser`) to decode APER bytes into typed messages
//! - **IE helpers** (`ie`) for encoding/decoding individual Information Elements
//!
//! Builders exist for both directions so that AMF-originated messages can be
//! fabricated in tests.
//!
//! # Supported Procedures
//!
//! - **NG Setup**: Request, Response, Failure
//! - **NAS Transport**: Initial UE Message, Downlink/Uplink NAS Transport
//! - **Initial Context Setup**: Request, Response, Failure
//! - **PDU Session Resource**: Setup and Release, with their transfer containers
//! - **UE Context Release**: Request, Command, Complete
//! - **Interface management**: NG Reset, Error Indication, AMF Configuration
//!   Update, Overload Start/Stop
//!
//! # Example
//!
//! ```no_run
//! use ogs_ngap::builder;
//! use ogs_ngap::types::*;
//!
//! // Build a Downlink NAS Transport message
//! let msg = DownlinkNasTransport {
//!     amf_ue_ngap_id: 1,
//!     ran_ue_ngap_id: 100,
//!     nas_pdu: vec![0x7e, 0x00, 0x56],
//! };
//! let bytes = builder::build_downlink_nas_transport(&msg).unwrap();
//!
//! // Parse any NGAP message
//! use ogs_ngap::parser;
//! let decoded = parser::decode_ngap_pdu(&bytes).unwrap();
//! ```

pub mod error;
pub mod types;
pub mod ie;
pub mod builder;
pub mod parser;


// Re-export key types for convenience
pub use error::{NgapError, NgapResult};
pub use types::*;
pub use parser::{decode_ngap_pdu, NgapMessage};
