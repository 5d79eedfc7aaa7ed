//! GTPv1-U Protocol Implementation
//!
//! This module implements GTPv1-U (User Plane) as specified in 3GPP TS 29.281,
//! with the PDU Session Container of TS 38.415.

pub mod header;
pub mod extension;
pub mod message;

pub use header::*;
pub use extension::*;
pub use message::*;
