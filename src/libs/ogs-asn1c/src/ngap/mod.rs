//! NGAP ASN.1 definitions (3GPP TS 38.413)

pub mod cause;
pub mod ies;
pub mod pdu;
pub mod types;
