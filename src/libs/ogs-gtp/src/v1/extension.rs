//! GTPv1-U Extension Headers
//!
//! Extension header chain of TS 29.281 5.2 and the PDU Session Container
//! of TS 38.415 5.5.2.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::error::{GtpError, GtpResult};

/// Extension header type: no more extension headers
pub const GTP1_EXT_NO_MORE: u8 = 0x00;
/// Extension header type: PDU Session Container
pub const GTP1_EXT_PDU_SESSION_CONTAINER: u8 = 0x85;

/// PDU Type in the PDU Session Container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PduSessionInformationType {
    /// DL PDU SESSION INFORMATION
    Downlink = 0,
    /// UL PDU SESSION INFORMATION
    Uplink = 1,
}

/// PDU Session Container carrying the QoS Flow Identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduSessionContainer {
    pub pdu_type: PduSessionInformationType,
    /// QoS Flow Identifier (6 bits)
    pub qfi: u8,
    /// Reflective QoS Indicator, DL only
    pub rqi: bool,
}

impl PduSessionContainer {
    pub fn downlink(qfi: u8, rqi: bool) -> Self {
        Self {
            pdu_type: PduSessionInformationType::Downlink,
            qfi: qfi & 0x3F,
            rqi,
        }
    }

    pub fn uplink(qfi: u8) -> Self {
        Self {
            pdu_type: PduSessionInformationType::Uplink,
            qfi: qfi & 0x3F,
            rqi: false,
        }
    }

    /// Encode as one 4-octet extension header followed by `next_type`
    pub fn encode(&self, buf: &mut BytesMut, next_type: u8) {
        buf.put_u8(1); // length in 4-octet units
        buf.put_u8((self.pdu_type as u8) << 4);
        let rqi = match self.pdu_type {
            PduSessionInformationType::Downlink if self.rqi => 0x40,
            _ => 0,
        };
        buf.put_u8(rqi | (self.qfi & 0x3F));
        buf.put_u8(next_type);
    }

    /// Parse the content of an extension header of type 0x85
    /// (the octets between the length and next-type fields)
    pub fn parse_content(content: &[u8]) -> GtpResult<Self> {
        if content.len() < 2 {
            return Err(GtpError::InvalidExtensionHeader {
                ext_type: GTP1_EXT_PDU_SESSION_CONTAINER,
                reason: format!("content of {} bytes", content.len()),
            });
        }
        let pdu_type = match content[0] >> 4 {
            0 => PduSessionInformationType::Downlink,
            1 => PduSessionInformationType::Uplink,
            other => {
                return Err(GtpError::InvalidExtensionHeader {
                    ext_type: GTP1_EXT_PDU_SESSION_CONTAINER,
                    reason: format!("unknown PDU type {other}"),
                })
            }
        };
        Ok(Self {
            pdu_type,
            qfi: content[1] & 0x3F,
            rqi: pdu_type == PduSessionInformationType::Downlink && content[1] & 0x40 != 0,
        })
    }
}

/// One raw extension header of the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionHeader {
    pub ext_type: u8,
    pub content: Bytes,
}

/// Walk the extension header chain starting at `first_type`
pub fn decode_extension_headers(first_type: u8, buf: &mut Bytes) -> GtpResult<Vec<ExtensionHeader>> {
    let mut headers = Vec::new();
    let mut next = first_type;

    while next != GTP1_EXT_NO_MORE {
        if buf.remaining() < 1 {
            return Err(GtpError::BufferTooShort { needed: 1, available: 0 });
        }
        let units = buf.get_u8() as usize;
        if units == 0 {
            return Err(GtpError::InvalidExtensionHeader {
                ext_type: next,
                reason: "zero length".into(),
            });
        }
        // length counts the whole header: length octet + content + next type
        let rest = units * 4 - 1;
        if buf.remaining() < rest {
            return Err(GtpError::BufferTooShort {
                needed: rest,
                available: buf.remaining(),
            });
        }
        let content = buf.split_to(rest - 1);
        headers.push(ExtensionHeader { ext_type: next, content });
        next = buf.get_u8();
    }

    Ok(headers)
}
