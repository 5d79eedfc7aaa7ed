//! GTPv1-U Header
//!
//! GTPv1-U header structure as specified in 3GPP TS 29.281.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::error::{GtpError, GtpResult};

/// GTPv1-U header length (without optional fields)
pub const GTPV1U_HEADER_LEN: usize = 8;

/// Length of the optional sequence/N-PDU/next-extension block
pub const GTPV1U_OPTIONAL_LEN: usize = 4;

/// GTPv1 Version
pub const GTP1_VERSION_1: u8 = 1;

/// GTPv1-U Flags
pub const GTP1U_FLAGS_V: u8 = 0x20;
pub const GTP1U_FLAGS_PT: u8 = 0x10;
pub const GTP1U_FLAGS_E: u8 = 0x04;
pub const GTP1U_FLAGS_S: u8 = 0x02;
pub const GTP1U_FLAGS_PN: u8 = 0x01;

/// GTPv1-U Message Types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Gtp1uMessageType {
    EchoRequest = 1,
    EchoResponse = 2,
    ErrorIndication = 26,
    SupportedExtensionHeadersNotification = 31,
    EndMarker = 254,
    GPdu = 255,
}

impl TryFrom<u8> for Gtp1uMessageType {
    type Error = GtpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Gtp1uMessageType::EchoRequest),
            2 => Ok(Gtp1uMessageType::EchoResponse),
            26 => Ok(Gtp1uMessageType::ErrorIndication),
            31 => Ok(Gtp1uMessageType::SupportedExtensionHeadersNotification),
            254 => Ok(Gtp1uMessageType::EndMarker),
            255 => Ok(Gtp1uMessageType::GPdu),
            _ => Err(GtpError::InvalidMessageType(value)),
        }
    }
}

/// GTPv1-U Header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gtp1Header {
    /// Version (3 bits) - should be 1 for GTPv1
    pub version: u8,
    /// Protocol Type (1 bit) - 1 for GTP, 0 for GTP'
    pub pt: bool,
    /// Extension Header flag (1 bit)
    pub e: bool,
    /// Sequence Number flag (1 bit)
    pub s: bool,
    /// N-PDU Number flag (1 bit)
    pub pn: bool,
    /// Message Type
    pub message_type: u8,
    /// Message Length (everything after the first 8 octets)
    pub length: u16,
    /// Tunnel Endpoint Identifier
    pub teid: u32,
    /// Sequence Number (optional, present if s=1)
    pub sequence_number: Option<u16>,
    /// N-PDU Number (optional, present if pn=1)
    pub npdu_number: Option<u8>,
    /// Next Extension Header Type (optional, present if e=1)
    pub next_extension_header_type: Option<u8>,
}

impl Default for Gtp1Header {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl Gtp1Header {
    /// Create a new GTPv1 header
    pub fn new(message_type: u8, teid: u32) -> Self {
        Self {
            version: GTP1_VERSION_1,
            pt: true,
            e: false,
            s: false,
            pn: false,
            message_type,
            length: 0,
            teid,
            sequence_number: None,
            npdu_number: None,
            next_extension_header_type: None,
        }
    }

    /// Create a GTPv1-U header for G-PDU
    pub fn new_gpdu(teid: u32) -> Self {
        Self::new(Gtp1uMessageType::GPdu as u8, teid)
    }

    /// Get the flags byte
    pub fn flags(&self) -> u8 {
        let mut flags = (self.version & 0x07) << 5;
        if self.pt {
            flags |= GTP1U_FLAGS_PT;
        }
        if self.e {
            flags |= GTP1U_FLAGS_E;
        }
        if self.s {
            flags |= GTP1U_FLAGS_S;
        }
        if self.pn {
            flags |= GTP1U_FLAGS_PN;
        }
        flags
    }

    /// Check if optional fields are present
    pub fn has_optional_fields(&self) -> bool {
        self.e || self.s || self.pn
    }

    /// Get header length
    pub fn header_len(&self) -> usize {
        if self.has_optional_fields() {
            GTPV1U_HEADER_LEN + GTPV1U_OPTIONAL_LEN
        } else {
            GTPV1U_HEADER_LEN
        }
    }

    /// Encode header to bytes
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags());
        buf.put_u8(self.message_type);
        buf.put_u16(self.length);
        buf.put_u32(self.teid);

        if self.has_optional_fields() {
            buf.put_u16(self.sequence_number.unwrap_or(0));
            buf.put_u8(self.npdu_number.unwrap_or(0));
            buf.put_u8(self.next_extension_header_type.unwrap_or(0));
        }
    }

    /// Decode header from bytes
    pub fn decode(buf: &mut Bytes) -> GtpResult<Self> {
        if buf.remaining() < GTPV1U_HEADER_LEN {
            return Err(GtpError::BufferTooShort {
                needed: GTPV1U_HEADER_LEN,
                available: buf.remaining(),
            });
        }

        let flags = buf.get_u8();
        let message_type = buf.get_u8();
        let length = buf.get_u16();
        let teid = buf.get_u32();

        let mut header = Self {
            version: (flags >> 5) & 0x07,
            pt: (flags & GTP1U_FLAGS_PT) != 0,
            e: (flags & GTP1U_FLAGS_E) != 0,
            s: (flags & GTP1U_FLAGS_S) != 0,
            pn: (flags & GTP1U_FLAGS_PN) != 0,
            message_type,
            length,
            teid,
            sequence_number: None,
            npdu_number: None,
            next_extension_header_type: None,
        };

        if header.version != GTP1_VERSION_1 {
            return Err(GtpError::InvalidVersion(header.version));
        }
        if !header.pt {
            return Err(GtpError::InvalidHeader("GTP' is not supported".into()));
        }
        if buf.remaining() < length as usize {
            return Err(GtpError::BufferTooShort {
                needed: length as usize,
                available: buf.remaining(),
            });
        }

        if header.has_optional_fields() {
            if (length as usize) < GTPV1U_OPTIONAL_LEN {
                return Err(GtpError::InvalidHeader(format!(
                    "length {length} too short for optional fields"
                )));
            }
            header.sequence_number = Some(buf.get_u16());
            header.npdu_number = Some(buf.get_u8());
            header.next_extension_header_type = Some(buf.get_u8());
        }

        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode() {
        let header = Gtp1Header {
            s: true,
            message_type: Gtp1uMessageType::EchoRequest as u8,
            length: 4,
            teid: 0x12345678,
            sequence_number: Some(0x1234),
            npdu_number: Some(0),
            next_extension_header_type: Some(0),
            ..Gtp1Header::default()
        };

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), header.header_len());

        let mut bytes = buf.freeze();
        let decoded = Gtp1Header::decode(&mut bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_flags() {
        let header = Gtp1Header {
            e: true,
            s: true,
            ..Gtp1Header::default()
        };

        let flags = header.flags();
        assert_eq!(flags & GTP1U_FLAGS_V, GTP1U_FLAGS_V); // Version 1
        assert_eq!(flags & GTP1U_FLAGS_PT, GTP1U_FLAGS_PT); // PT = 1
        assert_eq!(flags & GTP1U_FLAGS_E, GTP1U_FLAGS_E); // E = 1
        assert_eq!(flags & GTP1U_FLAGS_S, GTP1U_FLAGS_S); // S = 1
        assert_eq!(flags & GTP1U_FLAGS_PN, 0); // PN = 0
    }

    #[test]
    fn test_gpdu_header() {
        let header = Gtp1Header::new_gpdu(0xABCDEF01);
        assert_eq!(header.message_type, Gtp1uMessageType::GPdu as u8);
        assert_eq!(header.teid, 0xABCDEF01);
        assert_eq!(header.header_len(), GTPV1U_HEADER_LEN);
        assert!(header.pt);
    }

    #[test]
    fn test_header_rejects_bad_version_and_short_length() {
        let mut bytes = Bytes::from_static(&[0x50, 0xff, 0x00, 0x00, 0, 0, 0, 1]);
        assert_eq!(Gtp1Header::decode(&mut bytes), Err(GtpError::InvalidVersion(2)));

        let mut bytes = Bytes::from_static(&[0x30, 0xff, 0x00, 0x10, 0, 0, 0, 1, 0x45]);
        assert!(matches!(
            Gtp1Header::decode(&mut bytes),
            Err(GtpError::BufferTooShort { needed: 16, available: 1 })
        ));
    }
}
