//! IKE Header
//!
//! Fixed 28-octet IKE header of RFC 7296 3.1.

use bytes::{Buf, BufMut, BytesMut};
use crate::error::{need, IkeResult};
use crate::types::{
    IKE_FLAG_INITIATOR, IKE_FLAG_RESPONSE, IKE_HEADER_LEN, IKE_MAJOR_VERSION, IKE_MINOR_VERSION,
};

/// IKE Header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IkeHeader {
    pub initiator_spi: u64,
    pub responder_spi: u64,
    /// Type of the first payload
    pub next_payload: u8,
    pub major_version: u8,
    pub minor_version: u8,
    pub exchange_type: u8,
    pub flags: u8,
    pub message_id: u32,
    /// Length of the whole message including this header
    pub length: u32,
}

impl IkeHeader {
    pub fn new(initiator_spi: u64, responder_spi: u64, exchange_type: u8, flags: u8, message_id: u32) -> Self {
        Self {
            initiator_spi,
            responder_spi,
            next_payload: 0,
            major_version: IKE_MAJOR_VERSION,
            minor_version: IKE_MINOR_VERSION,
            exchange_type,
            flags,
            message_id,
            length: IKE_HEADER_LEN as u32,
        }
    }

    pub fn is_response(&self) -> bool {
        self.flags & IKE_FLAG_RESPONSE != 0
    }

    pub fn is_initiator(&self) -> bool {
        self.flags & IKE_FLAG_INITIATOR != 0
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.initiator_spi);
        buf.put_u64(self.responder_spi);
        buf.put_u8(self.next_payload);
        buf.put_u8((self.major_version << 4) | (self.minor_version & 0x0F));
        buf.put_u8(self.exchange_type);
        buf.put_u8(self.flags);
        buf.put_u32(self.message_id);
        buf.put_u32(self.length);
    }

    /// Decode the header. The version is not checked here so that callers
    /// can answer INVALID_MAJOR_VERSION.
    pub fn decode<B: Buf>(buf: &mut B) -> IkeResult<Self> {
        need("IKE header", IKE_HEADER_LEN, buf.remaining())?;
        let initiator_spi = buf.get_u64();
        let responder_spi = buf.get_u64();
        let next_payload = buf.get_u8();
        let version = buf.get_u8();
        let exchange_type = buf.get_u8();
        let flags = buf.get_u8();
        let message_id = buf.get_u32();
        let length = buf.get_u32();

        Ok(Self {
            initiator_spi,
            responder_spi,
            next_payload,
            major_version: version >> 4,
            minor_version: version & 0x0F,
            exchange_type,
            flags,
            message_id,
            length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExchangeType;

    #[test]
    fn test_header_layout() {
        let mut header = IkeHeader::new(
            0x0102_0304_0506_0708,
            0,
            ExchangeType::IkeSaInit as u8,
            IKE_FLAG_INITIATOR,
            0,
        );
        header.next_payload = 33;
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), IKE_HEADER_LEN);
        assert_eq!(&buf[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(buf[16], 33);
        assert_eq!(buf[17], 0x20);
        assert_eq!(buf[18], 34);
        assert_eq!(buf[19], 0x08);
        assert_eq!(&buf[24..28], &[0, 0, 0, 28]);

        let decoded = IkeHeader::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_initiator());
        assert!(!decoded.is_response());
    }

    #[test]
    fn test_short_header() {
        let raw = [0u8; 27];
        assert!(IkeHeader::decode(&mut &raw[..]).is_err());
    }
}
