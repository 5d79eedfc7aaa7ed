//! GRE framing on NWu/NWt
//!
//! User plane between UE and gateway is GRE over the Child SA. The GRE key
//! carries the QoS flow of the packet: its top byte is `(RQI << 6) | QFI`.
//! Conversion to and from GTP-U keeps that pair intact.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use ogs_gtp::v1::{Gtp1uMessage, PduSessionContainer};

pub const GRE_FLAG_CHECKSUM: u16 = 0x8000;
pub const GRE_FLAG_KEY: u16 = 0x2000;
pub const GRE_FLAG_SEQUENCE: u16 = 0x1000;
const GRE_VERSION_MASK: u16 = 0x0007;

/// Ethertype carried in the protocol field for IPv4 payloads
pub const GRE_PROTOCOL_IPV4: u16 = 0x0800;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GreError {
    #[error("GRE packet too short: need {needed} bytes, have {available}")]
    TooShort { needed: usize, available: usize },

    #[error("unsupported GRE version {0}")]
    Version(u16),
}

pub type GreResult<T> = Result<T, GreError>;

/// GRE key with the QoS information in its most significant byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GreKey(pub u32);

impl GreKey {
    pub fn qos(qfi: u8, rqi: bool) -> Self {
        let top = (u32::from(rqi) << 6) | u32::from(qfi & 0x3f);
        GreKey(top << 24)
    }

    pub fn qfi(&self) -> u8 {
        ((self.0 >> 24) & 0x3f) as u8
    }

    pub fn rqi(&self) -> bool {
        (self.0 >> 30) & 0x1 == 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GreHeader {
    pub protocol: u16,
    pub key: Option<GreKey>,
}

impl GreHeader {
    pub fn ipv4(key: Option<GreKey>) -> Self {
        Self {
            protocol: GRE_PROTOCOL_IPV4,
            key,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let flags = if self.key.is_some() { GRE_FLAG_KEY } else { 0 };
        buf.put_u16(flags);
        buf.put_u16(self.protocol);
        if let Some(key) = self.key {
            buf.put_u32(key.0);
        }
    }

    /// Decode the header and return it with the payload. Checksum and
    /// sequence fields are skipped.
    pub fn decode(data: &[u8]) -> GreResult<(Self, Bytes)> {
        let mut buf = data;
        need(4, buf.remaining())?;
        let flags = buf.get_u16();
        let protocol = buf.get_u16();
        if flags & GRE_VERSION_MASK != 0 {
            return Err(GreError::Version(flags & GRE_VERSION_MASK));
        }

        if flags & GRE_FLAG_CHECKSUM != 0 {
            need(4, buf.remaining())?;
            buf.advance(4);
        }
        let key = if flags & GRE_FLAG_KEY != 0 {
            need(4, buf.remaining())?;
            Some(GreKey(buf.get_u32()))
        } else {
            None
        };
        if flags & GRE_FLAG_SEQUENCE != 0 {
            need(4, buf.remaining())?;
            buf.advance(4);
        }

        Ok((Self { protocol, key }, Bytes::copy_from_slice(buf)))
    }
}

fn need(needed: usize, available: usize) -> GreResult<()> {
    if available < needed {
        return Err(GreError::TooShort { needed, available });
    }
    Ok(())
}

/// Wrap an uplink GRE payload for the UPF. Without a key there is no QFI to
/// carry and a plain T-PDU is produced.
pub fn gre_to_gtp(header: &GreHeader, payload: Bytes, teid: u32) -> Gtp1uMessage {
    let container = header.key.map(|key| PduSessionContainer::uplink(key.qfi()));
    Gtp1uMessage::gpdu(teid, container, payload)
}

/// GRE packet for a downlink T-PDU, keyed with the QFI and RQI of its PDU
/// Session Container
pub fn gtp_to_gre(message: &Gtp1uMessage) -> BytesMut {
    let key = message
        .pdu_session_container
        .map(|container| GreKey::qos(container.qfi, container.rqi));
    let mut buf = BytesMut::with_capacity(8 + message.payload.len());
    GreHeader::ipv4(key).encode(&mut buf);
    buf.put_slice(&message.payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogs_gtp::v1::PduSessionInformationType;

    #[test]
    fn test_gre_key_layout() {
        let key = GreKey::qos(9, true);
        assert_eq!(key.0, 0x4900_0000);
        assert_eq!(key.qfi(), 9);
        assert!(key.rqi());
        assert!(!GreKey::qos(63, false).rqi());
    }

    #[test]
    fn test_decode_skips_checksum_and_sequence() {
        let data = [
            0xb0, 0x00, 0x08, 0x00, // C, K, S
            0xaa, 0xbb, 0x00, 0x00, // checksum + reserved
            0x05, 0x00, 0x00, 0x00, // key
            0x00, 0x00, 0x00, 0x01, // sequence
            0x45, 0x00,
        ];
        let (header, payload) = GreHeader::decode(&data).unwrap();
        assert_eq!(header.protocol, GRE_PROTOCOL_IPV4);
        assert_eq!(header.key.map(|k| k.qfi()), Some(5));
        assert_eq!(&payload[..], &[0x45, 0x00]);
    }

    #[test]
    fn test_decode_rejects_short_and_versioned() {
        assert!(matches!(GreHeader::decode(&[0x20, 0x00, 0x08, 0x00, 0x01]), Err(GreError::TooShort { .. })));
        assert_eq!(GreHeader::decode(&[0x00, 0x01, 0x08, 0x00]), Err(GreError::Version(1)));
    }

    #[test]
    fn test_uplink_without_key_is_plain_tpdu() {
        let header = GreHeader::ipv4(None);
        let msg = gre_to_gtp(&header, Bytes::from_static(&[0x45]), 0x10);
        assert!(msg.pdu_session_container.is_none());
        assert_eq!(msg.header.teid, 0x10);
    }

    #[test]
    fn test_uplink_carries_qfi() {
        let header = GreHeader::ipv4(Some(GreKey::qos(7, false)));
        let msg = gre_to_gtp(&header, Bytes::from_static(&[0x45]), 1);
        let container = msg.pdu_session_container.unwrap();
        assert_eq!(container.pdu_type, PduSessionInformationType::Uplink);
        assert_eq!(container.qfi, 7);
    }

    #[test]
    fn test_downlink_key_from_container() {
        let msg = Gtp1uMessage::gpdu(
            1,
            Some(PduSessionContainer::downlink(3, true)),
            Bytes::from_static(&[0x45, 0x00]),
        );
        let gre = gtp_to_gre(&msg);
        let (header, payload) = GreHeader::decode(&gre).unwrap();
        assert_eq!(header.key, Some(GreKey::qos(3, true)));
        assert_eq!(&payload[..], &[0x45, 0x00]);
    }
}
