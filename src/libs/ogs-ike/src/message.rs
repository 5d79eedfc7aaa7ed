//! IKE Messages

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::error::{IkeError, IkeResult};
use crate::header::IkeHeader;
use crate::payload::{decode_payloads, encode_payloads, first_payload_type, Notification, Payload};
use crate::types::{IKE_HEADER_LEN, PAYLOAD_SK};

/// IKE Message: header and payload chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IkeMessage {
    pub header: IkeHeader,
    pub payloads: Vec<Payload>,
}

impl IkeMessage {
    pub fn new(header: IkeHeader) -> Self {
        Self {
            header,
            payloads: Vec::new(),
        }
    }

    pub fn push(&mut self, payload: Payload) -> &mut Self {
        self.payloads.push(payload);
        self
    }

    /// Encode with the next-payload and length fields filled in
    pub fn encode(&self) -> IkeResult<BytesMut> {
        let mut body = BytesMut::new();
        encode_payloads(&self.payloads, &mut body)?;

        let mut header = self.header;
        header.next_payload = first_payload_type(&self.payloads);
        let length = IKE_HEADER_LEN + body.len();
        header.length = u32::try_from(length).map_err(|_| IkeError::TooLarge { what: "IKE message", length })?;

        let mut buf = BytesMut::with_capacity(length);
        header.encode(&mut buf);
        buf.put_slice(&body);
        Ok(buf)
    }

    /// Decode a whole datagram. The header length must match the input.
    pub fn decode(data: &[u8]) -> IkeResult<Self> {
        let mut buf = Bytes::copy_from_slice(data);
        let header = IkeHeader::decode(&mut buf)?;
        if header.length as usize != data.len() {
            return Err(IkeError::InvalidLength {
                what: "IKE message",
                length: header.length as usize,
            });
        }
        let payloads = decode_payloads(header.next_payload, buf.copy_to_bytes(buf.remaining()))?;
        Ok(Self { header, payloads })
    }

    /// The SK payload, if present
    pub fn encrypted(&self) -> Option<(u8, &Bytes)> {
        self.payloads.iter().find_map(|p| match p {
            Payload::Encrypted { next_payload, data } => Some((*next_payload, data)),
            _ => None,
        })
    }

    pub fn has_encrypted(&self) -> bool {
        self.payloads.iter().any(|p| p.payload_type() == PAYLOAD_SK)
    }

    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.payloads.iter().filter_map(|p| match p {
            Payload::Notify(n) => Some(n),
            _ => None,
        })
    }
}
