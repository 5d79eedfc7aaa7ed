//! GTPv1-U Messages
//!
//! G-PDU (T-PDU) framing with an optional PDU Session Container, and the
//! echo request/response pair.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::error::{GtpError, GtpResult};
use super::extension::{
    decode_extension_headers, PduSessionContainer, GTP1_EXT_NO_MORE, GTP1_EXT_PDU_SESSION_CONTAINER,
};
use super::header::{Gtp1Header, Gtp1uMessageType, GTPV1U_HEADER_LEN};

/// Recovery IE type (TV, 1 octet)
pub const GTP1_IE_RECOVERY: u8 = 14;

/// GTPv1-U Message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gtp1uMessage {
    /// Message header
    pub header: Gtp1Header,
    /// PDU Session Container from the extension chain, if any
    pub pdu_session_container: Option<PduSessionContainer>,
    /// T-PDU for G-PDU, IEs for signalling messages
    pub payload: Bytes,
}

impl Gtp1uMessage {
    /// Create a G-PDU message (user plane data)
    pub fn gpdu(teid: u32, container: Option<PduSessionContainer>, payload: Bytes) -> Self {
        let mut header = Gtp1Header::new_gpdu(teid);
        if container.is_some() {
            header.e = true;
            header.next_extension_header_type = Some(GTP1_EXT_PDU_SESSION_CONTAINER);
        }
        Self {
            header,
            pdu_session_container: container,
            payload,
        }
    }

    /// Create an Echo Request message
    pub fn echo_request(sequence_number: u16) -> Self {
        let mut header = Gtp1Header::new(Gtp1uMessageType::EchoRequest as u8, 0);
        header.s = true;
        header.sequence_number = Some(sequence_number);
        Self {
            header,
            pdu_session_container: None,
            payload: Bytes::new(),
        }
    }

    /// Create an Echo Response for a received request
    pub fn echo_response(request: &Gtp1Header) -> Self {
        let mut header = Gtp1Header::new(Gtp1uMessageType::EchoResponse as u8, 0);
        header.s = true;
        header.sequence_number = Some(request.sequence_number.unwrap_or(0));
        // Recovery restart counter is always zero for GTP-U
        Self {
            header,
            pdu_session_container: None,
            payload: Bytes::from_static(&[GTP1_IE_RECOVERY, 0]),
        }
    }

    pub fn message_type(&self) -> Option<Gtp1uMessageType> {
        Gtp1uMessageType::try_from(self.header.message_type).ok()
    }

    /// Encode message to bytes
    pub fn encode(&self) -> GtpResult<BytesMut> {
        let mut header = self.header.clone();
        let mut extensions = BytesMut::new();
        if let Some(container) = &self.pdu_session_container {
            header.e = true;
            header.next_extension_header_type = Some(GTP1_EXT_PDU_SESSION_CONTAINER);
            container.encode(&mut extensions, GTP1_EXT_NO_MORE);
        }

        let optional = header.header_len() - GTPV1U_HEADER_LEN;
        let length = optional + extensions.len() + self.payload.len();
        header.length = u16::try_from(length).map_err(|_| GtpError::PayloadTooLarge(length))?;

        let mut buf = BytesMut::with_capacity(GTPV1U_HEADER_LEN + length);
        header.encode(&mut buf);
        buf.put_slice(&extensions);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decode message from bytes
    ///
    /// Trailing bytes past the header length are ignored. An E flag without a
    /// PDU Session Container in the chain is an error for G-PDUs.
    pub fn decode(buf: &mut Bytes) -> GtpResult<Self> {
        let header = Gtp1Header::decode(buf)?;
        let optional = header.header_len() - GTPV1U_HEADER_LEN;
        let mut body = buf.split_to(header.length as usize - optional);

        let mut pdu_session_container = None;
        if header.e {
            let first = header.next_extension_header_type.unwrap_or(GTP1_EXT_NO_MORE);
            for ext in decode_extension_headers(first, &mut body)? {
                if ext.ext_type == GTP1_EXT_PDU_SESSION_CONTAINER {
                    pdu_session_container = Some(PduSessionContainer::parse_content(&ext.content)?);
                }
            }
            if pdu_session_container.is_none() && header.message_type == Gtp1uMessageType::GPdu as u8 {
                return Err(GtpError::MissingPduSessionContainer);
            }
        }

        let payload = body.copy_to_bytes(body.remaining());
        Ok(Self {
            header,
            pdu_session_container,
            payload,
        })
    }
}
