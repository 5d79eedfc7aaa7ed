//! RADIUS Messages (RFC 2865, RFC 3579 3.2)
//!
//! `code(1) | identifier(1) | length(2) | authenticator(16) | attributes`,
//! each attribute being `type(1) | length(1) | value`.

use bytes::{Buf, Bytes};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};

use crate::error::{need, RadiusError, RadiusResult};

/// RADIUS header length
pub const RADIUS_HEADER_LEN: usize = 20;
/// Authenticator length
pub const RADIUS_AUTHENTICATOR_LEN: usize = 16;
/// Largest RADIUS packet
pub const RADIUS_MAX_PACKET_LEN: usize = 4096;
/// Largest attribute value
pub const RADIUS_MAX_ATTRIBUTE_LEN: usize = 253;

/// Packet codes
pub const RADIUS_ACCESS_REQUEST: u8 = 1;
pub const RADIUS_ACCESS_ACCEPT: u8 = 2;
pub const RADIUS_ACCESS_REJECT: u8 = 3;
pub const RADIUS_ACCESS_CHALLENGE: u8 = 11;

/// Attribute types
pub const ATTR_USER_NAME: u8 = 1;
pub const ATTR_STATE: u8 = 24;
pub const ATTR_VENDOR_SPECIFIC: u8 = 26;
pub const ATTR_CALLED_STATION_ID: u8 = 30;
pub const ATTR_CALLING_STATION_ID: u8 = 31;
pub const ATTR_EAP_MESSAGE: u8 = 79;
pub const ATTR_MESSAGE_AUTHENTICATOR: u8 = 80;

type HmacMd5 = Hmac<Md5>;

/// One attribute TLV
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadiusAttribute {
    pub attr_type: u8,
    pub value: Bytes,
}

impl RadiusAttribute {
    pub fn new(attr_type: u8, value: impl Into<Bytes>) -> Self {
        Self {
            attr_type,
            value: value.into(),
        }
    }
}

/// RADIUS Message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadiusMessage {
    pub code: u8,
    pub identifier: u8,
    pub authenticator: [u8; RADIUS_AUTHENTICATOR_LEN],
    pub attributes: Vec<RadiusAttribute>,
}

impl RadiusMessage {
    pub fn new(code: u8, identifier: u8, authenticator: [u8; RADIUS_AUTHENTICATOR_LEN]) -> Self {
        Self {
            code,
            identifier,
            authenticator,
            attributes: Vec::new(),
        }
    }

    pub fn push(&mut self, attr_type: u8, value: impl Into<Bytes>) -> &mut Self {
        self.attributes.push(RadiusAttribute::new(attr_type, value));
        self
    }

    /// First attribute value of a type
    pub fn attribute(&self, attr_type: u8) -> Option<&Bytes> {
        self.attributes.iter().find(|a| a.attr_type == attr_type).map(|a| &a.value)
    }

    /// EAP-Message attributes concatenated (RFC 3579 3.1)
    pub fn eap_message(&self) -> Option<Vec<u8>> {
        let mut eap = Vec::new();
        for attr in self.attributes.iter().filter(|a| a.attr_type == ATTR_EAP_MESSAGE) {
            eap.extend_from_slice(&attr.value);
        }
        if eap.is_empty() {
            None
        } else {
            Some(eap)
        }
    }

    /// Append an EAP packet, split over as many attributes as needed
    pub fn push_eap_message(&mut self, eap: &[u8]) -> &mut Self {
        for chunk in eap.chunks(RADIUS_MAX_ATTRIBUTE_LEN) {
            self.push(ATTR_EAP_MESSAGE, Bytes::copy_from_slice(chunk));
        }
        self
    }

    pub fn encode(&self) -> RadiusResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(RADIUS_HEADER_LEN);
        buf.push(self.code);
        buf.push(self.identifier);
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&self.authenticator);

        for attr in &self.attributes {
            if attr.value.len() > RADIUS_MAX_ATTRIBUTE_LEN {
                return Err(RadiusError::TooLong {
                    what: "attribute",
                    length: attr.value.len(),
                });
            }
            buf.push(attr.attr_type);
            buf.push((attr.value.len() + 2) as u8);
            buf.extend_from_slice(&attr.value);
        }

        let length = buf.len();
        if length > RADIUS_MAX_PACKET_LEN {
            return Err(RadiusError::TooLong { what: "packet", length });
        }
        buf[2..4].copy_from_slice(&(length as u16).to_be_bytes());
        Ok(buf)
    }

    /// Decode a datagram. The length field must equal the datagram length.
    pub fn decode(data: &[u8]) -> RadiusResult<Self> {
        need("RADIUS header", RADIUS_HEADER_LEN, data.len())?;
        let mut buf = data;
        let code = buf.get_u8();
        let identifier = buf.get_u8();
        let length = buf.get_u16() as usize;
        if length != data.len() {
            return Err(RadiusError::InvalidLength { what: "packet", length });
        }
        let mut authenticator = [0u8; RADIUS_AUTHENTICATOR_LEN];
        buf.copy_to_slice(&mut authenticator);

        let mut attributes = Vec::new();
        while buf.has_remaining() {
            need("attribute header", 2, buf.remaining())?;
            let attr_type = buf.get_u8();
            let attr_len = buf.get_u8() as usize;
            if attr_len < 2 {
                return Err(RadiusError::InvalidLength {
                    what: "attribute",
                    length: attr_len,
                });
            }
            need("attribute value", attr_len - 2, buf.remaining())?;
            let value = Bytes::copy_from_slice(&buf[..attr_len - 2]);
            buf.advance(attr_len - 2);
            attributes.push(RadiusAttribute { attr_type, value });
        }

        Ok(Self {
            code,
            identifier,
            authenticator,
            attributes,
        })
    }

    /// Check the Message-Authenticator of a request. `None` when absent.
    pub fn verify_message_authenticator(&self, secret: &[u8]) -> RadiusResult<Option<bool>> {
        let Some(received) = self.attribute(ATTR_MESSAGE_AUTHENTICATOR).cloned() else {
            return Ok(None);
        };
        let mut zeroed = self.clone();
        zeroed.zero_message_authenticator();
        let expected = message_authenticator(&zeroed.encode()?, secret);
        Ok(Some(received[..] == expected[..]))
    }

    /// Encode a response to a request: the Message-Authenticator is computed
    /// over the packet carrying the request authenticator, then the
    /// response authenticator replaces it.
    pub fn sign_response(
        &self,
        request_authenticator: &[u8; RADIUS_AUTHENTICATOR_LEN],
        secret: &[u8],
    ) -> RadiusResult<Vec<u8>> {
        let mut msg = self.clone();
        msg.authenticator = *request_authenticator;
        if msg.attribute(ATTR_MESSAGE_AUTHENTICATOR).is_none() {
            msg.push(ATTR_MESSAGE_AUTHENTICATOR, Bytes::from_static(&[0; 16]));
        }
        msg.zero_message_authenticator();

        let mac = message_authenticator(&msg.encode()?, secret);
        for attr in msg.attributes.iter_mut() {
            if attr.attr_type == ATTR_MESSAGE_AUTHENTICATOR {
                attr.value = Bytes::copy_from_slice(&mac);
            }
        }

        let mut packet = msg.encode()?;
        let auth = response_authenticator(&packet, request_authenticator, secret);
        packet[4..RADIUS_HEADER_LEN].copy_from_slice(&auth);
        Ok(packet)
    }

    fn zero_message_authenticator(&mut self) {
        for attr in self.attributes.iter_mut() {
            if attr.attr_type == ATTR_MESSAGE_AUTHENTICATOR {
                attr.value = Bytes::from_static(&[0; 16]);
            }
        }
    }
}

/// `MD5(code | id | length | request authenticator | attributes | secret)`
pub fn response_authenticator(
    packet: &[u8],
    request_authenticator: &[u8; RADIUS_AUTHENTICATOR_LEN],
    secret: &[u8],
) -> [u8; RADIUS_AUTHENTICATOR_LEN] {
    let mut md5 = Md5::new();
    md5.update(&packet[..4.min(packet.len())]);
    md5.update(request_authenticator);
    if packet.len() > RADIUS_HEADER_LEN {
        md5.update(&packet[RADIUS_HEADER_LEN..]);
    }
    md5.update(secret);
    md5.finalize().into()
}

/// HMAC-MD5 keyed with the secret over a packet whose Message-Authenticator
/// value is zeroed
pub fn message_authenticator(packet: &[u8], secret: &[u8]) -> [u8; RADIUS_AUTHENTICATOR_LEN] {
    // HMAC accepts keys of any length
    let mut mac = match HmacMd5::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return [0; RADIUS_AUTHENTICATOR_LEN],
    };
    mac.update(packet);
    mac.finalize().into_bytes().into()
}
