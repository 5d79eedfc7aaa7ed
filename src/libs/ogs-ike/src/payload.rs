//! IKE Payloads
//!
//! Payload bodies of RFC 7296 section 3 and the payload chain codec.
//! Every payload starts with the generic header
//! `next payload(1) | critical(1) | length(2)`.

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::error::{need, IkeError, IkeResult};
use crate::types::*;

fn take(buf: &mut Bytes, len: usize, what: &'static str) -> IkeResult<Bytes> {
    need(what, len, buf.remaining())?;
    Ok(buf.split_to(len))
}

fn invalid(payload_type: u8, reason: impl Into<String>) -> IkeError {
    IkeError::InvalidPayload {
        payload_type,
        reason: reason.into(),
    }
}

fn put_len_u16(buf: &mut BytesMut, at: usize, what: &'static str) -> IkeResult<()> {
    let length = buf.len() - at;
    let value = u16::try_from(length).map_err(|_| IkeError::TooLarge { what, length })?;
    buf[at + 2..at + 4].copy_from_slice(&value.to_be_bytes());
    Ok(())
}

// ============================================================================
// Security Association
// ============================================================================

/// A transform substructure. Only the key length attribute is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transform {
    pub transform_type: u8,
    pub transform_id: u16,
    /// Key length in bits
    pub key_length: Option<u16>,
}

impl Transform {
    pub fn new(transform_type: u8, transform_id: u16) -> Self {
        Self {
            transform_type,
            transform_id,
            key_length: None,
        }
    }

    pub fn with_key_length(mut self, bits: u16) -> Self {
        self.key_length = Some(bits);
        self
    }

    fn encode(&self, buf: &mut BytesMut, last: bool) {
        buf.put_u8(if last { 0 } else { 3 });
        buf.put_u8(0);
        buf.put_u16(if self.key_length.is_some() { 12 } else { 8 });
        buf.put_u8(self.transform_type);
        buf.put_u8(0);
        buf.put_u16(self.transform_id);
        if let Some(bits) = self.key_length {
            buf.put_u16(ATTRIBUTE_FORMAT_TV | ATTRIBUTE_KEY_LENGTH);
            buf.put_u16(bits);
        }
    }

    fn decode(buf: &mut Bytes) -> IkeResult<(Self, bool)> {
        need("transform", 8, buf.remaining())?;
        let more = buf.get_u8() == 3;
        buf.advance(1);
        let length = buf.get_u16() as usize;
        if length < 8 {
            return Err(IkeError::InvalidLength { what: "transform", length });
        }
        let transform_type = buf.get_u8();
        buf.advance(1);
        let transform_id = buf.get_u16();
        let mut attributes = take(buf, length - 8, "transform attributes")?;

        let mut key_length = None;
        while attributes.has_remaining() {
            need("transform attribute", 4, attributes.remaining())?;
            let attr_type = attributes.get_u16();
            if attr_type & ATTRIBUTE_FORMAT_TV != 0 {
                let value = attributes.get_u16();
                if attr_type & !ATTRIBUTE_FORMAT_TV == ATTRIBUTE_KEY_LENGTH {
                    key_length = Some(value);
                }
            } else {
                let attr_len = attributes.get_u16() as usize;
                take(&mut attributes, attr_len, "transform attribute value")?;
            }
        }

        Ok((
            Self {
                transform_type,
                transform_id,
                key_length,
            },
            more,
        ))
    }
}

/// A proposal substructure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub proposal_number: u8,
    pub protocol_id: u8,
    pub spi: Bytes,
    pub transforms: Vec<Transform>,
}

impl Proposal {
    pub fn new(proposal_number: u8, protocol_id: u8, spi: Bytes) -> Self {
        Self {
            proposal_number,
            protocol_id,
            spi,
            transforms: Vec::new(),
        }
    }

    pub fn push(&mut self, transform: Transform) -> &mut Self {
        self.transforms.push(transform);
        self
    }

    /// Transforms of one type, in offered order
    pub fn transforms_of(&self, transform_type: u8) -> impl Iterator<Item = &Transform> {
        self.transforms.iter().filter(move |t| t.transform_type == transform_type)
    }

    fn encode(&self, buf: &mut BytesMut, last: bool) -> IkeResult<()> {
        let start = buf.len();
        buf.put_u8(if last { 0 } else { 2 });
        buf.put_u8(0);
        buf.put_u16(0);
        buf.put_u8(self.proposal_number);
        buf.put_u8(self.protocol_id);
        let spi_size = u8::try_from(self.spi.len()).map_err(|_| IkeError::TooLarge {
            what: "proposal SPI",
            length: self.spi.len(),
        })?;
        buf.put_u8(spi_size);
        let count = u8::try_from(self.transforms.len()).map_err(|_| IkeError::TooLarge {
            what: "transform list",
            length: self.transforms.len(),
        })?;
        buf.put_u8(count);
        buf.put_slice(&self.spi);
        for (i, transform) in self.transforms.iter().enumerate() {
            transform.encode(buf, i + 1 == self.transforms.len());
        }
        put_len_u16(buf, start, "proposal")
    }

    fn decode(buf: &mut Bytes) -> IkeResult<(Self, bool)> {
        need("proposal", 8, buf.remaining())?;
        let more = buf.get_u8() == 2;
        buf.advance(1);
        let length = buf.get_u16() as usize;
        if length < 8 {
            return Err(IkeError::InvalidLength { what: "proposal", length });
        }
        let mut body = take(buf, length - 4, "proposal body")?;
        let proposal_number = body.get_u8();
        let protocol_id = body.get_u8();
        let spi_size = body.get_u8() as usize;
        let count = body.get_u8() as usize;
        let spi = take(&mut body, spi_size, "proposal SPI")?;

        let mut transforms = Vec::with_capacity(count);
        for _ in 0..count {
            let (transform, _) = Transform::decode(&mut body)?;
            transforms.push(transform);
        }
        if body.has_remaining() {
            return Err(IkeError::InvalidLength { what: "proposal", length });
        }

        Ok((
            Self {
                proposal_number,
                protocol_id,
                spi,
                transforms,
            },
            more,
        ))
    }
}

// ============================================================================
// Simple payload bodies
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExchange {
    pub dh_group: u16,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    pub id_type: u8,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub encoding: u8,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    pub method: u8,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    pub protocol_id: u8,
    pub spi_size: u8,
    pub spis: Vec<Bytes>,
}

// ============================================================================
// Notify
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub protocol_id: u8,
    pub notify_type: u16,
    pub spi: Bytes,
    pub data: Bytes,
}

impl Notification {
    pub fn new(notify_type: u16, data: impl Into<Bytes>) -> Self {
        Self {
            protocol_id: PROTOCOL_NONE,
            notify_type,
            spi: Bytes::new(),
            data: data.into(),
        }
    }

    /// Error notifies are the types below 16384
    pub fn is_error(&self) -> bool {
        self.notify_type < NOTIFY_INITIAL_CONTACT
    }

    pub fn nas_ip4_address(addr: Ipv4Addr) -> Self {
        Self::new(NOTIFY_NAS_IP4_ADDRESS, Bytes::copy_from_slice(&addr.octets()))
    }

    pub fn up_ip4_address(addr: Ipv4Addr) -> Self {
        Self::new(NOTIFY_UP_IP4_ADDRESS, Bytes::copy_from_slice(&addr.octets()))
    }

    pub fn nas_tcp_port(port: u16) -> Self {
        Self::new(NOTIFY_NAS_TCP_PORT, Bytes::copy_from_slice(&port.to_be_bytes()))
    }

    pub fn qos_info(info: &QosInfo) -> IkeResult<Self> {
        Ok(Self::new(NOTIFY_5G_QOS_INFO, info.encode()?))
    }
}

/// Content of the 5G_QOS_INFO notify
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QosInfo {
    pub pdu_session_id: u8,
    pub qfis: Vec<u8>,
    /// Default Child SA indicator
    pub dcsi: bool,
    pub dscp: Option<u8>,
}

impl QosInfo {
    /// `len | pduSessionId | numQfi | qfis | flags | [dscp]`, where `len`
    /// counts the whole structure
    pub fn encode(&self) -> IkeResult<Bytes> {
        let mut buf = BytesMut::with_capacity(5 + self.qfis.len());
        buf.put_u8(0);
        buf.put_u8(self.pdu_session_id);
        let count = u8::try_from(self.qfis.len()).map_err(|_| IkeError::TooLarge {
            what: "QFI list",
            length: self.qfis.len(),
        })?;
        buf.put_u8(count);
        buf.put_slice(&self.qfis);

        let mut flags = 0;
        if self.dcsi {
            flags |= QOS_INFO_FLAG_DCSI;
        }
        if self.dscp.is_some() {
            flags |= QOS_INFO_FLAG_DSCPI;
        }
        buf.put_u8(flags);
        if let Some(dscp) = self.dscp {
            buf.put_u8(dscp);
        }

        let length = buf.len();
        buf[0] = u8::try_from(length).map_err(|_| IkeError::TooLarge { what: "5G_QOS_INFO", length })?;
        Ok(buf.freeze())
    }

    pub fn decode(data: &[u8]) -> IkeResult<Self> {
        let mut buf = data;
        need("5G_QOS_INFO", 3, buf.remaining())?;
        let length = buf.get_u8() as usize;
        if length != data.len() {
            return Err(IkeError::InvalidLength { what: "5G_QOS_INFO", length });
        }
        let pdu_session_id = buf.get_u8();
        let count = buf.get_u8() as usize;
        need("5G_QOS_INFO", count + 1, buf.remaining())?;
        let qfis = buf[..count].to_vec();
        buf.advance(count);
        let flags = buf.get_u8();
        let dscp = if flags & QOS_INFO_FLAG_DSCPI != 0 {
            need("5G_QOS_INFO DSCP", 1, buf.remaining())?;
            Some(buf.get_u8())
        } else {
            None
        };
        Ok(Self {
            pdu_session_id,
            qfis,
            dcsi: flags & QOS_INFO_FLAG_DCSI != 0,
            dscp,
        })
    }
}

// ============================================================================
// Traffic selectors and configuration
// ============================================================================

/// IPv4 address range traffic selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficSelector {
    pub ip_protocol: u8,
    pub start_port: u16,
    pub end_port: u16,
    pub start_addr: Ipv4Addr,
    pub end_addr: Ipv4Addr,
}

impl TrafficSelector {
    /// All protocols and ports for a single address
    pub fn host(addr: Ipv4Addr) -> Self {
        Self {
            ip_protocol: IP_PROTOCOL_ALL,
            start_port: 0,
            end_port: 65535,
            start_addr: addr,
            end_addr: addr,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(TS_IPV4_ADDR_RANGE);
        buf.put_u8(self.ip_protocol);
        buf.put_u16(16);
        buf.put_u16(self.start_port);
        buf.put_u16(self.end_port);
        buf.put_slice(&self.start_addr.octets());
        buf.put_slice(&self.end_addr.octets());
    }

    fn decode(buf: &mut Bytes, payload_type: u8) -> IkeResult<Self> {
        need("traffic selector", 4, buf.remaining())?;
        let ts_type = buf.get_u8();
        let ip_protocol = buf.get_u8();
        let length = buf.get_u16() as usize;
        if ts_type != TS_IPV4_ADDR_RANGE {
            return Err(invalid(payload_type, format!("traffic selector type {ts_type}")));
        }
        if length != 16 {
            return Err(IkeError::InvalidLength { what: "traffic selector", length });
        }
        let mut body = take(buf, 12, "traffic selector")?;
        let start_port = body.get_u16();
        let end_port = body.get_u16();
        let start_addr = Ipv4Addr::from(body.get_u32());
        let end_addr = Ipv4Addr::from(body.get_u32());
        Ok(Self {
            ip_protocol,
            start_port,
            end_port,
            start_addr,
            end_addr,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigAttribute {
    pub attr_type: u16,
    pub value: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub cfg_type: u8,
    pub attributes: Vec<ConfigAttribute>,
}

impl Configuration {
    /// First attribute of a type
    pub fn attribute(&self, attr_type: u16) -> Option<&ConfigAttribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }
}

// ============================================================================
// Payload
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    SecurityAssociation(Vec<Proposal>),
    KeyExchange(KeyExchange),
    IdInitiator(Identification),
    IdResponder(Identification),
    Certificate(Certificate),
    CertificateRequest(Certificate),
    Authentication(Authentication),
    Nonce(Bytes),
    Notify(Notification),
    Delete(Delete),
    VendorId(Bytes),
    TrafficSelectorInitiator(Vec<TrafficSelector>),
    TrafficSelectorResponder(Vec<TrafficSelector>),
    /// SK payload: IV, ciphertext and ICV. `next_payload` is the type of the
    /// first inner payload.
    Encrypted { next_payload: u8, data: Bytes },
    Configuration(Configuration),
    Eap(Bytes),
    Unknown {
        payload_type: u8,
        critical: bool,
        data: Bytes,
    },
}

impl Payload {
    pub fn payload_type(&self) -> u8 {
        match self {
            Payload::SecurityAssociation(_) => PAYLOAD_SA,
            Payload::KeyExchange(_) => PAYLOAD_KE,
            Payload::IdInitiator(_) => PAYLOAD_IDI,
            Payload::IdResponder(_) => PAYLOAD_IDR,
            Payload::Certificate(_) => PAYLOAD_CERT,
            Payload::CertificateRequest(_) => PAYLOAD_CERTREQ,
            Payload::Authentication(_) => PAYLOAD_AUTH,
            Payload::Nonce(_) => PAYLOAD_NONCE,
            Payload::Notify(_) => PAYLOAD_NOTIFY,
            Payload::Delete(_) => PAYLOAD_DELETE,
            Payload::VendorId(_) => PAYLOAD_VENDOR,
            Payload::TrafficSelectorInitiator(_) => PAYLOAD_TSI,
            Payload::TrafficSelectorResponder(_) => PAYLOAD_TSR,
            Payload::Encrypted { .. } => PAYLOAD_SK,
            Payload::Configuration(_) => PAYLOAD_CP,
            Payload::Eap(_) => PAYLOAD_EAP,
            Payload::Unknown { payload_type, .. } => *payload_type,
        }
    }

    /// Encode the body without the generic payload header
    pub fn encode_body(&self, buf: &mut BytesMut) -> IkeResult<()> {
        match self {
            Payload::SecurityAssociation(proposals) => {
                for (i, proposal) in proposals.iter().enumerate() {
                    proposal.encode(buf, i + 1 == proposals.len())?;
                }
            }
            Payload::KeyExchange(ke) => {
                buf.put_u16(ke.dh_group);
                buf.put_u16(0);
                buf.put_slice(&ke.data);
            }
            Payload::IdInitiator(id) | Payload::IdResponder(id) => {
                buf.put_u8(id.id_type);
                buf.put_slice(&[0, 0, 0]);
                buf.put_slice(&id.data);
            }
            Payload::Certificate(cert) | Payload::CertificateRequest(cert) => {
                buf.put_u8(cert.encoding);
                buf.put_slice(&cert.data);
            }
            Payload::Authentication(auth) => {
                buf.put_u8(auth.method);
                buf.put_slice(&[0, 0, 0]);
                buf.put_slice(&auth.data);
            }
            Payload::Notify(n) => {
                buf.put_u8(n.protocol_id);
                let spi_size = u8::try_from(n.spi.len()).map_err(|_| IkeError::TooLarge {
                    what: "notify SPI",
                    length: n.spi.len(),
                })?;
                buf.put_u8(spi_size);
                buf.put_u16(n.notify_type);
                buf.put_slice(&n.spi);
                buf.put_slice(&n.data);
            }
            Payload::Delete(d) => {
                buf.put_u8(d.protocol_id);
                buf.put_u8(d.spi_size);
                let count = u16::try_from(d.spis.len()).map_err(|_| IkeError::TooLarge {
                    what: "delete SPI list",
                    length: d.spis.len(),
                })?;
                buf.put_u16(count);
                for spi in &d.spis {
                    if spi.len() != d.spi_size as usize {
                        return Err(invalid(PAYLOAD_DELETE, "SPI size mismatch"));
                    }
                    buf.put_slice(spi);
                }
            }
            Payload::TrafficSelectorInitiator(selectors) | Payload::TrafficSelectorResponder(selectors) => {
                let count = u8::try_from(selectors.len()).map_err(|_| IkeError::TooLarge {
                    what: "traffic selector list",
                    length: selectors.len(),
                })?;
                buf.put_u8(count);
                buf.put_slice(&[0, 0, 0]);
                for ts in selectors {
                    ts.encode(buf);
                }
            }
            Payload::Configuration(cp) => {
                buf.put_u8(cp.cfg_type);
                buf.put_slice(&[0, 0, 0]);
                for attr in &cp.attributes {
                    buf.put_u16(attr.attr_type & 0x7FFF);
                    let len = u16::try_from(attr.value.len()).map_err(|_| IkeError::TooLarge {
                        what: "configuration attribute",
                        length: attr.value.len(),
                    })?;
                    buf.put_u16(len);
                    buf.put_slice(&attr.value);
                }
            }
            Payload::Nonce(data)
            | Payload::VendorId(data)
            | Payload::Eap(data)
            | Payload::Encrypted { data, .. }
            | Payload::Unknown { data, .. } => buf.put_slice(data),
        }
        Ok(())
    }

    /// Decode a payload body of the given type
    pub fn decode_body(payload_type: u8, critical: bool, mut body: Bytes) -> IkeResult<Self> {
        let payload = match payload_type {
            PAYLOAD_SA => {
                let mut proposals = Vec::new();
                loop {
                    let (proposal, more) = Proposal::decode(&mut body)?;
                    proposals.push(proposal);
                    if !more {
                        break;
                    }
                }
                Payload::SecurityAssociation(proposals)
            }
            PAYLOAD_KE => {
                need("KE payload", 4, body.remaining())?;
                let dh_group = body.get_u16();
                body.advance(2);
                Payload::KeyExchange(KeyExchange { dh_group, data: body })
            }
            PAYLOAD_IDI | PAYLOAD_IDR => {
                need("ID payload", 4, body.remaining())?;
                let id_type = body.get_u8();
                body.advance(3);
                let id = Identification { id_type, data: body };
                if payload_type == PAYLOAD_IDI {
                    Payload::IdInitiator(id)
                } else {
                    Payload::IdResponder(id)
                }
            }
            PAYLOAD_CERT | PAYLOAD_CERTREQ => {
                need("certificate payload", 1, body.remaining())?;
                let encoding = body.get_u8();
                let cert = Certificate { encoding, data: body };
                if payload_type == PAYLOAD_CERT {
                    Payload::Certificate(cert)
                } else {
                    Payload::CertificateRequest(cert)
                }
            }
            PAYLOAD_AUTH => {
                need("AUTH payload", 4, body.remaining())?;
                let method = body.get_u8();
                body.advance(3);
                Payload::Authentication(Authentication { method, data: body })
            }
            PAYLOAD_NONCE => Payload::Nonce(body),
            PAYLOAD_NOTIFY => {
                need("notify payload", 4, body.remaining())?;
                let protocol_id = body.get_u8();
                let spi_size = body.get_u8() as usize;
                let notify_type = body.get_u16();
                let spi = take(&mut body, spi_size, "notify SPI")?;
                Payload::Notify(Notification {
                    protocol_id,
                    notify_type,
                    spi,
                    data: body,
                })
            }
            PAYLOAD_DELETE => {
                need("delete payload", 4, body.remaining())?;
                let protocol_id = body.get_u8();
                let spi_size = body.get_u8();
                let count = body.get_u16() as usize;
                let mut spis = Vec::new();
                for _ in 0..count {
                    spis.push(take(&mut body, spi_size as usize, "delete SPI")?);
                }
                Payload::Delete(Delete {
                    protocol_id,
                    spi_size,
                    spis,
                })
            }
            PAYLOAD_VENDOR => Payload::VendorId(body),
            PAYLOAD_TSI | PAYLOAD_TSR => {
                need("TS payload", 4, body.remaining())?;
                let count = body.get_u8() as usize;
                body.advance(3);
                let mut selectors = Vec::new();
                for _ in 0..count {
                    selectors.push(TrafficSelector::decode(&mut body, payload_type)?);
                }
                if payload_type == PAYLOAD_TSI {
                    Payload::TrafficSelectorInitiator(selectors)
                } else {
                    Payload::TrafficSelectorResponder(selectors)
                }
            }
            PAYLOAD_CP => {
                need("CP payload", 4, body.remaining())?;
                let cfg_type = body.get_u8();
                body.advance(3);
                let mut attributes = Vec::new();
                while body.has_remaining() {
                    need("configuration attribute", 4, body.remaining())?;
                    let attr_type = body.get_u16() & 0x7FFF;
                    let len = body.get_u16() as usize;
                    let value = take(&mut body, len, "configuration attribute value")?;
                    attributes.push(ConfigAttribute { attr_type, value });
                }
                Payload::Configuration(Configuration { cfg_type, attributes })
            }
            PAYLOAD_EAP => Payload::Eap(body),
            _ => Payload::Unknown {
                payload_type,
                critical,
                data: body,
            },
        };
        Ok(payload)
    }
}

/// Type of the first payload of a chain
pub fn first_payload_type(payloads: &[Payload]) -> u8 {
    payloads.first().map(Payload::payload_type).unwrap_or(PAYLOAD_NONE)
}

/// Encode a payload chain. An SK payload carries the type of its first
/// inner payload in its next-payload field and must be last.
pub fn encode_payloads(payloads: &[Payload], buf: &mut BytesMut) -> IkeResult<()> {
    for (i, payload) in payloads.iter().enumerate() {
        let next = match payload {
            Payload::Encrypted { next_payload, .. } => *next_payload,
            _ => payloads.get(i + 1).map(Payload::payload_type).unwrap_or(PAYLOAD_NONE),
        };
        let critical = match payload {
            Payload::Unknown { critical: true, .. } => 0x80,
            _ => 0,
        };

        let start = buf.len();
        buf.put_u8(next);
        buf.put_u8(critical);
        buf.put_u16(0);
        payload.encode_body(buf)?;
        put_len_u16(buf, start, "payload")?;
    }
    Ok(())
}

/// Decode a payload chain beginning with `first_type`. Decoding stops after
/// an SK payload.
pub fn decode_payloads(first_type: u8, mut buf: Bytes) -> IkeResult<Vec<Payload>> {
    let mut payloads = Vec::new();
    let mut current = first_type;

    while current != PAYLOAD_NONE {
        need("payload header", IKE_PAYLOAD_HEADER_LEN, buf.remaining())?;
        let next = buf.get_u8();
        let critical = buf.get_u8() & 0x80 != 0;
        let length = buf.get_u16() as usize;
        if length < IKE_PAYLOAD_HEADER_LEN {
            return Err(IkeError::InvalidLength { what: "payload", length });
        }
        let body = take(&mut buf, length - IKE_PAYLOAD_HEADER_LEN, "payload body")?;

        if current == PAYLOAD_SK {
            payloads.push(Payload::Encrypted {
                next_payload: next,
                data: body,
            });
            break;
        }
        payloads.push(Payload::decode_body(current, critical, body)?);
        current = next;
    }

    Ok(payloads)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(payloads: Vec<Payload>) -> Vec<Payload> {
        let mut buf = BytesMut::new();
        encode_payloads(&payloads, &mut buf).unwrap();
        decode_payloads(first_payload_type(&payloads), buf.freeze()).unwrap()
    }

    #[test]
    fn test_sa_with_key_length() {
        let mut proposal = Proposal::new(1, PROTOCOL_IKE, Bytes::new());
        proposal
            .push(Transform::new(TRANSFORM_ENCR, ENCR_AES_CBC).with_key_length(256))
            .push(Transform::new(TRANSFORM_PRF, PRF_HMAC_SHA1))
            .push(Transform::new(TRANSFORM_INTEG, AUTH_HMAC_SHA1_96))
            .push(Transform::new(TRANSFORM_DH, DH_2048_BIT_MODP));

        let mut buf = BytesMut::new();
        Payload::SecurityAssociation(vec![proposal.clone()])
            .encode_body(&mut buf)
            .unwrap();
        // proposal header 8 + 12 + 3 * 8
        assert_eq!(buf.len(), 44);
        assert_eq!(&buf[..4], &[0, 0, 0, 44]);
        // first transform: more, length 12, ENCR, id 12, key length 256
        assert_eq!(&buf[8..20], &[3, 0, 0, 12, 1, 0, 0, 12, 0x80, 0x0E, 0x01, 0x00]);

        let decoded = round_trip(vec![Payload::SecurityAssociation(vec![proposal.clone()])]);
        assert_eq!(decoded, vec![Payload::SecurityAssociation(vec![proposal])]);
    }

    #[test]
    fn test_unknown_tlv_attribute_skipped() {
        // transform with a TLV attribute of 2 bytes
        let raw = [0u8, 0, 0, 14, 3, 0, 0, 1, 0x00, 0x05, 0x00, 0x02, 0xAA, 0xBB];
        let (transform, more) = Transform::decode(&mut Bytes::copy_from_slice(&raw)).unwrap();
        assert!(!more);
        assert_eq!(transform, Transform::new(TRANSFORM_INTEG, AUTH_HMAC_MD5_96));
    }

    #[test]
    fn test_chain_with_encrypted_last() {
        let payloads = vec![
            Payload::Nonce(Bytes::from_static(&[1, 2, 3])),
            Payload::Encrypted {
                next_payload: PAYLOAD_IDI,
                data: Bytes::from_static(&[9; 20]),
            },
        ];
        let mut buf = BytesMut::new();
        encode_payloads(&payloads, &mut buf).unwrap();
        assert_eq!(buf[0], PAYLOAD_SK);
        assert_eq!(buf[7], PAYLOAD_IDI);
        assert_eq!(decode_payloads(PAYLOAD_NONCE, buf.freeze()).unwrap(), payloads);
    }

    #[test]
    fn test_notify_ts_cp_round_trip() {
        let payloads = vec![
            Payload::Notify(Notification::nas_tcp_port(20000)),
            Payload::TrafficSelectorInitiator(vec![TrafficSelector::host(Ipv4Addr::new(10, 0, 0, 1))]),
            Payload::Configuration(Configuration {
                cfg_type: CFG_REQUEST,
                attributes: vec![ConfigAttribute {
                    attr_type: INTERNAL_IP4_ADDRESS,
                    value: Bytes::new(),
                }],
            }),
            Payload::Delete(Delete {
                protocol_id: PROTOCOL_IKE,
                spi_size: 0,
                spis: vec![],
            }),
        ];
        assert_eq!(round_trip(payloads.clone()), payloads);
    }

    #[test]
    fn test_unknown_payload_kept_opaque() {
        let payloads = vec![Payload::Unknown {
            payload_type: 200,
            critical: true,
            data: Bytes::from_static(b"opaque"),
        }];
        assert_eq!(round_trip(payloads.clone()), payloads);
    }

    #[test]
    fn test_qos_info_layout() {
        let info = QosInfo {
            pdu_session_id: 5,
            qfis: vec![1, 9],
            dcsi: true,
            dscp: None,
        };
        let data = info.encode().unwrap();
        assert_eq!(&data[..], &[6, 5, 2, 1, 9, QOS_INFO_FLAG_DCSI]);
        assert_eq!(QosInfo::decode(&data).unwrap(), info);

        let with_dscp = QosInfo { dscp: Some(46), ..info };
        let data = with_dscp.encode().unwrap();
        assert_eq!(&data[..], &[7, 5, 2, 1, 9, QOS_INFO_FLAG_DCSI | QOS_INFO_FLAG_DSCPI, 46]);
        assert_eq!(QosInfo::decode(&data).unwrap(), with_dscp);
    }

    #[test]
    fn test_truncated_payload() {
        // claims 16 bytes, has 6
        let raw = Bytes::from_static(&[0, 0, 0, 16, 1, 2]);
        assert!(matches!(
            decode_payloads(PAYLOAD_NONCE, raw),
            Err(IkeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_ipv6_selector_rejected() {
        let raw = Bytes::from_static(&[1, 0, 0, 0, TS_IPV6_ADDR_RANGE, 0, 0, 40]);
        assert!(Payload::decode_body(PAYLOAD_TSR, false, raw).is_err());
    }
}
