//! EAP packets (RFC 3748)
//!
//! `code(1) | identifier(1) | length(2) | [type(1) | type data]`

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{need, RadiusError, RadiusResult};

/// EAP codes
pub const EAP_CODE_REQUEST: u8 = 1;
pub const EAP_CODE_RESPONSE: u8 = 2;
pub const EAP_CODE_SUCCESS: u8 = 3;
pub const EAP_CODE_FAILURE: u8 = 4;

/// EAP types
pub const EAP_TYPE_IDENTITY: u8 = 1;
pub const EAP_TYPE_NOTIFICATION: u8 = 2;
pub const EAP_TYPE_NAK: u8 = 3;
pub const EAP_TYPE_EXPANDED: u8 = 254;

/// EAP type data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EapData {
    /// Success and Failure carry no type
    None,
    Identity(Bytes),
    Notification(Bytes),
    Nak(Bytes),
    /// `254 | vendor-id(3) | vendor-type(4) | data`
    Expanded {
        vendor_id: u32,
        vendor_type: u32,
        data: Bytes,
    },
    Other { eap_type: u8, data: Bytes },
}

/// EAP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapPacket {
    pub code: u8,
    pub identifier: u8,
    pub data: EapData,
}

impl EapPacket {
    pub fn success(identifier: u8) -> Self {
        Self {
            code: EAP_CODE_SUCCESS,
            identifier,
            data: EapData::None,
        }
    }

    pub fn failure(identifier: u8) -> Self {
        Self {
            code: EAP_CODE_FAILURE,
            identifier,
            data: EapData::None,
        }
    }

    pub fn expanded(code: u8, identifier: u8, vendor_id: u32, vendor_type: u32, data: impl Into<Bytes>) -> Self {
        Self {
            code,
            identifier,
            data: EapData::Expanded {
                vendor_id: vendor_id & 0x00FF_FFFF,
                vendor_type,
                data: data.into(),
            },
        }
    }

    pub fn eap_type(&self) -> Option<u8> {
        match &self.data {
            EapData::None => None,
            EapData::Identity(_) => Some(EAP_TYPE_IDENTITY),
            EapData::Notification(_) => Some(EAP_TYPE_NOTIFICATION),
            EapData::Nak(_) => Some(EAP_TYPE_NAK),
            EapData::Expanded { .. } => Some(EAP_TYPE_EXPANDED),
            EapData::Other { eap_type, .. } => Some(*eap_type),
        }
    }

    pub fn encode(&self) -> RadiusResult<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u8(self.code);
        buf.put_u8(self.identifier);
        buf.put_u16(0);
        match &self.data {
            EapData::None => {}
            EapData::Identity(data) | EapData::Notification(data) | EapData::Nak(data) => {
                buf.put_u8(self.eap_type().unwrap_or_default());
                buf.put_slice(data);
            }
            EapData::Expanded {
                vendor_id,
                vendor_type,
                data,
            } => {
                buf.put_u32((u32::from(EAP_TYPE_EXPANDED) << 24) | (vendor_id & 0x00FF_FFFF));
                buf.put_u32(*vendor_type);
                buf.put_slice(data);
            }
            EapData::Other { eap_type, data } => {
                buf.put_u8(*eap_type);
                buf.put_slice(data);
            }
        }

        let length = buf.len();
        let value = u16::try_from(length).map_err(|_| RadiusError::TooLong { what: "EAP packet", length })?;
        buf[2..4].copy_from_slice(&value.to_be_bytes());
        Ok(buf.to_vec())
    }

    /// Decode an EAP packet. The length field must equal the input length.
    pub fn decode(data: &[u8]) -> RadiusResult<Self> {
        need("EAP header", 4, data.len())?;
        let mut buf = data;
        let code = buf.get_u8();
        let identifier = buf.get_u8();
        let length = buf.get_u16() as usize;
        if length < 4 || length != data.len() {
            return Err(RadiusError::InvalidLength { what: "EAP packet", length });
        }

        let data = if !buf.has_remaining() {
            if code == EAP_CODE_REQUEST || code == EAP_CODE_RESPONSE {
                return Err(RadiusError::InvalidEap(format!("code {code} without type")));
            }
            EapData::None
        } else {
            let eap_type = buf.get_u8();
            match eap_type {
                EAP_TYPE_IDENTITY => EapData::Identity(Bytes::copy_from_slice(buf)),
                EAP_TYPE_NOTIFICATION => EapData::Notification(Bytes::copy_from_slice(buf)),
                EAP_TYPE_NAK => EapData::Nak(Bytes::copy_from_slice(buf)),
                EAP_TYPE_EXPANDED => {
                    need("EAP expanded type", 7, buf.remaining())?;
                    let vendor_id = (u32::from(buf.get_u8()) << 16) | u32::from(buf.get_u16());
                    let vendor_type = buf.get_u32();
                    EapData::Expanded {
                        vendor_id,
                        vendor_type,
                        data: Bytes::copy_from_slice(buf),
                    }
                }
                _ => EapData::Other {
                    eap_type,
                    data: Bytes::copy_from_slice(buf),
                },
            }
        };

        Ok(Self {
            code,
            identifier,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_failure() {
        assert_eq!(EapPacket::success(9).encode().unwrap(), vec![3, 9, 0, 4]);
        assert_eq!(EapPacket::decode(&[4, 9, 0, 4]).unwrap(), EapPacket::failure(9));
    }

    #[test]
    fn test_identity_response() {
        let raw = [2, 1, 0, 8, 1, b'u', b's', b'r'];
        let eap = EapPacket::decode(&raw).unwrap();
        assert_eq!(eap.code, EAP_CODE_RESPONSE);
        assert_eq!(eap.data, EapData::Identity(Bytes::from_static(b"usr")));
        assert_eq!(eap.encode().unwrap(), raw.to_vec());
    }

    #[test]
    fn test_expanded_layout() {
        let eap = EapPacket::expanded(EAP_CODE_REQUEST, 3, 10415, 3, vec![1, 0]);
        let bytes = eap.encode().unwrap();
        assert_eq!(bytes, vec![1, 3, 0, 14, 254, 0x00, 0x28, 0xAF, 0, 0, 0, 3, 1, 0]);
        assert_eq!(EapPacket::decode(&bytes).unwrap(), eap);
    }

    #[test]
    fn test_length_mismatch_and_truncation() {
        assert!(EapPacket::decode(&[2, 1, 0, 9, 1, b'u']).is_err());
        assert!(EapPacket::decode(&[2, 1, 0, 3]).is_err());
        assert!(EapPacket::decode(&[2, 1, 0, 4]).is_err());
        assert!(EapPacket::decode(&[2, 1, 0, 8, 254, 0, 0, 1]).is_err());
    }
}
