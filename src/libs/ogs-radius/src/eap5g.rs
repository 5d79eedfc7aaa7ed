//! EAP-5G (TS 24.502 9.3.2)
//!
//! EAP-5G rides in an expanded EAP type with the 3GPP vendor id. Its data is
//! `message-id(1) | spare(1) | ...`, where the rest depends on the message
//! and the direction.

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::eap::{EapData, EapPacket, EAP_CODE_REQUEST, EAP_CODE_RESPONSE};
use crate::error::{need, RadiusError, RadiusResult};

/// 3GPP vendor id
pub const VENDOR_ID_3GPP: u32 = 10415;
/// EAP-5G vendor type
pub const VENDOR_TYPE_EAP_5G: u32 = 3;

/// EAP-5G message ids
pub const EAP_5G_START: u8 = 1;
pub const EAP_5G_NAS: u8 = 2;
pub const EAP_5G_NOTIFICATION: u8 = 3;
pub const EAP_5G_STOP: u8 = 4;

/// AN-parameter types
pub const AN_PARAM_GUAMI: u8 = 1;
pub const AN_PARAM_SELECTED_PLMN_ID: u8 = 2;
pub const AN_PARAM_REQUESTED_NSSAI: u8 = 3;
pub const AN_PARAM_ESTABLISHMENT_CAUSE: u8 = 4;
pub const AN_PARAM_SELECTED_NID: u8 = 5;
pub const AN_PARAM_UE_IDENTITY: u8 = 6;

/// AN-parameter type of the TNGF IPv4 contact info in 5G-Notification
pub const AN_PARAM_TNGF_IPV4_CONTACT_INFO: u8 = 1;

/// Establishment cause values (TS 24.502 9.3.2.2.2.3), numbered as the
/// NGAP RRCEstablishmentCause
pub const ESTABLISHMENT_CAUSE_EMERGENCY: u8 = 0;
pub const ESTABLISHMENT_CAUSE_HIGH_PRIORITY_ACCESS: u8 = 1;
pub const ESTABLISHMENT_CAUSE_MO_SIGNALLING: u8 = 3;
pub const ESTABLISHMENT_CAUSE_MO_DATA: u8 = 4;
pub const ESTABLISHMENT_CAUSE_MPS_PRIORITY_ACCESS: u8 = 8;
pub const ESTABLISHMENT_CAUSE_MCS_PRIORITY_ACCESS: u8 = 9;

/// GUAMI as carried in the AN-parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnGuami {
    pub plmn_identity: [u8; 3],
    pub amf_region_id: u8,
    /// 10 bits
    pub amf_set_id: u16,
    /// 6 bits
    pub amf_pointer: u8,
}

/// S-NSSAI of the requested NSSAI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnSnssai {
    pub sst: u8,
    pub sd: Option<[u8; 3]>,
}

/// 5GS mobile identity: `iei | length(2) | contents`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnUeIdentity {
    pub iei: u8,
    pub contents: Bytes,
}

/// Access network parameters sent with the first 5G-NAS
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnParameters {
    pub guami: Option<AnGuami>,
    pub selected_plmn_id: Option<[u8; 3]>,
    pub requested_nssai: Vec<AnSnssai>,
    /// Unknown values map to mo-Data
    pub establishment_cause: Option<u8>,
    pub selected_nid: Option<Bytes>,
    pub ue_identity: Option<AnUeIdentity>,
}

fn invalid(reason: impl Into<String>) -> RadiusError {
    RadiusError::InvalidEap5g(reason.into())
}

impl AnParameters {
    /// Parse the AN-parameter field `(type | length | value)*`.
    /// Unknown types are skipped; empty values are ignored.
    pub fn decode(field: &[u8]) -> RadiusResult<Self> {
        let mut params = AnParameters::default();
        let mut buf = field;

        while buf.remaining() >= 2 {
            let param_type = buf.get_u8();
            let len = buf.get_u8() as usize;
            need("AN-parameter value", len, buf.remaining())?;
            let value = &buf[..len];
            buf.advance(len);
            if len == 0 {
                continue;
            }

            match param_type {
                AN_PARAM_GUAMI => {
                    if len != 6 {
                        return Err(invalid(format!("GUAMI length {len}")));
                    }
                    params.guami = Some(AnGuami {
                        plmn_identity: [value[0], value[1], value[2]],
                        amf_region_id: value[3],
                        amf_set_id: (u16::from(value[4]) << 2) | u16::from(value[5] >> 6),
                        amf_pointer: value[5] & 0x3F,
                    });
                }
                AN_PARAM_SELECTED_PLMN_ID => {
                    if len != 3 {
                        return Err(invalid(format!("PLMN ID length {len}")));
                    }
                    params.selected_plmn_id = Some([value[0], value[1], value[2]]);
                }
                AN_PARAM_REQUESTED_NSSAI => {
                    let mut list = value;
                    while list.remaining() >= 2 {
                        let snssai_len = list.get_u8() as usize;
                        need("S-NSSAI", snssai_len, list.remaining())?;
                        let snssai = &list[..snssai_len];
                        list.advance(snssai_len);
                        match snssai_len {
                            1 => params.requested_nssai.push(AnSnssai { sst: snssai[0], sd: None }),
                            4 => params.requested_nssai.push(AnSnssai {
                                sst: snssai[0],
                                sd: Some([snssai[1], snssai[2], snssai[3]]),
                            }),
                            other => return Err(invalid(format!("S-NSSAI length {other}"))),
                        }
                    }
                }
                AN_PARAM_ESTABLISHMENT_CAUSE => {
                    if len != 1 {
                        return Err(invalid(format!("establishment cause length {len}")));
                    }
                    let cause = match value[0] & 0x0F {
                        c @ (ESTABLISHMENT_CAUSE_EMERGENCY
                        | ESTABLISHMENT_CAUSE_HIGH_PRIORITY_ACCESS
                        | ESTABLISHMENT_CAUSE_MO_SIGNALLING
                        | ESTABLISHMENT_CAUSE_MO_DATA
                        | ESTABLISHMENT_CAUSE_MPS_PRIORITY_ACCESS
                        | ESTABLISHMENT_CAUSE_MCS_PRIORITY_ACCESS) => c,
                        _ => ESTABLISHMENT_CAUSE_MO_DATA,
                    };
                    params.establishment_cause = Some(cause);
                }
                AN_PARAM_SELECTED_NID => {
                    params.selected_nid = Some(Bytes::copy_from_slice(value));
                }
                AN_PARAM_UE_IDENTITY => {
                    let mut id = value;
                    need("UE identity", 3, id.remaining())?;
                    let iei = id.get_u8();
                    let id_len = id.get_u16() as usize;
                    need("UE identity contents", id_len, id.remaining())?;
                    params.ue_identity = Some(AnUeIdentity {
                        iei,
                        contents: Bytes::copy_from_slice(&id[..id_len]),
                    });
                }
                _ => {}
            }
        }

        Ok(params)
    }

    /// Encode the AN-parameter field
    pub fn encode(&self) -> RadiusResult<Vec<u8>> {
        fn put(buf: &mut BytesMut, param_type: u8, value: &[u8]) -> RadiusResult<()> {
            let len = u8::try_from(value.len()).map_err(|_| RadiusError::TooLong {
                what: "AN-parameter",
                length: value.len(),
            })?;
            buf.put_u8(param_type);
            buf.put_u8(len);
            buf.put_slice(value);
            Ok(())
        }

        let mut buf = BytesMut::new();
        if let Some(g) = &self.guami {
            let set_id = g.amf_set_id & 0x03FF;
            put(
                &mut buf,
                AN_PARAM_GUAMI,
                &[
                    g.plmn_identity[0],
                    g.plmn_identity[1],
                    g.plmn_identity[2],
                    g.amf_region_id,
                    (set_id >> 2) as u8,
                    ((set_id as u8 & 0x03) << 6) | (g.amf_pointer & 0x3F),
                ],
            )?;
        }
        if let Some(plmn) = &self.selected_plmn_id {
            put(&mut buf, AN_PARAM_SELECTED_PLMN_ID, plmn)?;
        }
        if !self.requested_nssai.is_empty() {
            let mut list = Vec::new();
            for s in &self.requested_nssai {
                match s.sd {
                    Some(sd) => list.extend_from_slice(&[4, s.sst, sd[0], sd[1], sd[2]]),
                    None => list.extend_from_slice(&[1, s.sst]),
                }
            }
            put(&mut buf, AN_PARAM_REQUESTED_NSSAI, &list)?;
        }
        if let Some(cause) = self.establishment_cause {
            put(&mut buf, AN_PARAM_ESTABLISHMENT_CAUSE, &[cause & 0x0F])?;
        }
        if let Some(nid) = &self.selected_nid {
            put(&mut buf, AN_PARAM_SELECTED_NID, nid)?;
        }
        if let Some(id) = &self.ue_identity {
            let mut value = vec![id.iei];
            value.extend_from_slice(&(id.contents.len() as u16).to_be_bytes());
            value.extend_from_slice(&id.contents);
            put(&mut buf, AN_PARAM_UE_IDENTITY, &value)?;
        }
        Ok(buf.to_vec())
    }
}

/// EAP-5G message sent by the UE
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eap5gResponse {
    /// `2 | spare | AN-len(2) | AN-params | NAS-len(2) | NAS`
    Nas {
        an_parameters: Option<AnParameters>,
        nas_pdu: Bytes,
    },
    /// Answer to 5G-Notification
    Notification,
    Stop,
}

/// EAP-5G message sent by the TNGF
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eap5gRequest {
    Start,
    /// `2 | spare | NAS-len(2) | NAS`
    Nas(Bytes),
    /// TNGF IPv4 contact info
    Notification(Ipv4Addr),
}

fn read_lv16<'a>(buf: &mut &'a [u8], what: &'static str) -> RadiusResult<&'a [u8]> {
    need(what, 2, buf.remaining())?;
    let len = buf.get_u16() as usize;
    need(what, len, buf.remaining())?;
    let value = &buf[..len];
    buf.advance(len);
    Ok(value)
}

impl Eap5gResponse {
    pub fn decode(data: &[u8]) -> RadiusResult<Self> {
        need("EAP-5G header", 2, data.len())?;
        let mut buf = &data[2..];
        match data[0] {
            EAP_5G_STOP => Ok(Eap5gResponse::Stop),
            EAP_5G_NOTIFICATION => Ok(Eap5gResponse::Notification),
            EAP_5G_NAS => {
                let an_field = read_lv16(&mut buf, "AN-parameters")?;
                let an_parameters = if an_field.is_empty() {
                    None
                } else {
                    Some(AnParameters::decode(an_field)?)
                };
                let nas = read_lv16(&mut buf, "NAS PDU")?;
                if nas.is_empty() {
                    return Err(invalid("no NAS PDU"));
                }
                Ok(Eap5gResponse::Nas {
                    an_parameters,
                    nas_pdu: Bytes::copy_from_slice(nas),
                })
            }
            other => Err(invalid(format!("unexpected message id {other} from UE"))),
        }
    }

    pub fn encode(&self) -> RadiusResult<Vec<u8>> {
        match self {
            Eap5gResponse::Stop => Ok(vec![EAP_5G_STOP, 0]),
            Eap5gResponse::Notification => Ok(vec![EAP_5G_NOTIFICATION, 0]),
            Eap5gResponse::Nas { an_parameters, nas_pdu } => {
                let an = match an_parameters {
                    Some(p) => p.encode()?,
                    None => Vec::new(),
                };
                let mut buf = vec![EAP_5G_NAS, 0];
                buf.extend_from_slice(&len16(an.len(), "AN-parameters")?);
                buf.extend_from_slice(&an);
                buf.extend_from_slice(&len16(nas_pdu.len(), "NAS PDU")?);
                buf.extend_from_slice(nas_pdu);
                Ok(buf)
            }
        }
    }
}

fn len16(length: usize, what: &'static str) -> RadiusResult<[u8; 2]> {
    u16::try_from(length)
        .map(u16::to_be_bytes)
        .map_err(|_| RadiusError::TooLong { what, length })
}

impl Eap5gRequest {
    pub fn encode(&self) -> RadiusResult<Vec<u8>> {
        match self {
            Eap5gRequest::Start => Ok(vec![EAP_5G_START, 0]),
            Eap5gRequest::Nas(nas) => {
                if nas.is_empty() {
                    return Err(invalid("empty NAS PDU"));
                }
                let mut buf = vec![EAP_5G_NAS, 0];
                buf.extend_from_slice(&len16(nas.len(), "NAS PDU")?);
                buf.extend_from_slice(nas);
                Ok(buf)
            }
            Eap5gRequest::Notification(ip) => {
                let mut buf = vec![EAP_5G_NOTIFICATION, 0, 0x00, 0x06, AN_PARAM_TNGF_IPV4_CONTACT_INFO, 4];
                buf.extend_from_slice(&ip.octets());
                Ok(buf)
            }
        }
    }

    pub fn decode(data: &[u8]) -> RadiusResult<Self> {
        need("EAP-5G header", 2, data.len())?;
        let mut buf = &data[2..];
        match data[0] {
            EAP_5G_START => Ok(Eap5gRequest::Start),
            EAP_5G_NAS => Ok(Eap5gRequest::Nas(Bytes::copy_from_slice(read_lv16(&mut buf, "NAS PDU")?))),
            EAP_5G_NOTIFICATION => {
                let mut an = read_lv16(&mut buf, "AN-parameters")?;
                while an.remaining() >= 2 {
                    let param_type = an.get_u8();
                    let len = an.get_u8() as usize;
                    need("AN-parameter value", len, an.remaining())?;
                    if param_type == AN_PARAM_TNGF_IPV4_CONTACT_INFO && len == 4 {
                        return Ok(Eap5gRequest::Notification(Ipv4Addr::new(an[0], an[1], an[2], an[3])));
                    }
                    an.advance(len);
                }
                Err(invalid("no TNGF contact info"))
            }
            other => Err(invalid(format!("unexpected message id {other} from TNGF"))),
        }
    }

    /// Wrap as an EAP Request of the expanded EAP-5G type
    pub fn to_eap(&self, identifier: u8) -> RadiusResult<EapPacket> {
        Ok(EapPacket::expanded(
            EAP_CODE_REQUEST,
            identifier,
            VENDOR_ID_3GPP,
            VENDOR_TYPE_EAP_5G,
            self.encode()?,
        ))
    }
}

impl Eap5gResponse {
    /// Wrap as an EAP Response of the expanded EAP-5G type
    pub fn to_eap(&self, identifier: u8) -> RadiusResult<EapPacket> {
        Ok(EapPacket::expanded(
            EAP_CODE_RESPONSE,
            identifier,
            VENDOR_ID_3GPP,
            VENDOR_TYPE_EAP_5G,
            self.encode()?,
        ))
    }
}

/// Vendor data of an EAP-5G packet, after checking type, vendor id and
/// vendor type
pub fn eap5g_data(eap: &EapPacket) -> RadiusResult<&Bytes> {
    match &eap.data {
        EapData::Expanded {
            vendor_id,
            vendor_type,
            data,
        } => {
            if *vendor_id != VENDOR_ID_3GPP {
                return Err(invalid(format!("vendor id {vendor_id}")));
            }
            if *vendor_type != VENDOR_TYPE_EAP_5G {
                return Err(invalid(format!("vendor type {vendor_type}")));
            }
            Ok(data)
        }
        _ => Err(invalid(format!("EAP type {:?} is not expanded", eap.eap_type()))),
    }
}
