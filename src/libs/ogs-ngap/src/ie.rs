//! NGAP IE Encoding/Decoding Helpers
//!
//! Functions for encoding individual Information Elements into raw APER bytes
//! suitable for ProtocolIeField values, and decoding them back. The nested
//! SEQUENCE helpers are shared with the PDU session transfer codecs.

use std::net::Ipv4Addr;

use ogs_asn1c::ngap::cause::Cause;
use ogs_asn1c::ngap::ies::{
    skip_ie_extensions, AmfUeNgapId, BitRate, NasPdu, PduSessionId, PlmnIdentity,
    ProtocolIeContainer, ProtocolIeField, RanUeNgapId, RelativeAmfCapacity, RrcEstablishmentCause,
    SNssai, Tac, TimeToWait, UeNgapIds as AsnUeNgapIds,
};
use ogs_asn1c::ngap::types::{Criticality, ProtocolIeId};
use ogs_asn1c::per::{AperDecode, AperDecoder, AperEncode, AperEncoder, Constraint, PerError};

use crate::error::{NgapError, NgapResult};
use crate::types::*;

// maxnoof* bounds from NGAP-Constants
pub const MAX_NO_OF_PDU_SESSIONS: usize = 256;
pub const MAX_NO_OF_TACS: usize = 256;
pub const MAX_NO_OF_BPLMNS: usize = 12;
pub const MAX_NO_OF_SLICE_ITEMS: usize = 1024;
pub const MAX_NO_OF_SERVED_GUAMIS: usize = 256;
pub const MAX_NO_OF_PLMNS: usize = 12;
pub const MAX_NO_OF_ALLOWED_S_NSSAIS: usize = 8;
pub const MAX_NO_OF_QOS_FLOWS: usize = 64;
pub const MAX_NO_OF_NG_CONNECTIONS_TO_RESET: usize = 65536;
pub const MAX_NO_OF_MULTI_CONNECTIVITY: usize = 4;

// ============================================================================
// IE Encoding Helpers
// ============================================================================

/// Run `f` against a fresh encoder and return the octet-aligned result
pub(crate) fn encode_with<F>(f: F) -> NgapResult<Vec<u8>>
where
    F: FnOnce(&mut AperEncoder) -> NgapResult<()>,
{
    let mut encoder = AperEncoder::new();
    f(&mut encoder)?;
    Ok(encoder.into_aligned_vec())
}

/// Run `f` against a decoder over `raw`
pub(crate) fn decode_with<T, F>(raw: &[u8], f: F) -> NgapResult<T>
where
    F: FnOnce(&mut AperDecoder) -> NgapResult<T>,
{
    let mut decoder = AperDecoder::new(raw);
    f(&mut decoder)
}

fn push_raw(container: &mut ProtocolIeContainer, id: ProtocolIeId, criticality: Criticality, value: Vec<u8>) {
    container.push(ProtocolIeField { id, criticality, value });
}

/// Encode an APER value and append it as a ProtocolIeField
fn push_value<T: AperEncode>(
    container: &mut ProtocolIeContainer,
    id: ProtocolIeId,
    criticality: Criticality,
    value: &T,
) -> NgapResult<()> {
    let raw = encode_with(|encoder| Ok(value.encode_aper(encoder)?))?;
    push_raw(container, id, criticality, raw);
    Ok(())
}

/// Decode a value from raw APER bytes in a ProtocolIeField.value
fn decode_value<T: AperDecode>(raw: &[u8]) -> NgapResult<T> {
    decode_with(raw, |decoder| Ok(T::decode_aper(decoder)?))
}

fn invalid(ie_name: &'static str, reason: impl Into<String>) -> NgapError {
    NgapError::InvalidIeValue {
        ie_name,
        reason: reason.into(),
    }
}

// ============================================================================
// SEQUENCE / SEQUENCE OF helpers
// ============================================================================

/// Extension bit (always clear on encode) followed by the OPTIONAL bitmap
pub(crate) fn write_preamble(encoder: &mut AperEncoder, optionals: &[bool]) {
    encoder.write_bit(false);
    for present in optionals {
        encoder.write_bit(*present);
    }
}

/// Decoded SEQUENCE preamble. The last optional is always iE-Extensions.
pub(crate) struct Preamble<const N: usize> {
    extended: bool,
    present: [bool; N],
}

impl<const N: usize> Preamble<N> {
    pub(crate) fn read(decoder: &mut AperDecoder) -> NgapResult<Self> {
        let extended = decoder.read_bit()?;
        let mut present = [false; N];
        for bit in present.iter_mut() {
            *bit = decoder.read_bit()?;
        }
        Ok(Self { extended, present })
    }

    pub(crate) fn has(&self, index: usize) -> bool {
        self.present.get(index).copied().unwrap_or(false)
    }

    /// Skip iE-Extensions and extension additions after the root components
    pub(crate) fn finish(&self, decoder: &mut AperDecoder) -> NgapResult<()> {
        if self.present.last().copied().unwrap_or(false) {
            skip_ie_extensions(decoder)?;
        }
        if self.extended {
            skip_extension_additions(decoder)?;
        }
        Ok(())
    }
}

/// Skip the extension-addition bitmap and every present open-type addition
fn skip_extension_additions(decoder: &mut AperDecoder) -> NgapResult<()> {
    let count = decoder.decode_normally_small_non_negative()? as usize + 1;
    if count > decoder.remaining_bits() {
        return Err(PerError::InvalidLength { length: count }.into());
    }
    let mut present = Vec::with_capacity(count);
    for _ in 0..count {
        present.push(decoder.read_bit()?);
    }
    for addition in present {
        if addition {
            decoder.decode_open_type()?;
        }
    }
    Ok(())
}

pub(crate) fn write_list<T, F>(
    encoder: &mut AperEncoder,
    list: &'static str,
    items: &[T],
    min: usize,
    max: usize,
    mut each: F,
) -> NgapResult<()>
where
    F: FnMut(&mut AperEncoder, &T) -> NgapResult<()>,
{
    if items.len() < min || items.len() > max {
        return Err(NgapError::ListSize { list, len: items.len(), min, max });
    }
    encoder.encode_constrained_length(items.len(), min, max)?;
    for item in items {
        each(encoder, item)?;
    }
    Ok(())
}

pub(crate) fn read_list<T, F>(
    decoder: &mut AperDecoder,
    min: usize,
    max: usize,
    mut each: F,
) -> NgapResult<Vec<T>>
where
    F: FnMut(&mut AperDecoder) -> NgapResult<T>,
{
    let count = decoder.decode_constrained_length(min, max)?;
    // every item carries at least its extension bit
    if count > decoder.remaining_bits() {
        return Err(PerError::InvalidLength { length: count }.into());
    }
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(each(decoder)?);
    }
    Ok(items)
}

// ============================================================================
// Primitive helpers
// ============================================================================

pub(crate) fn write_plmn(encoder: &mut AperEncoder, plmn: &[u8; 3]) -> NgapResult<()> {
    Ok(PlmnIdentity(*plmn).encode_aper(encoder)?)
}

pub(crate) fn read_plmn(decoder: &mut AperDecoder) -> NgapResult<[u8; 3]> {
    Ok(PlmnIdentity::decode_aper(decoder)?.0)
}

/// PrintableString (SIZE(1..150, ...)) as used by AMFName and RANNodeName
fn write_printable_string(encoder: &mut AperEncoder, ie_name: &'static str, value: &str) -> NgapResult<()> {
    if !value.is_ascii() {
        return Err(invalid(ie_name, "not a printable string"));
    }
    encoder.write_bit(false);
    encoder.encode_octet_string(value.as_bytes(), Some(1), Some(150))?;
    Ok(())
}

fn read_printable_string(decoder: &mut AperDecoder, ie_name: &'static str) -> NgapResult<String> {
    let raw = if decoder.read_bit()? {
        decoder.decode_octet_string(None, None)?
    } else {
        decoder.decode_octet_string(Some(1), Some(150))?
    };
    String::from_utf8(raw).map_err(|e| invalid(ie_name, e.to_string()))
}

/// TransportLayerAddress ::= BIT STRING (SIZE(1..160, ...)), IPv4 form
pub(crate) fn write_transport_layer_address(encoder: &mut AperEncoder, address: Ipv4Addr) -> NgapResult<()> {
    encoder.write_bit(false);
    encoder.encode_bit_string(&address.octets(), 32, Some(1), Some(160))?;
    Ok(())
}

/// Accepts a bare IPv4 address or the IPv4-then-IPv6 dual form
pub(crate) fn read_transport_layer_address(decoder: &mut AperDecoder) -> NgapResult<Ipv4Addr> {
    if decoder.read_bit()? {
        return Err(PerError::UnsupportedExtension.into());
    }
    let (bits, len) = decoder.decode_bit_string(Some(1), Some(160))?;
    if len != 32 && len != 160 {
        return Err(invalid("TransportLayerAddress", format!("no IPv4 address in {len} bits")));
    }
    Ok(Ipv4Addr::new(bits[0], bits[1], bits[2], bits[3]))
}

/// UPTransportLayerInformation ::= CHOICE { gTPTunnel, choice-Extensions }
pub(crate) fn write_gtp_tunnel(encoder: &mut AperEncoder, tunnel: &GtpTunnel) -> NgapResult<()> {
    encoder.encode_choice_index(0, 2, false)?;
    write_preamble(encoder, &[false]);
    write_transport_layer_address(encoder, tunnel.address)?;
    encoder.encode_octet_string(&tunnel.teid.to_be_bytes(), Some(4), Some(4))?;
    Ok(())
}

pub(crate) fn read_gtp_tunnel(decoder: &mut AperDecoder) -> NgapResult<GtpTunnel> {
    let index = decoder.decode_choice_index(2, false)?;
    if index != 0 {
        return Err(invalid("UPTransportLayerInformation", "not a GTP tunnel"));
    }
    let preamble = Preamble::<1>::read(decoder)?;
    let address = read_transport_layer_address(decoder)?;
    let teid = decoder.decode_octet_string(Some(4), Some(4))?;
    preamble.finish(decoder)?;
    Ok(GtpTunnel {
        address,
        teid: u32::from_be_bytes([teid[0], teid[1], teid[2], teid[3]]),
    })
}

/// Extensible INTEGER whose value always lies in the root range on encode
pub(crate) fn write_ext_integer(encoder: &mut AperEncoder, value: i64, min: i64, max: i64) -> NgapResult<()> {
    encoder.write_bit(false);
    encoder.encode_constrained_whole_number(value, &Constraint::new(min, max))?;
    Ok(())
}

pub(crate) fn read_ext_integer(decoder: &mut AperDecoder, min: i64, max: i64) -> NgapResult<i64> {
    if decoder.read_bit()? {
        return Ok(decoder.decode_unconstrained_whole_number()?);
    }
    Ok(decoder.decode_constrained_whole_number(&Constraint::new(min, max))?)
}

fn write_ambr(encoder: &mut AperEncoder, ambr: &Ambr) -> NgapResult<()> {
    write_preamble(encoder, &[false]);
    BitRate(ambr.dl).encode_aper(encoder)?;
    BitRate(ambr.ul).encode_aper(encoder)?;
    Ok(())
}

fn read_ambr(decoder: &mut AperDecoder) -> NgapResult<Ambr> {
    let preamble = Preamble::<1>::read(decoder)?;
    let dl = BitRate::decode_aper(decoder)?.0;
    let ul = BitRate::decode_aper(decoder)?.0;
    preamble.finish(decoder)?;
    Ok(Ambr { dl, ul })
}

// ============================================================================
// AMF-UE-NGAP-ID / RAN-UE-NGAP-ID / UE-NGAP-IDs IEs
// ============================================================================

pub fn encode_amf_ue_ngap_id(
    container: &mut ProtocolIeContainer,
    id: u64,
    criticality: Criticality,
) -> NgapResult<()> {
    push_value(container, ProtocolIeId::AMF_UE_NGAP_ID, criticality, &AmfUeNgapId(id))
}

pub fn decode_amf_ue_ngap_id(field: &ProtocolIeField) -> NgapResult<u64> {
    let id: AmfUeNgapId = decode_value(&field.value)?;
    Ok(id.0)
}

pub fn encode_ran_ue_ngap_id(
    container: &mut ProtocolIeContainer,
    id: u32,
    criticality: Criticality,
) -> NgapResult<()> {
    push_value(container, ProtocolIeId::RAN_UE_NGAP_ID, criticality, &RanUeNgapId(id))
}

pub fn decode_ran_ue_ngap_id(field: &ProtocolIeField) -> NgapResult<u32> {
    let id: RanUeNgapId = decode_value(&field.value)?;
    Ok(id.0)
}

pub fn encode_ue_ngap_ids(container: &mut ProtocolIeContainer, ids: &UeNgapIds) -> NgapResult<()> {
    let value = match *ids {
        UeNgapIds::Pair { amf_ue_ngap_id, ran_ue_ngap_id } => AsnUeNgapIds::UeNgapIdPair {
            amf_ue_ngap_id: AmfUeNgapId(amf_ue_ngap_id),
            ran_ue_ngap_id: RanUeNgapId(ran_ue_ngap_id),
        },
        UeNgapIds::AmfOnly { amf_ue_ngap_id } => AsnUeNgapIds::AmfUeNgapId(AmfUeNgapId(amf_ue_ngap_id)),
    };
    push_value(container, ProtocolIeId::UE_NGAP_IDS, Criticality::Reject, &value)
}

pub fn decode_ue_ngap_ids(field: &ProtocolIeField) -> NgapResult<UeNgapIds> {
    let ids: AsnUeNgapIds = decode_value(&field.value)?;
    Ok(match ids {
        AsnUeNgapIds::UeNgapIdPair { amf_ue_ngap_id, ran_ue_ngap_id } => UeNgapIds::Pair {
            amf_ue_ngap_id: amf_ue_ngap_id.0,
            ran_ue_ngap_id: ran_ue_ngap_id.0,
        },
        AsnUeNgapIds::AmfUeNgapId(id) => UeNgapIds::AmfOnly { amf_ue_ngap_id: id.0 },
    })
}

// ============================================================================
// NAS-PDU / Cause / TimeToWait / RRCEstablishmentCause / UEContextRequest IEs
// ============================================================================

pub fn encode_nas_pdu(container: &mut ProtocolIeContainer, pdu: &[u8], criticality: Criticality) -> NgapResult<()> {
    push_value(container, ProtocolIeId::NAS_PDU, criticality, &NasPdu(pdu.to_vec()))
}

pub fn decode_nas_pdu(field: &ProtocolIeField) -> NgapResult<Vec<u8>> {
    let pdu: NasPdu = decode_value(&field.value)?;
    Ok(pdu.0)
}

pub fn encode_cause(container: &mut ProtocolIeContainer, cause: &Cause) -> NgapResult<()> {
    push_value(container, ProtocolIeId::CAUSE, Criticality::Ignore, cause)
}

pub fn decode_cause(field: &ProtocolIeField) -> NgapResult<Cause> {
    decode_value(&field.value)
}

pub fn encode_time_to_wait(container: &mut ProtocolIeContainer, ttw: TimeToWait) -> NgapResult<()> {
    push_value(container, ProtocolIeId::TIME_TO_WAIT, Criticality::Ignore, &ttw)
}

pub fn decode_time_to_wait(field: &ProtocolIeField) -> NgapResult<TimeToWait> {
    decode_value(&field.value)
}

pub fn encode_rrc_establishment_cause(
    container: &mut ProtocolIeContainer,
    cause: RrcEstablishmentCause,
) -> NgapResult<()> {
    push_value(container, ProtocolIeId::RRC_ESTABLISHMENT_CAUSE, Criticality::Ignore, &cause)
}

pub fn decode_rrc_establishment_cause(field: &ProtocolIeField) -> NgapResult<RrcEstablishmentCause> {
    decode_value(&field.value)
}

/// UEContextRequest ::= ENUMERATED { requested, ... }
pub fn encode_ue_context_request(container: &mut ProtocolIeContainer) -> NgapResult<()> {
    let raw = encode_with(|encoder| Ok(encoder.encode_enumerated(0, &Constraint::extensible(0, 0))?))?;
    push_raw(container, ProtocolIeId::UE_CONTEXT_REQUEST, Criticality::Ignore, raw);
    Ok(())
}

// ============================================================================
// RelativeAMFCapacity / AMFName / RANNodeName IEs
// ============================================================================

pub fn encode_relative_amf_capacity(container: &mut ProtocolIeContainer, capacity: u8) -> NgapResult<()> {
    push_value(
        container,
        ProtocolIeId::RELATIVE_AMF_CAPACITY,
        Criticality::Ignore,
        &RelativeAmfCapacity(capacity),
    )
}

pub fn decode_relative_amf_capacity(field: &ProtocolIeField) -> NgapResult<u8> {
    let capacity: RelativeAmfCapacity = decode_value(&field.value)?;
    Ok(capacity.0)
}

pub fn encode_amf_name(container: &mut ProtocolIeContainer, name: &str) -> NgapResult<()> {
    let raw = encode_with(|encoder| write_printable_string(encoder, "AMFName", name))?;
    push_raw(container, ProtocolIeId::AMF_NAME, Criticality::Reject, raw);
    Ok(())
}

pub fn decode_amf_name(field: &ProtocolIeField) -> NgapResult<String> {
    decode_with(&field.value, |decoder| read_printable_string(decoder, "AMFName"))
}

pub fn encode_ran_node_name(container: &mut ProtocolIeContainer, name: &str) -> NgapResult<()> {
    let raw = encode_with(|encoder| write_printable_string(encoder, "RANNodeName", name))?;
    push_raw(container, ProtocolIeId::RAN_NODE_NAME, Criticality::Ignore, raw);
    Ok(())
}

pub fn decode_ran_node_name(field: &ProtocolIeField) -> NgapResult<String> {
    decode_with(&field.value, |decoder| read_printable_string(decoder, "RANNodeName"))
}

// ============================================================================
// GlobalRANNodeID IE (GlobalTNGF-ID in the choice extension)
// ============================================================================

// GlobalRANNodeID ::= CHOICE { globalGNB-ID, globalNgENB-ID, globalN3IWF-ID, choice-Extensions }
const GLOBAL_RAN_NODE_ID_ALTERNATIVES: usize = 4;
const CHOICE_EXTENSIONS_INDEX: usize = 3;

fn encode_global_tngf_id_value(id: &GlobalTngfId) -> NgapResult<Vec<u8>> {
    encode_with(|encoder| {
        write_preamble(encoder, &[false]);
        write_plmn(encoder, &id.plmn_identity)?;
        // TNGF-ID ::= CHOICE { tNGF-ID BIT STRING (SIZE(32, ...)), choice-Extensions }
        encoder.encode_choice_index(0, 2, false)?;
        encoder.write_bit(false);
        encoder.encode_bit_string(&id.tngf_id.to_be_bytes(), 32, Some(32), Some(32))?;
        Ok(())
    })
}

fn decode_global_tngf_id_value(raw: &[u8]) -> NgapResult<GlobalTngfId> {
    decode_with(raw, |decoder| {
        let preamble = Preamble::<1>::read(decoder)?;
        let plmn_identity = read_plmn(decoder)?;
        if decoder.decode_choice_index(2, false)? != 0 {
            return Err(invalid("GlobalTNGF-ID", "unsupported TNGF-ID alternative"));
        }
        if decoder.read_bit()? {
            return Err(invalid("GlobalTNGF-ID", "TNGF-ID longer than 32 bits"));
        }
        let (bits, _) = decoder.decode_bit_string(Some(32), Some(32))?;
        preamble.finish(decoder)?;
        Ok(GlobalTngfId {
            plmn_identity,
            tngf_id: u32::from_be_bytes([bits[0], bits[1], bits[2], bits[3]]),
        })
    })
}

pub fn encode_global_ran_node_id(container: &mut ProtocolIeContainer, id: &GlobalTngfId) -> NgapResult<()> {
    let single = ProtocolIeField {
        id: ProtocolIeId::GLOBAL_TNGF_ID,
        criticality: Criticality::Reject,
        value: encode_global_tngf_id_value(id)?,
    };
    let raw = encode_with(|encoder| {
        encoder.encode_choice_index(CHOICE_EXTENSIONS_INDEX, GLOBAL_RAN_NODE_ID_ALTERNATIVES, false)?;
        Ok(single.encode_aper(encoder)?)
    })?;
    push_raw(container, ProtocolIeId::GLOBAL_RAN_NODE_ID, Criticality::Reject, raw);
    Ok(())
}

pub fn decode_global_ran_node_id(field: &ProtocolIeField) -> NgapResult<GlobalTngfId> {
    let single = decode_with(&field.value, |decoder| {
        let index = decoder.decode_choice_index(GLOBAL_RAN_NODE_ID_ALTERNATIVES, false)?;
        if index != CHOICE_EXTENSIONS_INDEX {
            return Err(invalid("GlobalRANNodeID", format!("alternative {index} is not a TNGF")));
        }
        Ok(ProtocolIeField::decode_aper(decoder)?)
    })?;
    if single.id != ProtocolIeId::GLOBAL_TNGF_ID {
        return Err(invalid("GlobalRANNodeID", format!("unexpected extension id {}", single.id.0)));
    }
    decode_global_tngf_id_value(&single.value)
}

// ============================================================================
// UserLocationInformation IE (UserLocationInformationTNGF in the choice extension)
// ============================================================================

// UserLocationInformation ::= CHOICE { eUTRA, nR, n3IWF, choice-Extensions }
const USER_LOCATION_INFORMATION_ALTERNATIVES: usize = 4;

fn encode_uli_tngf_value(uli: &UserLocationInformationTngf) -> NgapResult<Vec<u8>> {
    encode_with(|encoder| {
        write_preamble(encoder, &[uli.port.is_some(), false]);
        encoder.encode_octet_string(&uli.tnap_id, None, None)?;
        write_transport_layer_address(encoder, uli.ip_address)?;
        if let Some(port) = uli.port {
            encoder.encode_octet_string(&port.to_be_bytes(), Some(2), Some(2))?;
        }
        Ok(())
    })
}

fn decode_uli_tngf_value(raw: &[u8]) -> NgapResult<UserLocationInformationTngf> {
    decode_with(raw, |decoder| {
        let preamble = Preamble::<2>::read(decoder)?;
        let tnap_id = decoder.decode_octet_string(None, None)?;
        let ip_address = read_transport_layer_address(decoder)?;
        let port = if preamble.has(0) {
            let raw = decoder.decode_octet_string(Some(2), Some(2))?;
            Some(u16::from_be_bytes([raw[0], raw[1]]))
        } else {
            None
        };
        preamble.finish(decoder)?;
        Ok(UserLocationInformationTngf { tnap_id, ip_address, port })
    })
}

pub fn encode_user_location_information(
    container: &mut ProtocolIeContainer,
    uli: &UserLocationInformationTngf,
    criticality: Criticality,
) -> NgapResult<()> {
    let single = ProtocolIeField {
        id: ProtocolIeId::USER_LOCATION_INFORMATION_TNGF,
        criticality: Criticality::Ignore,
        value: encode_uli_tngf_value(uli)?,
    };
    let raw = encode_with(|encoder| {
        encoder.encode_choice_index(CHOICE_EXTENSIONS_INDEX, USER_LOCATION_INFORMATION_ALTERNATIVES, false)?;
        Ok(single.encode_aper(encoder)?)
    })?;
    push_raw(container, ProtocolIeId::USER_LOCATION_INFORMATION, criticality, raw);
    Ok(())
}

pub fn decode_user_location_information(field: &ProtocolIeField) -> NgapResult<UserLocationInformationTngf> {
    let single = decode_with(&field.value, |decoder| {
        let index = decoder.decode_choice_index(USER_LOCATION_INFORMATION_ALTERNATIVES, false)?;
        if index != CHOICE_EXTENSIONS_INDEX {
            return Err(invalid("UserLocationInformation", format!("alternative {index} is not TNGF")));
        }
        Ok(ProtocolIeField::decode_aper(decoder)?)
    })?;
    if single.id != ProtocolIeId::USER_LOCATION_INFORMATION_TNGF {
        return Err(invalid(
            "UserLocationInformation",
            format!("unexpected extension id {}", single.id.0),
        ));
    }
    decode_uli_tngf_value(&single.value)
}

// ============================================================================
// SupportedTAList / DefaultPagingDRX IEs
// ============================================================================

fn write_slice_support_list(encoder: &mut AperEncoder, list: &'static str, slices: &[SNssai]) -> NgapResult<()> {
    write_list(encoder, list, slices, 1, MAX_NO_OF_SLICE_ITEMS, |encoder, snssai| {
        write_preamble(encoder, &[false]);
        Ok(snssai.encode_aper(encoder)?)
    })
}

fn read_slice_support_list(decoder: &mut AperDecoder) -> NgapResult<Vec<SNssai>> {
    read_list(decoder, 1, MAX_NO_OF_SLICE_ITEMS, |decoder| {
        let preamble = Preamble::<1>::read(decoder)?;
        let snssai = SNssai::decode_aper(decoder)?;
        preamble.finish(decoder)?;
        Ok(snssai)
    })
}

pub fn encode_supported_ta_list(container: &mut ProtocolIeContainer, items: &[SupportedTaItem]) -> NgapResult<()> {
    let raw = encode_with(|encoder| {
        write_list(encoder, "SupportedTAList", items, 1, MAX_NO_OF_TACS, |encoder, item| {
            write_preamble(encoder, &[false]);
            Tac(item.tac).encode_aper(encoder)?;
            write_list(
                encoder,
                "BroadcastPLMNList",
                &item.broadcast_plmn_list,
                1,
                MAX_NO_OF_BPLMNS,
                |encoder, bplmn| {
                    write_preamble(encoder, &[false]);
                    write_plmn(encoder, &bplmn.plmn_identity)?;
                    write_slice_support_list(encoder, "SliceSupportList", &bplmn.tai_slice_support_list)
                },
            )
        })
    })?;
    push_raw(container, ProtocolIeId::SUPPORTED_TA_LIST, Criticality::Reject, raw);
    Ok(())
}

pub fn decode_supported_ta_list(field: &ProtocolIeField) -> NgapResult<Vec<SupportedTaItem>> {
    decode_with(&field.value, |decoder| {
        read_list(decoder, 1, MAX_NO_OF_TACS, |decoder| {
            let preamble = Preamble::<1>::read(decoder)?;
            let tac = Tac::decode_aper(decoder)?.0;
            let broadcast_plmn_list = read_list(decoder, 1, MAX_NO_OF_BPLMNS, |decoder| {
                let preamble = Preamble::<1>::read(decoder)?;
                let plmn_identity = read_plmn(decoder)?;
                let tai_slice_support_list = read_slice_support_list(decoder)?;
                preamble.finish(decoder)?;
                Ok(BroadcastPlmnItem { plmn_identity, tai_slice_support_list })
            })?;
            preamble.finish(decoder)?;
            Ok(SupportedTaItem { tac, broadcast_plmn_list })
        })
    })
}

const PAGING_DRX: Constraint = Constraint::extensible(0, 3);

pub fn encode_default_paging_drx(container: &mut ProtocolIeContainer, drx: PagingDrx) -> NgapResult<()> {
    let raw = encode_with(|encoder| Ok(encoder.encode_enumerated(drx as i64, &PAGING_DRX)?))?;
    push_raw(container, ProtocolIeId::DEFAULT_PAGING_DRX, Criticality::Ignore, raw);
    Ok(())
}

pub fn decode_default_paging_drx(field: &ProtocolIeField) -> NgapResult<PagingDrx> {
    decode_with(&field.value, |decoder| match decoder.decode_enumerated(&PAGING_DRX)? {
        0 => Ok(PagingDrx::V32),
        1 => Ok(PagingDrx::V64),
        2 => Ok(PagingDrx::V128),
        3 => Ok(PagingDrx::V256),
        value => Err(invalid("PagingDRX", format!("unknown value {value}"))),
    })
}

// ============================================================================
// GUAMI / ServedGUAMIList / PLMNSupportList IEs
// ============================================================================

pub(crate) fn write_guami(encoder: &mut AperEncoder, guami: &Guami) -> NgapResult<()> {
    write_preamble(encoder, &[false]);
    write_plmn(encoder, &guami.plmn_identity)?;
    // AMFRegionID BIT STRING (SIZE(8)), AMFSetID (SIZE(10)), AMFPointer (SIZE(6))
    encoder.write_bits(guami.amf_region_id as u64, 8);
    encoder.write_bits((guami.amf_set_id & 0x03FF) as u64, 10);
    encoder.write_bits((guami.amf_pointer & 0x3F) as u64, 6);
    Ok(())
}

pub(crate) fn read_guami(decoder: &mut AperDecoder) -> NgapResult<Guami> {
    let preamble = Preamble::<1>::read(decoder)?;
    let plmn_identity = read_plmn(decoder)?;
    let amf_region_id = decoder.read_bits(8)? as u8;
    let amf_set_id = decoder.read_bits(10)? as u16;
    let amf_pointer = decoder.read_bits(6)? as u8;
    preamble.finish(decoder)?;
    Ok(Guami {
        plmn_identity,
        amf_region_id,
        amf_set_id,
        amf_pointer,
    })
}

pub fn encode_guami(container: &mut ProtocolIeContainer, guami: &Guami) -> NgapResult<()> {
    let raw = encode_with(|encoder| write_guami(encoder, guami))?;
    push_raw(container, ProtocolIeId::GUAMI, Criticality::Reject, raw);
    Ok(())
}

pub fn decode_guami(field: &ProtocolIeField) -> NgapResult<Guami> {
    decode_with(&field.value, read_guami)
}

pub fn encode_served_guami_list(container: &mut ProtocolIeContainer, items: &[ServedGuamiItem]) -> NgapResult<()> {
    let raw = encode_with(|encoder| {
        write_list(encoder, "ServedGUAMIList", items, 1, MAX_NO_OF_SERVED_GUAMIS, |encoder, item| {
            write_preamble(encoder, &[item.backup_amf_name.is_some(), false]);
            write_guami(encoder, &item.guami)?;
            if let Some(name) = &item.backup_amf_name {
                write_printable_string(encoder, "BackupAMFName", name)?;
            }
            Ok(())
        })
    })?;
    push_raw(container, ProtocolIeId::SERVED_GUAMI_LIST, Criticality::Reject, raw);
    Ok(())
}

pub fn decode_served_guami_list(field: &ProtocolIeField) -> NgapResult<Vec<ServedGuamiItem>> {
    decode_with(&field.value, |decoder| {
        read_list(decoder, 1, MAX_NO_OF_SERVED_GUAMIS, |decoder| {
            let preamble = Preamble::<2>::read(decoder)?;
            let guami = read_guami(decoder)?;
            let backup_amf_name = if preamble.has(0) {
                Some(read_printable_string(decoder, "BackupAMFName")?)
            } else {
                None
            };
            preamble.finish(decoder)?;
            Ok(ServedGuamiItem { guami, backup_amf_name })
        })
    })
}

pub fn encode_plmn_support_list(container: &mut ProtocolIeContainer, items: &[PlmnSupportItem]) -> NgapResult<()> {
    let raw = encode_with(|encoder| {
        write_list(encoder, "PLMNSupportList", items, 1, MAX_NO_OF_PLMNS, |encoder, item| {
            write_preamble(encoder, &[false]);
            write_plmn(encoder, &item.plmn_identity)?;
            write_slice_support_list(encoder, "SliceSupportList", &item.slice_support_list)
        })
    })?;
    push_raw(container, ProtocolIeId::PLMN_SUPPORT_LIST, Criticality::Reject, raw);
    Ok(())
}

pub fn decode_plmn_support_list(field: &ProtocolIeField) -> NgapResult<Vec<PlmnSupportItem>> {
    decode_with(&field.value, |decoder| {
        read_list(decoder, 1, MAX_NO_OF_PLMNS, |decoder| {
            let preamble = Preamble::<1>::read(decoder)?;
            let plmn_identity = read_plmn(decoder)?;
            let slice_support_list = read_slice_support_list(decoder)?;
            preamble.finish(decoder)?;
            Ok(PlmnSupportItem { plmn_identity, slice_support_list })
        })
    })
}

// ============================================================================
// Security IEs: UESecurityCapabilities / SecurityKey
// ============================================================================

pub fn encode_ue_security_capabilities(
    container: &mut ProtocolIeContainer,
    caps: &UeSecurityCapabilities,
) -> NgapResult<()> {
    let raw = encode_with(|encoder| {
        write_preamble(encoder, &[false]);
        for bitmap in [
            caps.nr_encryption_algorithms,
            caps.nr_integrity_algorithms,
            caps.eutra_encryption_algorithms,
            caps.eutra_integrity_algorithms,
        ] {
            // BIT STRING (SIZE(16, ...))
            encoder.write_bit(false);
            encoder.encode_bit_string(&bitmap.to_be_bytes(), 16, Some(16), Some(16))?;
        }
        Ok(())
    })?;
    push_raw(container, ProtocolIeId::UE_SECURITY_CAPABILITIES, Criticality::Reject, raw);
    Ok(())
}

pub fn decode_ue_security_capabilities(field: &ProtocolIeField) -> NgapResult<UeSecurityCapabilities> {
    decode_with(&field.value, |decoder| {
        let preamble = Preamble::<1>::read(decoder)?;
        let mut bitmaps = [0u16; 4];
        for bitmap in bitmaps.iter_mut() {
            if decoder.read_bit()? {
                return Err(PerError::UnsupportedExtension.into());
            }
            let (bits, _) = decoder.decode_bit_string(Some(16), Some(16))?;
            *bitmap = u16::from_be_bytes([bits[0], bits[1]]);
        }
        preamble.finish(decoder)?;
        Ok(UeSecurityCapabilities {
            nr_encryption_algorithms: bitmaps[0],
            nr_integrity_algorithms: bitmaps[1],
            eutra_encryption_algorithms: bitmaps[2],
            eutra_integrity_algorithms: bitmaps[3],
        })
    })
}

pub fn encode_security_key(container: &mut ProtocolIeContainer, key: &[u8; 32]) -> NgapResult<()> {
    let raw = encode_with(|encoder| Ok(encoder.encode_bit_string(key, 256, Some(256), Some(256))?))?;
    push_raw(container, ProtocolIeId::SECURITY_KEY, Criticality::Reject, raw);
    Ok(())
}

pub fn decode_security_key(field: &ProtocolIeField) -> NgapResult<[u8; 32]> {
    decode_with(&field.value, |decoder| {
        let (bits, _) = decoder.decode_bit_string(Some(256), Some(256))?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&bits);
        Ok(key)
    })
}

// ============================================================================
// UEAggregateMaximumBitRate / AllowedNSSAI IEs
// ============================================================================

pub fn encode_ue_ambr(container: &mut ProtocolIeContainer, ambr: &Ambr, criticality: Criticality) -> NgapResult<()> {
    let raw = encode_with(|encoder| write_ambr(encoder, ambr))?;
    push_raw(container, ProtocolIeId::UE_AGGREGATE_MAXIMUM_BIT_RATE, criticality, raw);
    Ok(())
}

pub fn decode_ue_ambr(field: &ProtocolIeField) -> NgapResult<Ambr> {
    decode_with(&field.value, read_ambr)
}

pub fn encode_allowed_nssai(container: &mut ProtocolIeContainer, nssai: &[SNssai]) -> NgapResult<()> {
    let raw = encode_with(|encoder| {
        write_list(encoder, "AllowedNSSAI", nssai, 1, MAX_NO_OF_ALLOWED_S_NSSAIS, |encoder, snssai| {
            write_preamble(encoder, &[false]);
            Ok(snssai.encode_aper(encoder)?)
        })
    })?;
    push_raw(container, ProtocolIeId::ALLOWED_NSSAI, Criticality::Reject, raw);
    Ok(())
}

pub fn decode_allowed_nssai(field: &ProtocolIeField) -> NgapResult<Vec<SNssai>> {
    decode_with(&field.value, |decoder| {
        read_list(decoder, 1, MAX_NO_OF_ALLOWED_S_NSSAIS, |decoder| {
            let preamble = Preamble::<1>::read(decoder)?;
            let snssai = SNssai::decode_aper(decoder)?;
            preamble.finish(decoder)?;
            Ok(snssai)
        })
    })
}

// ============================================================================
// PDU session resource lists
// ============================================================================

/// PDUSessionResourceSetupListCxtReq (71) or PDUSessionResourceSetupListSUReq (74)
pub fn encode_pdu_session_setup_list(
    container: &mut ProtocolIeContainer,
    id: ProtocolIeId,
    items: &[PduSessionSetupItem],
) -> NgapResult<()> {
    let raw = encode_with(|encoder| {
        write_list(encoder, "PDUSessionResourceSetupList", items, 1, MAX_NO_OF_PDU_SESSIONS, |encoder, item| {
            write_preamble(encoder, &[item.nas_pdu.is_some(), false]);
            PduSessionId(item.pdu_session_id).encode_aper(encoder)?;
            if let Some(nas) = &item.nas_pdu {
                encoder.encode_octet_string(nas, None, None)?;
            }
            item.s_nssai.encode_aper(encoder)?;
            encoder.encode_octet_string(&item.transfer, None, None)?;
            Ok(())
        })
    })?;
    push_raw(container, id, Criticality::Reject, raw);
    Ok(())
}

pub fn decode_pdu_session_setup_list(field: &ProtocolIeField) -> NgapResult<Vec<PduSessionSetupItem>> {
    decode_with(&field.value, |decoder| {
        read_list(decoder, 1, MAX_NO_OF_PDU_SESSIONS, |decoder| {
            let preamble = Preamble::<2>::read(decoder)?;
            let pdu_session_id = PduSessionId::decode_aper(decoder)?.0;
            let nas_pdu = if preamble.has(0) {
                Some(decoder.decode_octet_string(None, None)?)
            } else {
                None
            };
            let s_nssai = SNssai::decode_aper(decoder)?;
            let transfer = decoder.decode_octet_string(None, None)?;
            preamble.finish(decoder)?;
            Ok(PduSessionSetupItem {
                pdu_session_id,
                nas_pdu,
                s_nssai,
                transfer,
            })
        })
    })
}

/// Lists of `{ pDUSessionID, transfer OCTET STRING }` items: the setup, failed,
/// release-command and released lists all share this shape
pub fn encode_pdu_session_transfer_list(
    container: &mut ProtocolIeContainer,
    id: ProtocolIeId,
    criticality: Criticality,
    items: &[(u8, &[u8])],
) -> NgapResult<()> {
    let raw = encode_with(|encoder| {
        write_list(encoder, "PDUSessionResourceList", items, 1, MAX_NO_OF_PDU_SESSIONS, |encoder, item| {
            write_preamble(encoder, &[false]);
            PduSessionId(item.0).encode_aper(encoder)?;
            encoder.encode_octet_string(item.1, None, None)?;
            Ok(())
        })
    })?;
    push_raw(container, id, criticality, raw);
    Ok(())
}

pub fn decode_pdu_session_transfer_list(field: &ProtocolIeField) -> NgapResult<Vec<(u8, Vec<u8>)>> {
    decode_with(&field.value, |decoder| {
        read_list(decoder, 1, MAX_NO_OF_PDU_SESSIONS, |decoder| {
            let preamble = Preamble::<1>::read(decoder)?;
            let id = PduSessionId::decode_aper(decoder)?.0;
            let transfer = decoder.decode_octet_string(None, None)?;
            preamble.finish(decoder)?;
            Ok((id, transfer))
        })
    })
}

/// PDUSessionResourceListCxtRelReq: bare PDU session ids
pub fn encode_pdu_session_list_cxt_rel_req(container: &mut ProtocolIeContainer, ids: &[u8]) -> NgapResult<()> {
    let raw = encode_with(|encoder| {
        write_list(encoder, "PDUSessionResourceListCxtRelReq", ids, 1, MAX_NO_OF_PDU_SESSIONS, |encoder, id| {
            write_preamble(encoder, &[false]);
            Ok(PduSessionId(*id).encode_aper(encoder)?)
        })
    })?;
    push_raw(container, ProtocolIeId::PDU_SESSION_RESOURCE_LIST_CXT_REL_REQ, Criticality::Reject, raw);
    Ok(())
}

pub fn decode_pdu_session_list_cxt_rel_req(field: &ProtocolIeField) -> NgapResult<Vec<u8>> {
    decode_with(&field.value, |decoder| {
        read_list(decoder, 1, MAX_NO_OF_PDU_SESSIONS, |decoder| {
            let preamble = Preamble::<1>::read(decoder)?;
            let id = PduSessionId::decode_aper(decoder)?.0;
            preamble.finish(decoder)?;
            Ok(id)
        })
    })
}

// ============================================================================
// NG Reset IEs: ResetType / UE-associatedLogicalNG-connectionList
// ============================================================================

fn write_connection_list(encoder: &mut AperEncoder, items: &[UeAssociatedLogicalNgConnection]) -> NgapResult<()> {
    write_list(
        encoder,
        "UE-associatedLogicalNG-connectionList",
        items,
        1,
        MAX_NO_OF_NG_CONNECTIONS_TO_RESET,
        |encoder, item| {
            write_preamble(
                encoder,
                &[item.amf_ue_ngap_id.is_some(), item.ran_ue_ngap_id.is_some(), false],
            );
            if let Some(id) = item.amf_ue_ngap_id {
                AmfUeNgapId(id).encode_aper(encoder)?;
            }
            if let Some(id) = item.ran_ue_ngap_id {
                RanUeNgapId(id).encode_aper(encoder)?;
            }
            Ok(())
        },
    )
}

fn read_connection_list(decoder: &mut AperDecoder) -> NgapResult<Vec<UeAssociatedLogicalNgConnection>> {
    read_list(decoder, 1, MAX_NO_OF_NG_CONNECTIONS_TO_RESET, |decoder| {
        let preamble = Preamble::<3>::read(decoder)?;
        let amf_ue_ngap_id = if preamble.has(0) {
            Some(AmfUeNgapId::decode_aper(decoder)?.0)
        } else {
            None
        };
        let ran_ue_ngap_id = if preamble.has(1) {
            Some(RanUeNgapId::decode_aper(decoder)?.0)
        } else {
            None
        };
        preamble.finish(decoder)?;
        Ok(UeAssociatedLogicalNgConnection { amf_ue_ngap_id, ran_ue_ngap_id })
    })
}

pub fn encode_reset_type(container: &mut ProtocolIeContainer, reset: &ResetType) -> NgapResult<()> {
    let raw = encode_with(|encoder| match reset {
        ResetType::NgInterface => {
            encoder.encode_choice_index(0, 3, false)?;
            // ResetAll ::= ENUMERATED { reset-all, ... }
            Ok(encoder.encode_enumerated(0, &Constraint::extensible(0, 0))?)
        }
        ResetType::PartOfNgInterface(items) => {
            encoder.encode_choice_index(1, 3, false)?;
            write_connection_list(encoder, items)
        }
    })?;
    push_raw(container, ProtocolIeId::RESET_TYPE, Criticality::Reject, raw);
    Ok(())
}

pub fn decode_reset_type(field: &ProtocolIeField) -> NgapResult<ResetType> {
    decode_with(&field.value, |decoder| match decoder.decode_choice_index(3, false)? {
        0 => {
            decoder.decode_enumerated(&Constraint::extensible(0, 0))?;
            Ok(ResetType::NgInterface)
        }
        1 => Ok(ResetType::PartOfNgInterface(read_connection_list(decoder)?)),
        index => Err(invalid("ResetType", format!("unsupported alternative {index}"))),
    })
}

pub fn encode_connection_list(
    container: &mut ProtocolIeContainer,
    items: &[UeAssociatedLogicalNgConnection],
) -> NgapResult<()> {
    let raw = encode_with(|encoder| write_connection_list(encoder, items))?;
    push_raw(
        container,
        ProtocolIeId::UE_ASSOCIATED_LOGICAL_NG_CONNECTION_LIST,
        Criticality::Ignore,
        raw,
    );
    Ok(())
}

pub fn decode_connection_list(field: &ProtocolIeField) -> NgapResult<Vec<UeAssociatedLogicalNgConnection>> {
    decode_with(&field.value, read_connection_list)
}

// ============================================================================
// Overload IEs
// ============================================================================

const OVERLOAD_ACTION: Constraint = Constraint::extensible(0, 3);

/// OverloadResponse ::= CHOICE { overloadAction, choice-Extensions }
pub fn encode_amf_overload_response(container: &mut ProtocolIeContainer, action: OverloadAction) -> NgapResult<()> {
    let raw = encode_with(|encoder| {
        encoder.encode_choice_index(0, 2, false)?;
        Ok(encoder.encode_enumerated(action as i64, &OVERLOAD_ACTION)?)
    })?;
    push_raw(container, ProtocolIeId::AMF_OVERLOAD_RESPONSE, Criticality::Reject, raw);
    Ok(())
}

pub fn decode_amf_overload_response(field: &ProtocolIeField) -> NgapResult<OverloadAction> {
    decode_with(&field.value, |decoder| {
        if decoder.decode_choice_index(2, false)? != 0 {
            return Err(invalid("OverloadResponse", "unsupported alternative"));
        }
        let value = decoder.decode_enumerated(&OVERLOAD_ACTION)?;
        OverloadAction::from_value(value).ok_or_else(|| invalid("OverloadAction", format!("unknown value {value}")))
    })
}

/// TrafficLoadReductionIndication ::= INTEGER (1..99)
pub fn encode_traffic_load_reduction(container: &mut ProtocolIeContainer, percent: u8) -> NgapResult<()> {
    let raw = encode_with(|encoder| {
        Ok(encoder.encode_constrained_whole_number(percent as i64, &Constraint::new(1, 99))?)
    })?;
    push_raw(
        container,
        ProtocolIeId::AMF_TRAFFIC_LOAD_REDUCTION_INDICATION,
        Criticality::Ignore,
        raw,
    );
    Ok(())
}

pub fn decode_traffic_load_reduction(field: &ProtocolIeField) -> NgapResult<u8> {
    decode_with(&field.value, |decoder| {
        Ok(decoder.decode_constrained_whole_number(&Constraint::new(1, 99))? as u8)
    })
}

// ============================================================================
// PDU session transfer IEs
// ============================================================================

pub fn encode_pdu_session_ambr(container: &mut ProtocolIeContainer, ambr: &Ambr) -> NgapResult<()> {
    let raw = encode_with(|encoder| write_ambr(encoder, ambr))?;
    push_raw(
        container,
        ProtocolIeId::PDU_SESSION_AGGREGATE_MAXIMUM_BIT_RATE,
        Criticality::Reject,
        raw,
    );
    Ok(())
}

pub fn decode_pdu_session_ambr(field: &ProtocolIeField) -> NgapResult<Ambr> {
    decode_with(&field.value, read_ambr)
}

pub fn encode_ul_ngu_up_tnl_information(container: &mut ProtocolIeContainer, tunnel: &GtpTunnel) -> NgapResult<()> {
    let raw = encode_with(|encoder| write_gtp_tunnel(encoder, tunnel))?;
    push_raw(container, ProtocolIeId::UL_NGU_UP_TNL_INFORMATION, Criticality::Reject, raw);
    Ok(())
}

pub fn decode_ul_ngu_up_tnl_information(field: &ProtocolIeField) -> NgapResult<GtpTunnel> {
    decode_with(&field.value, read_gtp_tunnel)
}

const PDU_SESSION_TYPE: Constraint = Constraint::extensible(0, 4);

pub fn encode_pdu_session_type(container: &mut ProtocolIeContainer, session_type: PduSessionType) -> NgapResult<()> {
    let raw = encode_with(|encoder| Ok(encoder.encode_enumerated(session_type as i64, &PDU_SESSION_TYPE)?))?;
    push_raw(container, ProtocolIeId::PDU_SESSION_TYPE, Criticality::Reject, raw);
    Ok(())
}

pub fn decode_pdu_session_type(field: &ProtocolIeField) -> NgapResult<PduSessionType> {
    decode_with(&field.value, |decoder| match decoder.decode_enumerated(&PDU_SESSION_TYPE)? {
        0 => Ok(PduSessionType::Ipv4),
        1 => Ok(PduSessionType::Ipv6),
        2 => Ok(PduSessionType::Ipv4v6),
        3 => Ok(PduSessionType::Ethernet),
        4 => Ok(PduSessionType::Unstructured),
        value => Err(invalid("PDUSessionType", format!("unknown value {value}"))),
    })
}

const PROTECTION_INDICATION: Constraint = Constraint::extensible(0, 2);

fn read_protection_indication(decoder: &mut AperDecoder) -> NgapResult<ProtectionIndication> {
    match decoder.decode_enumerated(&PROTECTION_INDICATION)? {
        0 => Ok(ProtectionIndication::Required),
        1 => Ok(ProtectionIndication::Preferred),
        2 => Ok(ProtectionIndication::NotNeeded),
        value => Err(invalid("SecurityIndication", format!("unknown indication {value}"))),
    }
}

pub fn encode_security_indication(container: &mut ProtocolIeContainer, indication: &SecurityIndication) -> NgapResult<()> {
    let raw = encode_with(|encoder| {
        write_preamble(encoder, &[false, false]);
        encoder.encode_enumerated(indication.integrity_protection as i64, &PROTECTION_INDICATION)?;
        encoder.encode_enumerated(indication.confidentiality_protection as i64, &PROTECTION_INDICATION)?;
        Ok(())
    })?;
    push_raw(container, ProtocolIeId::SECURITY_INDICATION, Criticality::Reject, raw);
    Ok(())
}

pub fn decode_security_indication(field: &ProtocolIeField) -> NgapResult<SecurityIndication> {
    decode_with(&field.value, |decoder| {
        let preamble = Preamble::<2>::read(decoder)?;
        let integrity_protection = read_protection_indication(decoder)?;
        let confidentiality_protection = read_protection_indication(decoder)?;
        if preamble.has(0) {
            // MaximumIntegrityProtectedDataRate ::= ENUMERATED { bitrate64kbs, maximum-UE-rate, ... }
            decoder.decode_enumerated(&Constraint::extensible(0, 1))?;
        }
        preamble.finish(decoder)?;
        Ok(SecurityIndication {
            integrity_protection,
            confidentiality_protection,
        })
    })
}

/// NetworkInstance ::= INTEGER (1..256, ...)
pub fn encode_network_instance(container: &mut ProtocolIeContainer, instance: u16) -> NgapResult<()> {
    let raw = encode_with(|encoder| write_ext_integer(encoder, instance as i64, 1, 256))?;
    push_raw(container, ProtocolIeId::NETWORK_INSTANCE, Criticality::Reject, raw);
    Ok(())
}

pub fn decode_network_instance(field: &ProtocolIeField) -> NgapResult<u16> {
    decode_with(&field.value, |decoder| {
        let value = read_ext_integer(decoder, 1, 256)?;
        u16::try_from(value).map_err(|_| invalid("NetworkInstance", format!("out of range: {value}")))
    })
}

// ============================================================================
// QosFlowSetupRequestList IE
// ============================================================================

const PRE_EMPTION: Constraint = Constraint::extensible(0, 1);

fn write_qos_flow_setup_item(encoder: &mut AperEncoder, item: &QosFlowSetupRequestItem) -> NgapResult<()> {
    write_preamble(encoder, &[false, false]);
    write_ext_integer(encoder, item.qfi as i64, 0, 63)?;

    // QosFlowLevelQosParameters
    write_preamble(encoder, &[item.gbr.is_some(), false, false, false]);
    // QosCharacteristics ::= CHOICE { nonDynamic5QI, dynamic5QI, choice-Extensions }
    encoder.encode_choice_index(0, 3, false)?;
    write_preamble(encoder, &[false, false, false, false]);
    write_ext_integer(encoder, item.five_qi as i64, 0, 255)?;

    // AllocationAndRetentionPriority
    write_preamble(encoder, &[false]);
    encoder.encode_constrained_whole_number(item.arp.priority_level as i64, &Constraint::new(1, 15))?;
    encoder.encode_enumerated(item.arp.may_trigger_pre_emption as i64, &PRE_EMPTION)?;
    encoder.encode_enumerated(item.arp.pre_emptable as i64, &PRE_EMPTION)?;

    if let Some(gbr) = &item.gbr {
        write_preamble(encoder, &[false, false, false, false]);
        BitRate(gbr.max_flow_bit_rate_dl).encode_aper(encoder)?;
        BitRate(gbr.max_flow_bit_rate_ul).encode_aper(encoder)?;
        BitRate(gbr.guaranteed_flow_bit_rate_dl).encode_aper(encoder)?;
        BitRate(gbr.guaranteed_flow_bit_rate_ul).encode_aper(encoder)?;
    }
    Ok(())
}

fn read_qos_flow_setup_item(decoder: &mut AperDecoder) -> NgapResult<QosFlowSetupRequestItem> {
    let item_preamble = Preamble::<2>::read(decoder)?;
    let qfi = read_ext_integer(decoder, 0, 63)? as u8;

    let params = Preamble::<4>::read(decoder)?;
    if decoder.decode_choice_index(3, false)? != 0 {
        return Err(invalid("QosCharacteristics", "only non-dynamic 5QI is supported"));
    }
    let descriptor = Preamble::<4>::read(decoder)?;
    let five_qi = read_ext_integer(decoder, 0, 255)? as u8;
    if descriptor.has(0) {
        read_ext_integer(decoder, 1, 127)?; // priorityLevelQos
    }
    if descriptor.has(1) {
        read_ext_integer(decoder, 0, 4095)?; // averagingWindow
    }
    if descriptor.has(2) {
        read_ext_integer(decoder, 0, 4095)?; // maximumDataBurstVolume
    }
    descriptor.finish(decoder)?;

    let arp_preamble = Preamble::<1>::read(decoder)?;
    let priority_level = decoder.decode_constrained_whole_number(&Constraint::new(1, 15))? as u8;
    let may_trigger_pre_emption = decoder.decode_enumerated(&PRE_EMPTION)? == 1;
    let pre_emptable = decoder.decode_enumerated(&PRE_EMPTION)? == 1;
    arp_preamble.finish(decoder)?;

    let gbr = if params.has(0) {
        let gbr_preamble = Preamble::<4>::read(decoder)?;
        let gbr = GbrQosInformation {
            max_flow_bit_rate_dl: BitRate::decode_aper(decoder)?.0,
            max_flow_bit_rate_ul: BitRate::decode_aper(decoder)?.0,
            guaranteed_flow_bit_rate_dl: BitRate::decode_aper(decoder)?.0,
            guaranteed_flow_bit_rate_ul: BitRate::decode_aper(decoder)?.0,
        };
        if gbr_preamble.has(0) {
            decoder.decode_enumerated(&Constraint::extensible(0, 0))?; // notificationControl
        }
        if gbr_preamble.has(1) {
            read_ext_integer(decoder, 0, 1000)?;
        }
        if gbr_preamble.has(2) {
            read_ext_integer(decoder, 0, 1000)?;
        }
        gbr_preamble.finish(decoder)?;
        Some(gbr)
    } else {
        None
    };
    if params.has(1) {
        decoder.decode_enumerated(&Constraint::extensible(0, 0))?; // reflectiveQosAttribute
    }
    if params.has(2) {
        decoder.decode_enumerated(&Constraint::extensible(0, 0))?; // additionalQosFlowInformation
    }
    params.finish(decoder)?;

    if item_preamble.has(0) {
        read_ext_integer(decoder, 0, 15)?; // e-RAB-ID
    }
    item_preamble.finish(decoder)?;

    Ok(QosFlowSetupRequestItem {
        qfi,
        five_qi,
        arp: AllocationAndRetentionPriority {
            priority_level,
            may_trigger_pre_emption,
            pre_emptable,
        },
        gbr,
    })
}

pub fn encode_qos_flow_setup_request_list(
    container: &mut ProtocolIeContainer,
    items: &[QosFlowSetupRequestItem],
) -> NgapResult<()> {
    let raw = encode_with(|encoder| {
        write_list(
            encoder,
            "QosFlowSetupRequestList",
            items,
            1,
            MAX_NO_OF_QOS_FLOWS,
            write_qos_flow_setup_item,
        )
    })?;
    push_raw(container, ProtocolIeId::QOS_FLOW_SETUP_REQUEST_LIST, Criticality::Reject, raw);
    Ok(())
}

pub fn decode_qos_flow_setup_request_list(field: &ProtocolIeField) -> NgapResult<Vec<QosFlowSetupRequestItem>> {
    decode_with(&field.value, |decoder| {
        read_list(decoder, 1, MAX_NO_OF_QOS_FLOWS, read_qos_flow_setup_item)
    })
}

// ============================================================================
// QosFlowPerTNLInformation (setup response transfer body)
// ============================================================================

pub(crate) fn write_qos_flow_per_tnl_information(
    encoder: &mut AperEncoder,
    tunnel: &GtpTunnel,
    qfis: &[u8],
) -> NgapResult<()> {
    write_preamble(encoder, &[false]);
    write_gtp_tunnel(encoder, tunnel)?;
    write_list(encoder, "AssociatedQosFlowList", qfis, 1, MAX_NO_OF_QOS_FLOWS, |encoder, qfi| {
        write_preamble(encoder, &[false, false]);
        write_ext_integer(encoder, *qfi as i64, 0, 63)
    })
}

pub(crate) fn read_qos_flow_per_tnl_information(decoder: &mut AperDecoder) -> NgapResult<(GtpTunnel, Vec<u8>)> {
    let preamble = Preamble::<1>::read(decoder)?;
    let tunnel = read_gtp_tunnel(decoder)?;
    let qfis = read_list(decoder, 1, MAX_NO_OF_QOS_FLOWS, |decoder| {
        let item = Preamble::<2>::read(decoder)?;
        let qfi = read_ext_integer(decoder, 0, 63)? as u8;
        if item.has(0) {
            // QosFlowMappingIndication ::= ENUMERATED { ul, dl, ... }
            decoder.decode_enumerated(&Constraint::extensible(0, 1))?;
        }
        item.finish(decoder)?;
        Ok(qfi)
    })?;
    preamble.finish(decoder)?;
    Ok((tunnel, qfis))
}
