//! NGAP Information Elements
//!
//! Protocol IE containers and common IEs from NGAP-IEs (3GPP TS 38.413)

use super::types::{Criticality, ProtocolIeId};
use crate::per::{AperDecode, AperDecoder, AperEncode, AperEncoder, Constraint, PerError, PerResult};

/// ProtocolIE-Field - Single IE with ID, criticality, and value
/// ASN.1: ProtocolIE-Field ::= SEQUENCE { id, criticality, value }
///
/// Also used for ProtocolIE-SingleContainer, which has the same layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolIeField {
    pub id: ProtocolIeId,
    pub criticality: Criticality,
    pub value: Vec<u8>, // Raw APER-encoded value
}

impl AperEncode for ProtocolIeField {
    fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()> {
        self.id.encode_aper(encoder)?;
        self.criticality.encode_aper(encoder)?;
        encoder.encode_open_type(&self.value)
    }
}

impl AperDecode for ProtocolIeField {
    fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self> {
        let id = ProtocolIeId::decode_aper(decoder)?;
        let criticality = Criticality::decode_aper(decoder)?;
        let value = decoder.decode_open_type()?;
        Ok(ProtocolIeField { id, criticality, value })
    }
}

/// ProtocolIE-Container - Sequence of IEs
/// ASN.1: ProtocolIE-Container ::= SEQUENCE (SIZE (0..maxProtocolIEs)) OF ProtocolIE-Field
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProtocolIeContainer {
    pub ies: Vec<ProtocolIeField>,
}

impl ProtocolIeContainer {
    // maxProtocolIEs = 65535
    pub const MAX_PROTOCOL_IES: usize = 65535;

    pub fn new() -> Self {
        Self { ies: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { ies: Vec::with_capacity(capacity) }
    }

    pub fn push(&mut self, ie: ProtocolIeField) {
        self.ies.push(ie);
    }

    pub fn len(&self) -> usize {
        self.ies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ies.is_empty()
    }

    /// Find an IE by ID
    pub fn find(&self, id: ProtocolIeId) -> Option<&ProtocolIeField> {
        self.ies.iter().find(|ie| ie.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProtocolIeField> {
        self.ies.iter()
    }
}

impl AperEncode for ProtocolIeContainer {
    fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()> {
        encoder.encode_constrained_length(self.ies.len(), 0, Self::MAX_PROTOCOL_IES)?;
        for ie in &self.ies {
            ie.encode_aper(encoder)?;
        }
        Ok(())
    }
}

impl AperDecode for ProtocolIeContainer {
    fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self> {
        let count = decoder.decode_constrained_length(0, Self::MAX_PROTOCOL_IES)?;
        // Each field needs at least four octets; refuse counts the input cannot hold
        if count.saturating_mul(32) > decoder.remaining_bits() {
            return Err(PerError::InvalidLength { length: count });
        }
        let mut ies = Vec::with_capacity(count);
        for _ in 0..count {
            ies.push(ProtocolIeField::decode_aper(decoder)?);
        }
        Ok(ProtocolIeContainer { ies })
    }
}

/// AMF-UE-NGAP-ID - Unique identifier for UE in AMF
/// ASN.1: AMF-UE-NGAP-ID ::= INTEGER (0..1099511627775)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AmfUeNgapId(pub u64);

impl AmfUeNgapId {
    pub const CONSTRAINT: Constraint = Constraint::new(0, 1099511627775);
}

impl AperEncode for AmfUeNgapId {
    fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()> {
        encoder.encode_constrained_whole_number(self.0 as i64, &Self::CONSTRAINT)
    }
}

impl AperDecode for AmfUeNgapId {
    fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self> {
        let value = decoder.decode_constrained_whole_number(&Self::CONSTRAINT)?;
        Ok(AmfUeNgapId(value as u64))
    }
}

/// RAN-UE-NGAP-ID - Unique identifier for UE in RAN
/// ASN.1: RAN-UE-NGAP-ID ::= INTEGER (0..4294967295)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RanUeNgapId(pub u32);

impl RanUeNgapId {
    pub const CONSTRAINT: Constraint = Constraint::new(0, 4294967295);
}

impl AperEncode for RanUeNgapId {
    fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()> {
        encoder.encode_constrained_whole_number(self.0 as i64, &Self::CONSTRAINT)
    }
}

impl AperDecode for RanUeNgapId {
    fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self> {
        let value = decoder.decode_constrained_whole_number(&Self::CONSTRAINT)?;
        Ok(RanUeNgapId(value as u32))
    }
}

/// PDUSessionID ::= INTEGER (0..255)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PduSessionId(pub u8);

impl PduSessionId {
    pub const CONSTRAINT: Constraint = Constraint::new(0, 255);
}

impl AperEncode for PduSessionId {
    fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()> {
        encoder.encode_constrained_whole_number(self.0 as i64, &Self::CONSTRAINT)
    }
}

impl AperDecode for PduSessionId {
    fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self> {
        let value = decoder.decode_constrained_whole_number(&Self::CONSTRAINT)?;
        Ok(PduSessionId(value as u8))
    }
}

/// BitRate ::= INTEGER (0..4000000000000, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BitRate(pub u64);

impl BitRate {
    pub const CONSTRAINT: Constraint = Constraint::extensible(0, 4_000_000_000_000);
}

impl AperEncode for BitRate {
    fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()> {
        let value = self.0 as i64;
        if value > Self::CONSTRAINT.max {
            encoder.write_bit(true);
            return encoder.encode_semi_constrained_whole_number(self.0, 0);
        }
        encoder.write_bit(false);
        encoder.encode_constrained_whole_number(value, &Self::CONSTRAINT)
    }
}

impl AperDecode for BitRate {
    fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self> {
        if decoder.read_bit()? {
            return Ok(BitRate(decoder.decode_semi_constrained_whole_number(0)?));
        }
        let value = decoder.decode_constrained_whole_number(&Self::CONSTRAINT)?;
        Ok(BitRate(value as u64))
    }
}

/// TimeToWait - Time to wait before retrying
/// ASN.1: TimeToWait ::= ENUMERATED { v1s, v2s, v5s, v10s, v20s, v60s, ... }
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TimeToWait {
    V1s = 0,
    V2s = 1,
    V5s = 2,
    V10s = 3,
    V20s = 4,
    V60s = 5,
}

impl TimeToWait {
    pub const CONSTRAINT: Constraint = Constraint::extensible(0, 5);

    /// Get the wait time in seconds
    pub fn seconds(&self) -> u64 {
        match self {
            TimeToWait::V1s => 1,
            TimeToWait::V2s => 2,
            TimeToWait::V5s => 5,
            TimeToWait::V10s => 10,
            TimeToWait::V20s => 20,
            TimeToWait::V60s => 60,
        }
    }
}

impl AperEncode for TimeToWait {
    fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()> {
        encoder.encode_enumerated(*self as i64, &Self::CONSTRAINT)
    }
}

impl AperDecode for TimeToWait {
    fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self> {
        match decoder.decode_enumerated(&Self::CONSTRAINT)? {
            0 => Ok(TimeToWait::V1s),
            1 => Ok(TimeToWait::V2s),
            2 => Ok(TimeToWait::V5s),
            3 => Ok(TimeToWait::V10s),
            4 => Ok(TimeToWait::V20s),
            5 => Ok(TimeToWait::V60s),
            value => Err(PerError::DecodeError(format!("Unknown TimeToWait value: {value}"))),
        }
    }
}

/// RelativeAMFCapacity - Relative capacity of AMF
/// ASN.1: RelativeAMFCapacity ::= INTEGER (0..255)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelativeAmfCapacity(pub u8);

impl RelativeAmfCapacity {
    pub const CONSTRAINT: Constraint = Constraint::new(0, 255);
}

impl AperEncode for RelativeAmfCapacity {
    fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()> {
        encoder.encode_constrained_whole_number(self.0 as i64, &Self::CONSTRAINT)
    }
}

impl AperDecode for RelativeAmfCapacity {
    fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self> {
        let value = decoder.decode_constrained_whole_number(&Self::CONSTRAINT)?;
        Ok(RelativeAmfCapacity(value as u8))
    }
}

/// NAS-PDU - NAS Protocol Data Unit (opaque octet string)
/// ASN.1: NAS-PDU ::= OCTET STRING
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NasPdu(pub Vec<u8>);

impl AperEncode for NasPdu {
    fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()> {
        encoder.encode_octet_string(&self.0, None, None)
    }
}

impl AperDecode for NasPdu {
    fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self> {
        Ok(NasPdu(decoder.decode_octet_string(None, None)?))
    }
}

/// PLMN-Identity - PLMN Identifier (3 octets)
/// ASN.1: PLMNIdentity ::= OCTET STRING (SIZE (3))
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PlmnIdentity(pub [u8; 3]);

impl PlmnIdentity {
    /// BCD-pack an MCC/MNC pair given as digit strings
    pub fn from_digits(mcc: &str, mnc: &str) -> Option<Self> {
        let digit = |c: char| c.to_digit(10).map(|d| d as u8);
        let m: Vec<u8> = mcc.chars().map(digit).collect::<Option<_>>()?;
        let n: Vec<u8> = mnc.chars().map(digit).collect::<Option<_>>()?;
        if m.len() != 3 || !(n.len() == 2 || n.len() == 3) {
            return None;
        }
        let mnc3 = if n.len() == 3 { n[2] } else { 0x0F };
        Some(Self([
            (m[1] << 4) | m[0],
            (mnc3 << 4) | m[2],
            (n[1] << 4) | n[0],
        ]))
    }
}

impl AperEncode for PlmnIdentity {
    fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()> {
        encoder.encode_octet_string(&self.0, Some(3), Some(3))
    }
}

impl AperDecode for PlmnIdentity {
    fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self> {
        let data = decoder.decode_octet_string(Some(3), Some(3))?;
        let mut arr = [0u8; 3];
        arr.copy_from_slice(&data);
        Ok(PlmnIdentity(arr))
    }
}

/// TAC - Tracking Area Code (3 octets)
/// ASN.1: TAC ::= OCTET STRING (SIZE (3))
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tac(pub [u8; 3]);

impl Tac {
    pub fn from_u24(value: u32) -> Self {
        let bytes = value.to_be_bytes();
        Self([bytes[1], bytes[2], bytes[3]])
    }
}

impl AperEncode for Tac {
    fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()> {
        encoder.encode_octet_string(&self.0, Some(3), Some(3))
    }
}

impl AperDecode for Tac {
    fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self> {
        let data = decoder.decode_octet_string(Some(3), Some(3))?;
        let mut arr = [0u8; 3];
        arr.copy_from_slice(&data);
        Ok(Tac(arr))
    }
}

/// S-NSSAI - Single Network Slice Selection Assistance Information
/// ASN.1: S-NSSAI ::= SEQUENCE { sST OCTET STRING (SIZE(1)), sD OCTET STRING (SIZE(3)) OPTIONAL, iE-Extensions OPTIONAL, ... }
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SNssai {
    pub sst: u8,
    pub sd: Option<[u8; 3]>,
}

impl AperEncode for SNssai {
    fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()> {
        encoder.write_bit(false); // extension
        encoder.write_bit(self.sd.is_some());
        encoder.write_bit(false); // iE-Extensions
        encoder.encode_octet_string(&[self.sst], Some(1), Some(1))?;
        if let Some(sd) = &self.sd {
            encoder.encode_octet_string(sd, Some(3), Some(3))?;
        }
        Ok(())
    }
}

impl AperDecode for SNssai {
    fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self> {
        if decoder.read_bit()? {
            return Err(PerError::UnsupportedExtension);
        }
        let has_sd = decoder.read_bit()?;
        let has_ext = decoder.read_bit()?;
        let sst = decoder.decode_octet_string(Some(1), Some(1))?[0];
        let sd = if has_sd {
            let data = decoder.decode_octet_string(Some(3), Some(3))?;
            Some([data[0], data[1], data[2]])
        } else {
            None
        };
        if has_ext {
            skip_ie_extensions(decoder)?;
        }
        Ok(SNssai { sst, sd })
    }
}

/// Skip a ProtocolExtensionContainer (SIZE (1..maxProtocolExtensions))
pub fn skip_ie_extensions(decoder: &mut AperDecoder) -> PerResult<()> {
    let count = decoder.decode_constrained_length(1, 65535)?;
    for _ in 0..count {
        // ProtocolExtensionField has the same layout as ProtocolIE-Field
        ProtocolIeField::decode_aper(decoder)?;
    }
    Ok(())
}

/// UE-NGAP-IDs - Choice of UE identifiers
/// ASN.1: UE-NGAP-IDs ::= CHOICE { uE-NGAP-ID-pair, aMF-UE-NGAP-ID, choice-Extensions }
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UeNgapIds {
    UeNgapIdPair { amf_ue_ngap_id: AmfUeNgapId, ran_ue_ngap_id: RanUeNgapId },
    AmfUeNgapId(AmfUeNgapId),
}

impl AperEncode for UeNgapIds {
    fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()> {
        match self {
            UeNgapIds::UeNgapIdPair { amf_ue_ngap_id, ran_ue_ngap_id } => {
                encoder.encode_choice_index(0, 3, false)?;
                // UE-NGAP-ID-pair SEQUENCE { aMF, rAN, iE-Extensions OPTIONAL, ... }
                encoder.write_bit(false);
                encoder.write_bit(false);
                amf_ue_ngap_id.encode_aper(encoder)?;
                ran_ue_ngap_id.encode_aper(encoder)?;
            }
            UeNgapIds::AmfUeNgapId(id) => {
                encoder.encode_choice_index(1, 3, false)?;
                id.encode_aper(encoder)?;
            }
        }
        Ok(())
    }
}

impl AperDecode for UeNgapIds {
    fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self> {
        match decoder.decode_choice_index(3, false)? {
            0 => {
                let _ext = decoder.read_bit()?;
                let has_ie_ext = decoder.read_bit()?;
                let amf_ue_ngap_id = AmfUeNgapId::decode_aper(decoder)?;
                let ran_ue_ngap_id = RanUeNgapId::decode_aper(decoder)?;
                if has_ie_ext {
                    skip_ie_extensions(decoder)?;
                }
                Ok(UeNgapIds::UeNgapIdPair { amf_ue_ngap_id, ran_ue_ngap_id })
            }
            1 => Ok(UeNgapIds::AmfUeNgapId(AmfUeNgapId::decode_aper(decoder)?)),
            index => Err(PerError::InvalidChoiceIndex { index, max: 1 }),
        }
    }
}

/// RRC-Establishment-Cause
/// ASN.1: RRCEstablishmentCause ::= ENUMERATED { emergency, highPriorityAccess, ..., mcs-PriorityAccess, ..., notAvailable }
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RrcEstablishmentCause {
    Emergency = 0,
    HighPriorityAccess = 1,
    MtAccess = 2,
    #[default]
    MoSignalling = 3,
    MoData = 4,
    MoVoiceCall = 5,
    MoVideoCall = 6,
    MoSms = 7,
    MpsPriorityAccess = 8,
    McsPriorityAccess = 9,
    NotAvailable = 10,
}

impl RrcEstablishmentCause {
    pub const CONSTRAINT: Constraint = Constraint::extensible(0, 9);

    pub fn from_value(value: u8) -> Option<Self> {
        use RrcEstablishmentCause::*;
        [
            Emergency, HighPriorityAccess, MtAccess, MoSignalling, MoData, MoVoiceCall,
            MoVideoCall, MoSms, MpsPriorityAccess, McsPriorityAccess, NotAvailable,
        ]
        .get(value as usize)
        .copied()
    }
}

impl AperEncode for RrcEstablishmentCause {
    fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()> {
        encoder.encode_enumerated(*self as i64, &Self::CONSTRAINT)
    }
}

impl AperDecode for RrcEstablishmentCause {
    fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self> {
        let value = decoder.decode_enumerated(&Self::CONSTRAINT)?;
        u8::try_from(value)
            .ok()
            .and_then(Self::from_value)
            .ok_or_else(|| PerError::DecodeError(format!("Unknown RRCEstablishmentCause: {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: AperEncode + AperDecode>(value: &T) -> T {
        let mut encoder = AperEncoder::new();
        value.encode_aper(&mut encoder).unwrap();
        let bytes = encoder.into_aligned_vec();
        let mut decoder = AperDecoder::new(&bytes);
        T::decode_aper(&mut decoder).unwrap()
    }

    #[test]
    fn test_amf_ue_ngap_id_roundtrip() {
        let id = AmfUeNgapId(0xff_ffff_fffe);
        assert_eq!(roundtrip(&id), id);
    }

    #[test]
    fn test_ran_ue_ngap_id_roundtrip() {
        let id = RanUeNgapId(0xDEADBEEF);
        assert_eq!(roundtrip(&id), id);
    }

    #[test]
    fn test_bit_rate_roundtrip() {
        for rate in [0u64, 1_000_000, 4_000_000_000_000] {
            assert_eq!(roundtrip(&BitRate(rate)), BitRate(rate));
        }
    }

    #[test]
    fn test_snssai_roundtrip() {
        let s = SNssai { sst: 1, sd: Some([0x01, 0x02, 0x03]) };
        assert_eq!(roundtrip(&s), s);
        let s = SNssai { sst: 2, sd: None };
        assert_eq!(roundtrip(&s), s);
    }

    #[test]
    fn test_plmn_from_digits() {
        // 208/93 -> 02 f8 39
        assert_eq!(PlmnIdentity::from_digits("208", "93").unwrap().0, [0x02, 0xf8, 0x39]);
        // 310/410 -> 13 00 14
        assert_eq!(PlmnIdentity::from_digits("310", "410").unwrap().0, [0x13, 0x00, 0x14]);
        assert!(PlmnIdentity::from_digits("20", "93").is_none());
        assert!(PlmnIdentity::from_digits("2a8", "93").is_none());
    }

    #[test]
    fn test_ue_ngap_ids_roundtrip() {
        let ids = UeNgapIds::UeNgapIdPair {
            amf_ue_ngap_id: AmfUeNgapId(7),
            ran_ue_ngap_id: RanUeNgapId(9),
        };
        assert_eq!(roundtrip(&ids), ids);
        let ids = UeNgapIds::AmfUeNgapId(AmfUeNgapId(1));
        assert_eq!(roundtrip(&ids), ids);
    }

    #[test]
    fn test_rrc_establishment_cause_extension() {
        let cause = RrcEstablishmentCause::NotAvailable;
        assert_eq!(roundtrip(&cause), cause);
        assert_eq!(roundtrip(&RrcEstablishmentCause::MoData), RrcEstablishmentCause::MoData);
    }

    #[test]
    fn test_protocol_ie_container_roundtrip() {
        let mut container = ProtocolIeContainer::new();
        container.push(ProtocolIeField {
            id: ProtocolIeId::AMF_UE_NGAP_ID,
            criticality: Criticality::Reject,
            value: vec![0x00, 0x01, 0x02, 0x03],
        });
        container.push(ProtocolIeField {
            id: ProtocolIeId::RAN_UE_NGAP_ID,
            criticality: Criticality::Ignore,
            value: vec![0xDE, 0xAD, 0xBE, 0xEF],
        });
        let decoded = roundtrip(&container);
        assert_eq!(decoded, container);
        assert!(decoded.find(ProtocolIeId::RAN_UE_NGAP_ID).is_some());
        assert!(decoded.find(ProtocolIeId::NAS_PDU).is_none());
    }

    #[test]
    fn test_container_count_beyond_input_rejected() {
        // count 0x0100 with no following fields
        let bytes = [0x01, 0x00];
        let mut decoder = AperDecoder::new(&bytes);
        assert!(ProtocolIeContainer::decode_aper(&mut decoder).is_err());
    }
}
