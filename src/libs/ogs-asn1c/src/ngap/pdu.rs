//! NGAP PDU Types
//!
//! Top-level PDU structures from NGAP-PDU-Descriptions (3GPP TS 38.413).
//! Every elementary procedure message is a SEQUENCE { protocolIEs, ... },
//! so the message value is carried as a generic IE container and typed
//! by the procedure code one layer up.

use super::ies::ProtocolIeContainer;
use super::types::{Criticality, ProcedureCode};
use crate::per::{AperDecode, AperDecoder, AperEncode, AperEncoder, PerError, PerResult};

/// Outcome kind of an NGAP message (the NGAP-PDU CHOICE alternative)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Initiating,
    Successful,
    Unsuccessful,
}

/// InitiatingMessage / SuccessfulOutcome / UnsuccessfulOutcome body
/// ASN.1: SEQUENCE { procedureCode, criticality, value }
#[derive(Debug, Clone, PartialEq)]
pub struct NgapMessageBody {
    pub procedure_code: ProcedureCode,
    pub criticality: Criticality,
    pub ies: ProtocolIeContainer,
}

impl NgapMessageBody {
    pub fn new(procedure_code: ProcedureCode, criticality: Criticality) -> Self {
        Self {
            procedure_code,
            criticality,
            ies: ProtocolIeContainer::new(),
        }
    }
}

impl AperEncode for NgapMessageBody {
    fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()> {
        self.procedure_code.encode_aper(encoder)?;
        self.criticality.encode_aper(encoder)?;

        // value is an OPEN TYPE holding an extensible SEQUENCE { protocolIEs }
        let mut value = AperEncoder::new();
        value.write_bit(false);
        self.ies.encode_aper(&mut value)?;
        encoder.encode_open_type(&value.into_aligned_vec())
    }
}

impl AperDecode for NgapMessageBody {
    fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self> {
        let procedure_code = ProcedureCode::decode_aper(decoder)?;
        let criticality = Criticality::decode_aper(decoder)?;

        let raw = decoder.decode_open_type()?;
        let mut value = AperDecoder::new(&raw);
        if value.read_bit()? {
            return Err(PerError::UnsupportedExtension);
        }
        let ies = ProtocolIeContainer::decode_aper(&mut value)?;

        Ok(NgapMessageBody { procedure_code, criticality, ies })
    }
}

/// NGAP-PDU - Top-level PDU for all NGAP messages
/// ASN.1: NGAP-PDU ::= CHOICE { initiatingMessage, successfulOutcome, unsuccessfulOutcome, ... }
#[derive(Debug, Clone, PartialEq)]
pub enum NgapPdu {
    InitiatingMessage(NgapMessageBody),
    SuccessfulOutcome(NgapMessageBody),
    UnsuccessfulOutcome(NgapMessageBody),
}

impl NgapPdu {
    pub const NUM_ALTERNATIVES: usize = 3;
    pub const EXTENSIBLE: bool = true;

    pub fn new(kind: MessageKind, body: NgapMessageBody) -> Self {
        match kind {
            MessageKind::Initiating => NgapPdu::InitiatingMessage(body),
            MessageKind::Successful => NgapPdu::SuccessfulOutcome(body),
            MessageKind::Unsuccessful => NgapPdu::UnsuccessfulOutcome(body),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            NgapPdu::InitiatingMessage(_) => MessageKind::Initiating,
            NgapPdu::SuccessfulOutcome(_) => MessageKind::Successful,
            NgapPdu::UnsuccessfulOutcome(_) => MessageKind::Unsuccessful,
        }
    }

    pub fn body(&self) -> &NgapMessageBody {
        match self {
            NgapPdu::InitiatingMessage(body)
            | NgapPdu::SuccessfulOutcome(body)
            | NgapPdu::UnsuccessfulOutcome(body) => body,
        }
    }

    pub fn procedure_code(&self) -> ProcedureCode {
        self.body().procedure_code
    }

    /// Encode to a complete, octet-aligned buffer
    pub fn to_bytes(&self) -> PerResult<Vec<u8>> {
        let mut encoder = AperEncoder::new();
        self.encode_aper(&mut encoder)?;
        Ok(encoder.into_aligned_vec())
    }

    pub fn from_bytes(data: &[u8]) -> PerResult<Self> {
        let mut decoder = AperDecoder::new(data);
        Self::decode_aper(&mut decoder)
    }
}

impl AperEncode for NgapPdu {
    fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()> {
        let index = match self.kind() {
            MessageKind::Initiating => 0,
            MessageKind::Successful => 1,
            MessageKind::Unsuccessful => 2,
        };
        encoder.encode_choice_index(index, Self::NUM_ALTERNATIVES, Self::EXTENSIBLE)?;
        self.body().encode_aper(encoder)
    }
}

impl AperDecode for NgapPdu {
    fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self> {
        let index = decoder.decode_choice_index(Self::NUM_ALTERNATIVES, Self::EXTENSIBLE)?;
        let kind = match index {
            0 => MessageKind::Initiating,
            1 => MessageKind::Successful,
            2 => MessageKind::Unsuccessful,
            _ => {
                return Err(PerError::InvalidChoiceIndex {
                    index,
                    max: Self::NUM_ALTERNATIVES - 1,
                })
            }
        };
        Ok(NgapPdu::new(kind, NgapMessageBody::decode_aper(decoder)?))
    }
}
