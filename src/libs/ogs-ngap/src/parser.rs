//! NGAP Message Parsers
//!
//! Functions for decoding NGAP PDU messages from APER bytes into high-level types.
//! Each function takes the IE container of a decoded PDU and maps the IEs to
//! their strongly-typed representations. Unknown IEs are ignored.

use ogs_asn1c::ngap::cause::Cause;
use ogs_asn1c::ngap::ies::{ProtocolIeContainer, ProtocolIeField};
use ogs_asn1c::ngap::pdu::{MessageKind, NgapPdu};
use ogs_asn1c::ngap::types::{ProcedureCode, ProtocolIeId};
use ogs_asn1c::per::{AperDecode, AperDecoder, Constraint};

use crate::error::{NgapError, NgapResult};
use crate::ie::{self, Preamble};
use crate::types::*;

/// Decoded NGAP message - discriminated union of all supported message types
#[derive(Debug, Clone, PartialEq)]
pub enum NgapMessage {
    NgSetupRequest(NgSetupRequest),
    NgSetupResponse(NgSetupResponse),
    NgSetupFailure(NgSetupFailure),
    InitialUeMessage(InitialUeMessage),
    DownlinkNasTransport(DownlinkNasTransport),
    UplinkNasTransport(UplinkNasTransport),
    InitialContextSetupRequest(InitialContextSetupRequest),
    InitialContextSetupResponse(InitialContextSetupResponse),
    InitialContextSetupFailure(InitialContextSetupFailure),
    PduSessionResourceSetupRequest(PduSessionResourceSetupRequest),
    PduSessionResourceSetupResponse(PduSessionResourceSetupResponse),
    PduSessionResourceReleaseCommand(PduSessionResourceReleaseCommand),
    PduSessionResourceReleaseResponse(PduSessionResourceReleaseResponse),
    UeContextReleaseRequest(UeContextReleaseRequest),
    UeContextReleaseCommand(UeContextReleaseCommand),
    UeContextReleaseComplete(UeContextReleaseComplete),
    NgReset(NgReset),
    NgResetAcknowledge(NgResetAcknowledge),
    ErrorIndication(ErrorIndication),
    AmfConfigurationUpdate(AmfConfigurationUpdate),
    AmfConfigurationUpdateAcknowledge(AmfConfigurationUpdateAcknowledge),
    AmfConfigurationUpdateFailure(AmfConfigurationUpdateFailure),
    OverloadStart(OverloadStart),
    OverloadStop,
    /// A procedure whose content is not modelled
    Other {
        procedure_code: u8,
        kind: MessageKind,
    },
}

impl NgapMessage {
    /// Message name for logging
    pub fn name(&self) -> &'static str {
        match self {
            NgapMessage::NgSetupRequest(_) => "NGSetupRequest",
            NgapMessage::NgSetupResponse(_) => "NGSetupResponse",
            NgapMessage::NgSetupFailure(_) => "NGSetupFailure",
            NgapMessage::InitialUeMessage(_) => "InitialUEMessage",
            NgapMessage::DownlinkNasTransport(_) => "DownlinkNASTransport",
            NgapMessage::UplinkNasTransport(_) => "UplinkNASTransport",
            NgapMessage::InitialContextSetupRequest(_) => "InitialContextSetupRequest",
            NgapMessage::InitialContextSetupResponse(_) => "InitialContextSetupResponse",
            NgapMessage::InitialContextSetupFailure(_) => "InitialContextSetupFailure",
            NgapMessage::PduSessionResourceSetupRequest(_) => "PDUSessionResourceSetupRequest",
            NgapMessage::PduSessionResourceSetupResponse(_) => "PDUSessionResourceSetupResponse",
            NgapMessage::PduSessionResourceReleaseCommand(_) => "PDUSessionResourceReleaseCommand",
            NgapMessage::PduSessionResourceReleaseResponse(_) => "PDUSessionResourceReleaseResponse",
            NgapMessage::UeContextReleaseRequest(_) => "UEContextReleaseRequest",
            NgapMessage::UeContextReleaseCommand(_) => "UEContextReleaseCommand",
            NgapMessage::UeContextReleaseComplete(_) => "UEContextReleaseComplete",
            NgapMessage::NgReset(_) => "NGReset",
            NgapMessage::NgResetAcknowledge(_) => "NGResetAcknowledge",
            NgapMessage::ErrorIndication(_) => "ErrorIndication",
            NgapMessage::AmfConfigurationUpdate(_) => "AMFConfigurationUpdate",
            NgapMessage::AmfConfigurationUpdateAcknowledge(_) => "AMFConfigurationUpdateAcknowledge",
            NgapMessage::AmfConfigurationUpdateFailure(_) => "AMFConfigurationUpdateFailure",
            NgapMessage::OverloadStart(_) => "OverloadStart",
            NgapMessage::OverloadStop => "OverloadStop",
            NgapMessage::Other { .. } => "Other",
        }
    }
}

/// Decode an NGAP PDU from APER bytes into a high-level NgapMessage
pub fn decode_ngap_pdu(data: &[u8]) -> NgapResult<NgapMessage> {
    let pdu = NgapPdu::from_bytes(data)?;
    decode_ngap_pdu_raw(pdu)
}

/// Decode the raw NgapPdu (without re-decoding from bytes)
pub fn decode_ngap_pdu_raw(pdu: NgapPdu) -> NgapResult<NgapMessage> {
    match pdu {
        NgapPdu::InitiatingMessage(body) => decode_initiating_message(body.procedure_code, &body.ies),
        NgapPdu::SuccessfulOutcome(body) => decode_successful_outcome(body.procedure_code, &body.ies),
        NgapPdu::UnsuccessfulOutcome(body) => decode_unsuccessful_outcome(body.procedure_code, &body.ies),
    }
}

fn decode_initiating_message(code: ProcedureCode, ies: &ProtocolIeContainer) -> NgapResult<NgapMessage> {
    Ok(match code {
        ProcedureCode::NG_SETUP => NgapMessage::NgSetupRequest(parse_ng_setup_request(ies)?),
        ProcedureCode::INITIAL_UE_MESSAGE => NgapMessage::InitialUeMessage(parse_initial_ue_message(ies)?),
        ProcedureCode::DOWNLINK_NAS_TRANSPORT => {
            NgapMessage::DownlinkNasTransport(parse_downlink_nas_transport(ies)?)
        }
        ProcedureCode::UPLINK_NAS_TRANSPORT => NgapMessage::UplinkNasTransport(parse_uplink_nas_transport(ies)?),
        ProcedureCode::INITIAL_CONTEXT_SETUP => {
            NgapMessage::InitialContextSetupRequest(parse_initial_context_setup_request(ies)?)
        }
        ProcedureCode::PDU_SESSION_RESOURCE_SETUP => {
            NgapMessage::PduSessionResourceSetupRequest(parse_pdu_session_resource_setup_request(ies)?)
        }
        ProcedureCode::PDU_SESSION_RESOURCE_RELEASE => {
            NgapMessage::PduSessionResourceReleaseCommand(parse_pdu_session_resource_release_command(ies)?)
        }
        ProcedureCode::UE_CONTEXT_RELEASE_REQUEST => {
            NgapMessage::UeContextReleaseRequest(parse_ue_context_release_request(ies)?)
        }
        ProcedureCode::UE_CONTEXT_RELEASE => {
            NgapMessage::UeContextReleaseCommand(parse_ue_context_release_command(ies)?)
        }
        ProcedureCode::NG_RESET => NgapMessage::NgReset(parse_ng_reset(ies)?),
        ProcedureCode::ERROR_INDICATION => NgapMessage::ErrorIndication(parse_error_indication(ies)?),
        ProcedureCode::AMF_CONFIGURATION_UPDATE => {
            NgapMessage::AmfConfigurationUpdate(parse_amf_configuration_update(ies)?)
        }
        ProcedureCode::OVERLOAD_START => NgapMessage::OverloadStart(parse_overload_start(ies)?),
        ProcedureCode::OVERLOAD_STOP => NgapMessage::OverloadStop,
        other => NgapMessage::Other {
            procedure_code: other.0,
            kind: MessageKind::Initiating,
        },
    })
}

fn decode_successful_outcome(code: ProcedureCode, ies: &ProtocolIeContainer) -> NgapResult<NgapMessage> {
    Ok(match code {
        ProcedureCode::NG_SETUP => NgapMessage::NgSetupResponse(parse_ng_setup_response(ies)?),
        ProcedureCode::INITIAL_CONTEXT_SETUP => {
            NgapMessage::InitialContextSetupResponse(parse_initial_context_setup_response(ies)?)
        }
        ProcedureCode::PDU_SESSION_RESOURCE_SETUP => {
            NgapMessage::PduSessionResourceSetupResponse(parse_pdu_session_resource_setup_response(ies)?)
        }
        ProcedureCode::PDU_SESSION_RESOURCE_RELEASE => {
            NgapMessage::PduSessionResourceReleaseResponse(parse_pdu_session_resource_release_response(ies)?)
        }
        ProcedureCode::UE_CONTEXT_RELEASE => {
            NgapMessage::UeContextReleaseComplete(parse_ue_context_release_complete(ies)?)
        }
        ProcedureCode::NG_RESET => NgapMessage::NgResetAcknowledge(parse_ng_reset_acknowledge(ies)?),
        ProcedureCode::AMF_CONFIGURATION_UPDATE => {
            NgapMessage::AmfConfigurationUpdateAcknowledge(AmfConfigurationUpdateAcknowledge {})
        }
        other => NgapMessage::Other {
            procedure_code: other.0,
            kind: MessageKind::Successful,
        },
    })
}

fn decode_unsuccessful_outcome(code: ProcedureCode, ies: &ProtocolIeContainer) -> NgapResult<NgapMessage> {
    Ok(match code {
        ProcedureCode::NG_SETUP => NgapMessage::NgSetupFailure(parse_ng_setup_failure(ies)?),
        ProcedureCode::INITIAL_CONTEXT_SETUP => {
            NgapMessage::InitialContextSetupFailure(parse_initial_context_setup_failure(ies)?)
        }
        ProcedureCode::AMF_CONFIGURATION_UPDATE => {
            NgapMessage::AmfConfigurationUpdateFailure(parse_amf_configuration_update_failure(ies)?)
        }
        other => NgapMessage::Other {
            procedure_code: other.0,
            kind: MessageKind::Unsuccessful,
        },
    })
}

// ============================================================================
// IE lookup helpers
// ============================================================================

fn require<'a>(
    ies: &'a ProtocolIeContainer,
    id: ProtocolIeId,
    ie_name: &'static str,
) -> NgapResult<&'a ProtocolIeField> {
    ies.find(id).ok_or(NgapError::MissingMandatoryIe { ie_name, ie_id: id.0 })
}

fn optional<T>(
    ies: &ProtocolIeContainer,
    id: ProtocolIeId,
    decode: impl FnOnce(&ProtocolIeField) -> NgapResult<T>,
) -> NgapResult<Option<T>> {
    ies.find(id).map(decode).transpose()
}

fn amf_ue_ngap_id(ies: &ProtocolIeContainer) -> NgapResult<u64> {
    ie::decode_amf_ue_ngap_id(require(ies, ProtocolIeId::AMF_UE_NGAP_ID, "AMF-UE-NGAP-ID")?)
}

fn ran_ue_ngap_id(ies: &ProtocolIeContainer) -> NgapResult<u32> {
    ie::decode_ran_ue_ngap_id(require(ies, ProtocolIeId::RAN_UE_NGAP_ID, "RAN-UE-NGAP-ID")?)
}

fn cause(ies: &ProtocolIeContainer) -> NgapResult<Cause> {
    ie::decode_cause(require(ies, ProtocolIeId::CAUSE, "Cause")?)
}

fn transfer_items<T>(
    ies: &ProtocolIeContainer,
    id: ProtocolIeId,
    make: impl Fn(u8, Vec<u8>) -> T,
) -> NgapResult<Vec<T>> {
    Ok(optional(ies, id, ie::decode_pdu_session_transfer_list)?
        .unwrap_or_default()
        .into_iter()
        .map(|(id, transfer)| make(id, transfer))
        .collect())
}

// ============================================================================
// NG Setup
// ============================================================================

pub fn parse_ng_setup_request(ies: &ProtocolIeContainer) -> NgapResult<NgSetupRequest> {
    Ok(NgSetupRequest {
        global_ran_node_id: ie::decode_global_ran_node_id(require(
            ies,
            ProtocolIeId::GLOBAL_RAN_NODE_ID,
            "GlobalRANNodeID",
        )?)?,
        ran_node_name: optional(ies, ProtocolIeId::RAN_NODE_NAME, ie::decode_ran_node_name)?,
        supported_ta_list: ie::decode_supported_ta_list(require(
            ies,
            ProtocolIeId::SUPPORTED_TA_LIST,
            "SupportedTAList",
        )?)?,
        default_paging_drx: ie::decode_default_paging_drx(require(
            ies,
            ProtocolIeId::DEFAULT_PAGING_DRX,
            "DefaultPagingDRX",
        )?)?,
    })
}

pub fn parse_ng_setup_response(ies: &ProtocolIeContainer) -> NgapResult<NgSetupResponse> {
    Ok(NgSetupResponse {
        amf_name: ie::decode_amf_name(require(ies, ProtocolIeId::AMF_NAME, "AMFName")?)?,
        served_guami_list: ie::decode_served_guami_list(require(
            ies,
            ProtocolIeId::SERVED_GUAMI_LIST,
            "ServedGUAMIList",
        )?)?,
        relative_amf_capacity: ie::decode_relative_amf_capacity(require(
            ies,
            ProtocolIeId::RELATIVE_AMF_CAPACITY,
            "RelativeAMFCapacity",
        )?)?,
        plmn_support_list: ie::decode_plmn_support_list(require(
            ies,
            ProtocolIeId::PLMN_SUPPORT_LIST,
            "PLMNSupportList",
        )?)?,
    })
}

pub fn parse_ng_setup_failure(ies: &ProtocolIeContainer) -> NgapResult<NgSetupFailure> {
    Ok(NgSetupFailure {
        cause: cause(ies)?,
        time_to_wait: optional(ies, ProtocolIeId::TIME_TO_WAIT, ie::decode_time_to_wait)?,
    })
}

// ============================================================================
// NAS Transport
// ============================================================================

pub fn parse_initial_ue_message(ies: &ProtocolIeContainer) -> NgapResult<InitialUeMessage> {
    Ok(InitialUeMessage {
        ran_ue_ngap_id: ran_ue_ngap_id(ies)?,
        nas_pdu: ie::decode_nas_pdu(require(ies, ProtocolIeId::NAS_PDU, "NAS-PDU")?)?,
        user_location_info: ie::decode_user_location_information(require(
            ies,
            ProtocolIeId::USER_LOCATION_INFORMATION,
            "UserLocationInformation",
        )?)?,
        rrc_establishment_cause: ie::decode_rrc_establishment_cause(require(
            ies,
            ProtocolIeId::RRC_ESTABLISHMENT_CAUSE,
            "RRCEstablishmentCause",
        )?)?,
        ue_context_request: ies.find(ProtocolIeId::UE_CONTEXT_REQUEST).is_some(),
    })
}

pub fn parse_downlink_nas_transport(ies: &ProtocolIeContainer) -> NgapResult<DownlinkNasTransport> {
    Ok(DownlinkNasTransport {
        amf_ue_ngap_id: amf_ue_ngap_id(ies)?,
        ran_ue_ngap_id: ran_ue_ngap_id(ies)?,
        nas_pdu: ie::decode_nas_pdu(require(ies, ProtocolIeId::NAS_PDU, "NAS-PDU")?)?,
    })
}

pub fn parse_uplink_nas_transport(ies: &ProtocolIeContainer) -> NgapResult<UplinkNasTransport> {
    Ok(UplinkNasTransport {
        amf_ue_ngap_id: amf_ue_ngap_id(ies)?,
        ran_ue_ngap_id: ran_ue_ngap_id(ies)?,
        nas_pdu: ie::decode_nas_pdu(require(ies, ProtocolIeId::NAS_PDU, "NAS-PDU")?)?,
        user_location_info: ie::decode_user_location_information(require(
            ies,
            ProtocolIeId::USER_LOCATION_INFORMATION,
            "UserLocationInformation",
        )?)?,
    })
}

// ============================================================================
// Initial Context Setup
// ============================================================================

pub fn parse_initial_context_setup_request(ies: &ProtocolIeContainer) -> NgapResult<InitialContextSetupRequest> {
    Ok(InitialContextSetupRequest {
        amf_ue_ngap_id: amf_ue_ngap_id(ies)?,
        ran_ue_ngap_id: ran_ue_ngap_id(ies)?,
        ue_ambr: optional(ies, ProtocolIeId::UE_AGGREGATE_MAXIMUM_BIT_RATE, ie::decode_ue_ambr)?,
        guami: ie::decode_guami(require(ies, ProtocolIeId::GUAMI, "GUAMI")?)?,
        pdu_session_list: optional(
            ies,
            ProtocolIeId::PDU_SESSION_RESOURCE_SETUP_LIST_CXT_REQ,
            ie::decode_pdu_session_setup_list,
        )?
        .unwrap_or_default(),
        allowed_nssai: ie::decode_allowed_nssai(require(ies, ProtocolIeId::ALLOWED_NSSAI, "AllowedNSSAI")?)?,
        ue_security_capabilities: ie::decode_ue_security_capabilities(require(
            ies,
            ProtocolIeId::UE_SECURITY_CAPABILITIES,
            "UESecurityCapabilities",
        )?)?,
        security_key: ie::decode_security_key(require(ies, ProtocolIeId::SECURITY_KEY, "SecurityKey")?)?,
        nas_pdu: optional(ies, ProtocolIeId::NAS_PDU, ie::decode_nas_pdu)?,
    })
}

pub fn parse_initial_context_setup_response(ies: &ProtocolIeContainer) -> NgapResult<InitialContextSetupResponse> {
    Ok(InitialContextSetupResponse {
        amf_ue_ngap_id: amf_ue_ngap_id(ies)?,
        ran_ue_ngap_id: ran_ue_ngap_id(ies)?,
        setup_list: transfer_items(
            ies,
            ProtocolIeId::PDU_SESSION_RESOURCE_SETUP_LIST_CXT_RES,
            |pdu_session_id, transfer| PduSessionSetupResponseItem { pdu_session_id, transfer },
        )?,
        failed_list: transfer_items(
            ies,
            ProtocolIeId::PDU_SESSION_RESOURCE_FAILED_TO_SETUP_LIST_CXT_RES,
            |pdu_session_id, transfer| PduSessionFailedItem { pdu_session_id, transfer },
        )?,
    })
}

pub fn parse_initial_context_setup_failure(ies: &ProtocolIeContainer) -> NgapResult<InitialContextSetupFailure> {
    Ok(InitialContextSetupFailure {
        amf_ue_ngap_id: amf_ue_ngap_id(ies)?,
        ran_ue_ngap_id: ran_ue_ngap_id(ies)?,
        failed_list: transfer_items(
            ies,
            ProtocolIeId::PDU_SESSION_RESOURCE_FAILED_TO_SETUP_LIST_CXT_FAIL,
            |pdu_session_id, transfer| PduSessionFailedItem { pdu_session_id, transfer },
        )?,
        cause: cause(ies)?,
    })
}

// ============================================================================
// PDU Session Resource
// ============================================================================

pub fn parse_pdu_session_resource_setup_request(
    ies: &ProtocolIeContainer,
) -> NgapResult<PduSessionResourceSetupRequest> {
    Ok(PduSessionResourceSetupRequest {
        amf_ue_ngap_id: amf_ue_ngap_id(ies)?,
        ran_ue_ngap_id: ran_ue_ngap_id(ies)?,
        nas_pdu: optional(ies, ProtocolIeId::NAS_PDU, ie::decode_nas_pdu)?,
        setup_list: ie::decode_pdu_session_setup_list(require(
            ies,
            ProtocolIeId::PDU_SESSION_RESOURCE_SETUP_LIST_SU_REQ,
            "PDUSessionResourceSetupListSUReq",
        )?)?,
        ue_ambr: optional(ies, ProtocolIeId::UE_AGGREGATE_MAXIMUM_BIT_RATE, ie::decode_ue_ambr)?,
    })
}

pub fn parse_pdu_session_resource_setup_response(
    ies: &ProtocolIeContainer,
) -> NgapResult<PduSessionResourceSetupResponse> {
    Ok(PduSessionResourceSetupResponse {
        amf_ue_ngap_id: amf_ue_ngap_id(ies)?,
        ran_ue_ngap_id: ran_ue_ngap_id(ies)?,
        setup_list: transfer_items(
            ies,
            ProtocolIeId::PDU_SESSION_RESOURCE_SETUP_LIST_SU_RES,
            |pdu_session_id, transfer| PduSessionSetupResponseItem { pdu_session_id, transfer },
        )?,
        failed_list: transfer_items(
            ies,
            ProtocolIeId::PDU_SESSION_RESOURCE_FAILED_TO_SETUP_LIST_SU_RES,
            |pdu_session_id, transfer| PduSessionFailedItem { pdu_session_id, transfer },
        )?,
    })
}

pub fn parse_pdu_session_resource_release_command(
    ies: &ProtocolIeContainer,
) -> NgapResult<PduSessionResourceReleaseCommand> {
    let list = require(
        ies,
        ProtocolIeId::PDU_SESSION_RESOURCE_TO_RELEASE_LIST_REL_CMD,
        "PDUSessionResourceToReleaseListRelCmd",
    )?;
    Ok(PduSessionResourceReleaseCommand {
        amf_ue_ngap_id: amf_ue_ngap_id(ies)?,
        ran_ue_ngap_id: ran_ue_ngap_id(ies)?,
        nas_pdu: optional(ies, ProtocolIeId::NAS_PDU, ie::decode_nas_pdu)?,
        release_list: ie::decode_pdu_session_transfer_list(list)?
            .into_iter()
            .map(|(pdu_session_id, transfer)| PduSessionReleaseItem { pdu_session_id, transfer })
            .collect(),
    })
}

pub fn parse_pdu_session_resource_release_response(
    ies: &ProtocolIeContainer,
) -> NgapResult<PduSessionResourceReleaseResponse> {
    Ok(PduSessionResourceReleaseResponse {
        amf_ue_ngap_id: amf_ue_ngap_id(ies)?,
        ran_ue_ngap_id: ran_ue_ngap_id(ies)?,
        released_list: transfer_items(
            ies,
            ProtocolIeId::PDU_SESSION_RESOURCE_RELEASED_LIST_REL_RES,
            |pdu_session_id, transfer| PduSessionReleaseItem { pdu_session_id, transfer },
        )?,
    })
}

// ============================================================================
// UE Context Release
// ============================================================================

pub fn parse_ue_context_release_request(ies: &ProtocolIeContainer) -> NgapResult<UeContextReleaseRequest> {
    Ok(UeContextReleaseRequest {
        amf_ue_ngap_id: amf_ue_ngap_id(ies)?,
        ran_ue_ngap_id: ran_ue_ngap_id(ies)?,
        pdu_session_ids: optional(
            ies,
            ProtocolIeId::PDU_SESSION_RESOURCE_LIST_CXT_REL_REQ,
            ie::decode_pdu_session_list_cxt_rel_req,
        )?
        .unwrap_or_default(),
        cause: cause(ies)?,
    })
}

pub fn parse_ue_context_release_command(ies: &ProtocolIeContainer) -> NgapResult<UeContextReleaseCommand> {
    Ok(UeContextReleaseCommand {
        ue_ngap_ids: ie::decode_ue_ngap_ids(require(ies, ProtocolIeId::UE_NGAP_IDS, "UE-NGAP-IDs")?)?,
        cause: cause(ies)?,
    })
}

pub fn parse_ue_context_release_complete(ies: &ProtocolIeContainer) -> NgapResult<UeContextReleaseComplete> {
    Ok(UeContextReleaseComplete {
        amf_ue_ngap_id: amf_ue_ngap_id(ies)?,
        ran_ue_ngap_id: ran_ue_ngap_id(ies)?,
    })
}

// ============================================================================
// Interface Management
// ============================================================================

pub fn parse_ng_reset(ies: &ProtocolIeContainer) -> NgapResult<NgReset> {
    Ok(NgReset {
        cause: cause(ies)?,
        reset_type: ie::decode_reset_type(require(ies, ProtocolIeId::RESET_TYPE, "ResetType")?)?,
    })
}

pub fn parse_ng_reset_acknowledge(ies: &ProtocolIeContainer) -> NgapResult<NgResetAcknowledge> {
    Ok(NgResetAcknowledge {
        connection_list: optional(
            ies,
            ProtocolIeId::UE_ASSOCIATED_LOGICAL_NG_CONNECTION_LIST,
            ie::decode_connection_list,
        )?
        .unwrap_or_default(),
    })
}

pub fn parse_error_indication(ies: &ProtocolIeContainer) -> NgapResult<ErrorIndication> {
    Ok(ErrorIndication {
        amf_ue_ngap_id: optional(ies, ProtocolIeId::AMF_UE_NGAP_ID, ie::decode_amf_ue_ngap_id)?,
        ran_ue_ngap_id: optional(ies, ProtocolIeId::RAN_UE_NGAP_ID, ie::decode_ran_ue_ngap_id)?,
        cause: optional(ies, ProtocolIeId::CAUSE, ie::decode_cause)?,
    })
}

pub fn parse_amf_configuration_update(ies: &ProtocolIeContainer) -> NgapResult<AmfConfigurationUpdate> {
    Ok(AmfConfigurationUpdate {
        amf_name: optional(ies, ProtocolIeId::AMF_NAME, ie::decode_amf_name)?,
        served_guami_list: optional(ies, ProtocolIeId::SERVED_GUAMI_LIST, ie::decode_served_guami_list)?,
        relative_amf_capacity: optional(
            ies,
            ProtocolIeId::RELATIVE_AMF_CAPACITY,
            ie::decode_relative_amf_capacity,
        )?,
        plmn_support_list: optional(ies, ProtocolIeId::PLMN_SUPPORT_LIST, ie::decode_plmn_support_list)?,
    })
}

pub fn parse_amf_configuration_update_failure(
    ies: &ProtocolIeContainer,
) -> NgapResult<AmfConfigurationUpdateFailure> {
    Ok(AmfConfigurationUpdateFailure {
        cause: cause(ies)?,
        time_to_wait: optional(ies, ProtocolIeId::TIME_TO_WAIT, ie::decode_time_to_wait)?,
    })
}

pub fn parse_overload_start(ies: &ProtocolIeContainer) -> NgapResult<OverloadStart> {
    Ok(OverloadStart {
        overload_action: optional(ies, ProtocolIeId::AMF_OVERLOAD_RESPONSE, ie::decode_amf_overload_response)?,
        traffic_load_reduction: optional(
            ies,
            ProtocolIeId::AMF_TRAFFIC_LOAD_REDUCTION_INDICATION,
            ie::decode_traffic_load_reduction,
        )?,
    })
}

// ============================================================================
// PDU Session Transfers
// ============================================================================

/// Parse a PDUSessionResourceSetupRequestTransfer
pub fn parse_pdu_session_resource_setup_request_transfer(
    raw: &[u8],
) -> NgapResult<PduSessionResourceSetupRequestTransfer> {
    let ies = ie::decode_with(raw, |decoder| {
        let preamble = Preamble::<0>::read(decoder)?;
        let ies = ProtocolIeContainer::decode_aper(decoder)?;
        preamble.finish(decoder)?;
        Ok(ies)
    })?;

    Ok(PduSessionResourceSetupRequestTransfer {
        session_ambr: optional(
            &ies,
            ProtocolIeId::PDU_SESSION_AGGREGATE_MAXIMUM_BIT_RATE,
            ie::decode_pdu_session_ambr,
        )?,
        ul_ngu_up_tnl_info: optional(
            &ies,
            ProtocolIeId::UL_NGU_UP_TNL_INFORMATION,
            ie::decode_ul_ngu_up_tnl_information,
        )?,
        pdu_session_type: ie::decode_pdu_session_type(require(
            &ies,
            ProtocolIeId::PDU_SESSION_TYPE,
            "PDUSessionType",
        )?)?,
        security_indication: optional(&ies, ProtocolIeId::SECURITY_INDICATION, ie::decode_security_indication)?,
        network_instance: optional(&ies, ProtocolIeId::NETWORK_INSTANCE, ie::decode_network_instance)?,
        qos_flow_setup_list: ie::decode_qos_flow_setup_request_list(require(
            &ies,
            ProtocolIeId::QOS_FLOW_SETUP_REQUEST_LIST,
            "QosFlowSetupRequestList",
        )?)?,
    })
}

/// Parse a PDUSessionResourceSetupResponseTransfer; only the primary DL tunnel is kept
pub fn parse_pdu_session_resource_setup_response_transfer(
    raw: &[u8],
) -> NgapResult<PduSessionResourceSetupResponseTransfer> {
    ie::decode_with(raw, |decoder| {
        let preamble = Preamble::<4>::read(decoder)?;
        let (dl_tunnel, associated_qfis) = ie::read_qos_flow_per_tnl_information(decoder)?;
        if preamble.has(0) {
            ie::read_list(decoder, 1, ie::MAX_NO_OF_MULTI_CONNECTIVITY - 1, |decoder| {
                let item = Preamble::<1>::read(decoder)?;
                ie::read_qos_flow_per_tnl_information(decoder)?;
                item.finish(decoder)
            })?;
        }
        if preamble.has(1) {
            // SecurityResult { integrityProtectionResult, confidentialityProtectionResult }
            let result = Preamble::<1>::read(decoder)?;
            let outcome = Constraint::extensible(0, 1);
            decoder.decode_enumerated(&outcome)?;
            decoder.decode_enumerated(&outcome)?;
            result.finish(decoder)?;
        }
        if preamble.has(2) {
            ie::read_list(decoder, 1, ie::MAX_NO_OF_QOS_FLOWS, |decoder| {
                let item = Preamble::<1>::read(decoder)?;
                ie::read_ext_integer(decoder, 0, 63)?;
                Cause::decode_aper(decoder)?;
                item.finish(decoder)
            })?;
        }
        preamble.finish(decoder)?;
        Ok(PduSessionResourceSetupResponseTransfer {
            dl_tunnel,
            associated_qfis,
        })
    })
}

/// Parse a PDUSessionResourceSetupUnsuccessfulTransfer
pub fn parse_pdu_session_resource_setup_unsuccessful_transfer(
    raw: &[u8],
) -> NgapResult<PduSessionResourceSetupUnsuccessfulTransfer> {
    ie::decode_with(raw, |decoder| {
        let preamble = Preamble::<2>::read(decoder)?;
        let cause = Cause::decode_aper(decoder)?;
        if preamble.has(0) {
            skip_criticality_diagnostics(decoder)?;
        }
        preamble.finish(decoder)?;
        Ok(PduSessionResourceSetupUnsuccessfulTransfer { cause })
    })
}

/// Skip a CriticalityDiagnostics value; its content is only logged by peers
fn skip_criticality_diagnostics(decoder: &mut AperDecoder) -> NgapResult<()> {
    let preamble = Preamble::<5>::read(decoder)?;
    if preamble.has(0) {
        decoder.decode_constrained_whole_number(&Constraint::new(0, 255))?;
    }
    if preamble.has(1) {
        decoder.decode_enumerated(&Constraint::new(0, 2))?;
    }
    if preamble.has(2) {
        decoder.decode_enumerated(&Constraint::new(0, 2))?;
    }
    if preamble.has(3) {
        ie::read_list(decoder, 1, 256, |decoder| {
            let item = Preamble::<1>::read(decoder)?;
            decoder.decode_enumerated(&Constraint::new(0, 2))?;
            decoder.decode_constrained_whole_number(&Constraint::new(0, 65535))?;
            decoder.decode_enumerated(&Constraint::extensible(0, 1))?;
            item.finish(decoder)
        })?;
    }
    preamble.finish(decoder)
}

/// Parse a PDUSessionResourceReleaseCommandTransfer
pub fn parse_pdu_session_resource_release_command_transfer(
    raw: &[u8],
) -> NgapResult<PduSessionResourceReleaseCommandTransfer> {
    ie::decode_with(raw, |decoder| {
        let preamble = Preamble::<1>::read(decoder)?;
        let cause = Cause::decode_aper(decoder)?;
        preamble.finish(decoder)?;
        Ok(PduSessionResourceReleaseCommandTransfer { cause })
    })
}
