//! NGAP Message Builders
//!
//! Functions for building NGAP PDU messages from high-level types.
//! Each function constructs the IE container, wraps it in the appropriate
//! PDU alternative (InitiatingMessage, SuccessfulOutcome, UnsuccessfulOutcome),
//! and APER-encodes it to bytes.

use ogs_asn1c::ngap::ies::ProtocolIeContainer;
use ogs_asn1c::ngap::pdu::{MessageKind, NgapMessageBody, NgapPdu};
use ogs_asn1c::ngap::types::{Criticality, ProcedureCode, ProtocolIeId};
use ogs_asn1c::per::AperEncode;

use crate::error::NgapResult;
use crate::ie;
use crate::types::*;

/// Wrap a container into an NgapPdu and encode it to APER bytes
fn encode_pdu(
    kind: MessageKind,
    procedure_code: ProcedureCode,
    criticality: Criticality,
    ies: ProtocolIeContainer,
) -> NgapResult<Vec<u8>> {
    let pdu = NgapPdu::new(
        kind,
        NgapMessageBody {
            procedure_code,
            criticality,
            ies,
        },
    );
    Ok(pdu.to_bytes()?)
}

fn transfer_pairs<'a>(items: impl IntoIterator<Item = (u8, &'a Vec<u8>)>) -> Vec<(u8, &'a [u8])> {
    items.into_iter().map(|(id, transfer)| (id, transfer.as_slice())).collect()
}

// ============================================================================
// NG Setup Procedure
// ============================================================================

/// Build an NG Setup Request PDU
pub fn build_ng_setup_request(msg: &NgSetupRequest) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();

    // IE: GlobalRANNodeID (mandatory)
    ie::encode_global_ran_node_id(&mut container, &msg.global_ran_node_id)?;

    // IE: RANNodeName (optional)
    if let Some(ref name) = msg.ran_node_name {
        ie::encode_ran_node_name(&mut container, name)?;
    }

    // IE: SupportedTAList (mandatory)
    ie::encode_supported_ta_list(&mut container, &msg.supported_ta_list)?;

    // IE: DefaultPagingDRX (mandatory)
    ie::encode_default_paging_drx(&mut container, msg.default_paging_drx)?;

    encode_pdu(MessageKind::Initiating, ProcedureCode::NG_SETUP, Criticality::Reject, container)
}

/// Build an NG Setup Response PDU
pub fn build_ng_setup_response(msg: &NgSetupResponse) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    ie::encode_amf_name(&mut container, &msg.amf_name)?;
    ie::encode_served_guami_list(&mut container, &msg.served_guami_list)?;
    ie::encode_relative_amf_capacity(&mut container, msg.relative_amf_capacity)?;
    ie::encode_plmn_support_list(&mut container, &msg.plmn_support_list)?;
    encode_pdu(MessageKind::Successful, ProcedureCode::NG_SETUP, Criticality::Reject, container)
}

/// Build an NG Setup Failure PDU
pub fn build_ng_setup_failure(msg: &NgSetupFailure) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    ie::encode_cause(&mut container, &msg.cause)?;
    if let Some(ttw) = msg.time_to_wait {
        ie::encode_time_to_wait(&mut container, ttw)?;
    }
    encode_pdu(MessageKind::Unsuccessful, ProcedureCode::NG_SETUP, Criticality::Reject, container)
}

// ============================================================================
// NAS Transport Procedures
// ============================================================================

/// Build an Initial UE Message PDU
pub fn build_initial_ue_message(msg: &InitialUeMessage) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();

    // IE: RAN-UE-NGAP-ID (mandatory)
    ie::encode_ran_ue_ngap_id(&mut container, msg.ran_ue_ngap_id, Criticality::Reject)?;

    // IE: NAS-PDU (mandatory)
    ie::encode_nas_pdu(&mut container, &msg.nas_pdu, Criticality::Reject)?;

    // IE: UserLocationInformation (mandatory)
    ie::encode_user_location_information(&mut container, &msg.user_location_info, Criticality::Reject)?;

    // IE: RRCEstablishmentCause (mandatory)
    ie::encode_rrc_establishment_cause(&mut container, msg.rrc_establishment_cause)?;

    // IE: UEContextRequest (optional)
    if msg.ue_context_request {
        ie::encode_ue_context_request(&mut container)?;
    }

    encode_pdu(
        MessageKind::Initiating,
        ProcedureCode::INITIAL_UE_MESSAGE,
        Criticality::Ignore,
        container,
    )
}

/// Build a Downlink NAS Transport PDU
pub fn build_downlink_nas_transport(msg: &DownlinkNasTransport) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    ie::encode_amf_ue_ngap_id(&mut container, msg.amf_ue_ngap_id, Criticality::Reject)?;
    ie::encode_ran_ue_ngap_id(&mut container, msg.ran_ue_ngap_id, Criticality::Reject)?;
    ie::encode_nas_pdu(&mut container, &msg.nas_pdu, Criticality::Reject)?;
    encode_pdu(
        MessageKind::Initiating,
        ProcedureCode::DOWNLINK_NAS_TRANSPORT,
        Criticality::Ignore,
        container,
    )
}

/// Build an Uplink NAS Transport PDU
pub fn build_uplink_nas_transport(msg: &UplinkNasTransport) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    ie::encode_amf_ue_ngap_id(&mut container, msg.amf_ue_ngap_id, Criticality::Reject)?;
    ie::encode_ran_ue_ngap_id(&mut container, msg.ran_ue_ngap_id, Criticality::Reject)?;
    ie::encode_nas_pdu(&mut container, &msg.nas_pdu, Criticality::Reject)?;
    ie::encode_user_location_information(&mut container, &msg.user_location_info, Criticality::Ignore)?;
    encode_pdu(
        MessageKind::Initiating,
        ProcedureCode::UPLINK_NAS_TRANSPORT,
        Criticality::Ignore,
        container,
    )
}

// ============================================================================
// Initial Context Setup Procedure
// ============================================================================

/// Build an Initial Context Setup Request PDU
pub fn build_initial_context_setup_request(msg: &InitialContextSetupRequest) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();

    // IE: AMF-UE-NGAP-ID (mandatory)
    ie::encode_amf_ue_ngap_id(&mut container, msg.amf_ue_ngap_id, Criticality::Reject)?;

    // IE: RAN-UE-NGAP-ID (mandatory)
    ie::encode_ran_ue_ngap_id(&mut container, msg.ran_ue_ngap_id, Criticality::Reject)?;

    // IE: UEAggregateMaximumBitRate (conditional)
    if let Some(ref ambr) = msg.ue_ambr {
        ie::encode_ue_ambr(&mut container, ambr, Criticality::Reject)?;
    }

    // IE: GUAMI (mandatory)
    ie::encode_guami(&mut container, &msg.guami)?;

    // IE: PDUSessionResourceSetupListCxtReq (optional)
    if !msg.pdu_session_list.is_empty() {
        ie::encode_pdu_session_setup_list(
            &mut container,
            ProtocolIeId::PDU_SESSION_RESOURCE_SETUP_LIST_CXT_REQ,
            &msg.pdu_session_list,
        )?;
    }

    // IE: AllowedNSSAI (mandatory)
    ie::encode_allowed_nssai(&mut container, &msg.allowed_nssai)?;

    // IE: UESecurityCapabilities (mandatory)
    ie::encode_ue_security_capabilities(&mut container, &msg.ue_security_capabilities)?;

    // IE: SecurityKey (mandatory)
    ie::encode_security_key(&mut container, &msg.security_key)?;

    // IE: NAS-PDU (optional)
    if let Some(ref nas) = msg.nas_pdu {
        ie::encode_nas_pdu(&mut container, nas, Criticality::Ignore)?;
    }

    encode_pdu(
        MessageKind::Initiating,
        ProcedureCode::INITIAL_CONTEXT_SETUP,
        Criticality::Reject,
        container,
    )
}

/// Build an Initial Context Setup Response PDU
pub fn build_initial_context_setup_response(msg: &InitialContextSetupResponse) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    ie::encode_amf_ue_ngap_id(&mut container, msg.amf_ue_ngap_id, Criticality::Ignore)?;
    ie::encode_ran_ue_ngap_id(&mut container, msg.ran_ue_ngap_id, Criticality::Ignore)?;

    if !msg.setup_list.is_empty() {
        let items = transfer_pairs(msg.setup_list.iter().map(|i| (i.pdu_session_id, &i.transfer)));
        ie::encode_pdu_session_transfer_list(
            &mut container,
            ProtocolIeId::PDU_SESSION_RESOURCE_SETUP_LIST_CXT_RES,
            Criticality::Ignore,
            &items,
        )?;
    }
    if !msg.failed_list.is_empty() {
        let items = transfer_pairs(msg.failed_list.iter().map(|i| (i.pdu_session_id, &i.transfer)));
        ie::encode_pdu_session_transfer_list(
            &mut container,
            ProtocolIeId::PDU_SESSION_RESOURCE_FAILED_TO_SETUP_LIST_CXT_RES,
            Criticality::Ignore,
            &items,
        )?;
    }

    encode_pdu(
        MessageKind::Successful,
        ProcedureCode::INITIAL_CONTEXT_SETUP,
        Criticality::Reject,
        container,
    )
}

/// Build an Initial Context Setup Failure PDU
pub fn build_initial_context_setup_failure(msg: &InitialContextSetupFailure) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    ie::encode_amf_ue_ngap_id(&mut container, msg.amf_ue_ngap_id, Criticality::Ignore)?;
    ie::encode_ran_ue_ngap_id(&mut container, msg.ran_ue_ngap_id, Criticality::Ignore)?;
    if !msg.failed_list.is_empty() {
        let items = transfer_pairs(msg.failed_list.iter().map(|i| (i.pdu_session_id, &i.transfer)));
        ie::encode_pdu_session_transfer_list(
            &mut container,
            ProtocolIeId::PDU_SESSION_RESOURCE_FAILED_TO_SETUP_LIST_CXT_FAIL,
            Criticality::Ignore,
            &items,
        )?;
    }
    ie::encode_cause(&mut container, &msg.cause)?;
    encode_pdu(
        MessageKind::Unsuccessful,
        ProcedureCode::INITIAL_CONTEXT_SETUP,
        Criticality::Reject,
        container,
    )
}

// ============================================================================
// PDU Session Resource Procedures
// ============================================================================

/// Build a PDU Session Resource Setup Request PDU
pub fn build_pdu_session_resource_setup_request(msg: &PduSessionResourceSetupRequest) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    ie::encode_amf_ue_ngap_id(&mut container, msg.amf_ue_ngap_id, Criticality::Reject)?;
    ie::encode_ran_ue_ngap_id(&mut container, msg.ran_ue_ngap_id, Criticality::Reject)?;
    if let Some(ref nas) = msg.nas_pdu {
        ie::encode_nas_pdu(&mut container, nas, Criticality::Reject)?;
    }
    ie::encode_pdu_session_setup_list(
        &mut container,
        ProtocolIeId::PDU_SESSION_RESOURCE_SETUP_LIST_SU_REQ,
        &msg.setup_list,
    )?;
    if let Some(ref ambr) = msg.ue_ambr {
        ie::encode_ue_ambr(&mut container, ambr, Criticality::Ignore)?;
    }
    encode_pdu(
        MessageKind::Initiating,
        ProcedureCode::PDU_SESSION_RESOURCE_SETUP,
        Criticality::Reject,
        container,
    )
}

/// Build a PDU Session Resource Setup Response PDU
pub fn build_pdu_session_resource_setup_response(msg: &PduSessionResourceSetupResponse) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    ie::encode_amf_ue_ngap_id(&mut container, msg.amf_ue_ngap_id, Criticality::Ignore)?;
    ie::encode_ran_ue_ngap_id(&mut container, msg.ran_ue_ngap_id, Criticality::Ignore)?;
    if !msg.setup_list.is_empty() {
        let items = transfer_pairs(msg.setup_list.iter().map(|i| (i.pdu_session_id, &i.transfer)));
        ie::encode_pdu_session_transfer_list(
            &mut container,
            ProtocolIeId::PDU_SESSION_RESOURCE_SETUP_LIST_SU_RES,
            Criticality::Ignore,
            &items,
        )?;
    }
    if !msg.failed_list.is_empty() {
        let items = transfer_pairs(msg.failed_list.iter().map(|i| (i.pdu_session_id, &i.transfer)));
        ie::encode_pdu_session_transfer_list(
            &mut container,
            ProtocolIeId::PDU_SESSION_RESOURCE_FAILED_TO_SETUP_LIST_SU_RES,
            Criticality::Ignore,
            &items,
        )?;
    }
    encode_pdu(
        MessageKind::Successful,
        ProcedureCode::PDU_SESSION_RESOURCE_SETUP,
        Criticality::Reject,
        container,
    )
}

/// Build a PDU Session Resource Release Command PDU
pub fn build_pdu_session_resource_release_command(msg: &PduSessionResourceReleaseCommand) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    ie::encode_amf_ue_ngap_id(&mut container, msg.amf_ue_ngap_id, Criticality::Reject)?;
    ie::encode_ran_ue_ngap_id(&mut container, msg.ran_ue_ngap_id, Criticality::Reject)?;
    if let Some(ref nas) = msg.nas_pdu {
        ie::encode_nas_pdu(&mut container, nas, Criticality::Ignore)?;
    }
    let items = transfer_pairs(msg.release_list.iter().map(|i| (i.pdu_session_id, &i.transfer)));
    ie::encode_pdu_session_transfer_list(
        &mut container,
        ProtocolIeId::PDU_SESSION_RESOURCE_TO_RELEASE_LIST_REL_CMD,
        Criticality::Reject,
        &items,
    )?;
    encode_pdu(
        MessageKind::Initiating,
        ProcedureCode::PDU_SESSION_RESOURCE_RELEASE,
        Criticality::Reject,
        container,
    )
}

/// Build a PDU Session Resource Release Response PDU
pub fn build_pdu_session_resource_release_response(msg: &PduSessionResourceReleaseResponse) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    ie::encode_amf_ue_ngap_id(&mut container, msg.amf_ue_ngap_id, Criticality::Ignore)?;
    ie::encode_ran_ue_ngap_id(&mut container, msg.ran_ue_ngap_id, Criticality::Ignore)?;
    let items = transfer_pairs(msg.released_list.iter().map(|i| (i.pdu_session_id, &i.transfer)));
    ie::encode_pdu_session_transfer_list(
        &mut container,
        ProtocolIeId::PDU_SESSION_RESOURCE_RELEASED_LIST_REL_RES,
        Criticality::Ignore,
        &items,
    )?;
    encode_pdu(
        MessageKind::Successful,
        ProcedureCode::PDU_SESSION_RESOURCE_RELEASE,
        Criticality::Reject,
        container,
    )
}

// ============================================================================
// UE Context Release Procedures
// ============================================================================

/// Build a UE Context Release Request PDU
pub fn build_ue_context_release_request(msg: &UeContextReleaseRequest) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    ie::encode_amf_ue_ngap_id(&mut container, msg.amf_ue_ngap_id, Criticality::Reject)?;
    ie::encode_ran_ue_ngap_id(&mut container, msg.ran_ue_ngap_id, Criticality::Reject)?;
    if !msg.pdu_session_ids.is_empty() {
        ie::encode_pdu_session_list_cxt_rel_req(&mut container, &msg.pdu_session_ids)?;
    }
    ie::encode_cause(&mut container, &msg.cause)?;
    encode_pdu(
        MessageKind::Initiating,
        ProcedureCode::UE_CONTEXT_RELEASE_REQUEST,
        Criticality::Ignore,
        container,
    )
}

/// Build a UE Context Release Command PDU
pub fn build_ue_context_release_command(msg: &UeContextReleaseCommand) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    ie::encode_ue_ngap_ids(&mut container, &msg.ue_ngap_ids)?;
    ie::encode_cause(&mut container, &msg.cause)?;
    encode_pdu(
        MessageKind::Initiating,
        ProcedureCode::UE_CONTEXT_RELEASE,
        Criticality::Reject,
        container,
    )
}

/// Build a UE Context Release Complete PDU
pub fn build_ue_context_release_complete(msg: &UeContextReleaseComplete) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    ie::encode_amf_ue_ngap_id(&mut container, msg.amf_ue_ngap_id, Criticality::Ignore)?;
    ie::encode_ran_ue_ngap_id(&mut container, msg.ran_ue_ngap_id, Criticality::Ignore)?;
    encode_pdu(
        MessageKind::Successful,
        ProcedureCode::UE_CONTEXT_RELEASE,
        Criticality::Reject,
        container,
    )
}

// ============================================================================
// Interface Management Procedures
// ============================================================================

/// Build an NG Reset PDU
pub fn build_ng_reset(msg: &NgReset) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    ie::encode_cause(&mut container, &msg.cause)?;
    ie::encode_reset_type(&mut container, &msg.reset_type)?;
    encode_pdu(MessageKind::Initiating, ProcedureCode::NG_RESET, Criticality::Reject, container)
}

/// Build an NG Reset Acknowledge PDU
pub fn build_ng_reset_acknowledge(msg: &NgResetAcknowledge) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    if !msg.connection_list.is_empty() {
        ie::encode_connection_list(&mut container, &msg.connection_list)?;
    }
    encode_pdu(MessageKind::Successful, ProcedureCode::NG_RESET, Criticality::Reject, container)
}

/// Build an Error Indication PDU
pub fn build_error_indication(msg: &ErrorIndication) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    if let Some(id) = msg.amf_ue_ngap_id {
        ie::encode_amf_ue_ngap_id(&mut container, id, Criticality::Ignore)?;
    }
    if let Some(id) = msg.ran_ue_ngap_id {
        ie::encode_ran_ue_ngap_id(&mut container, id, Criticality::Ignore)?;
    }
    if let Some(ref cause) = msg.cause {
        ie::encode_cause(&mut container, cause)?;
    }
    encode_pdu(
        MessageKind::Initiating,
        ProcedureCode::ERROR_INDICATION,
        Criticality::Ignore,
        container,
    )
}

/// Build an AMF Configuration Update PDU
pub fn build_amf_configuration_update(msg: &AmfConfigurationUpdate) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    if let Some(ref name) = msg.amf_name {
        ie::encode_amf_name(&mut container, name)?;
    }
    if let Some(ref list) = msg.served_guami_list {
        ie::encode_served_guami_list(&mut container, list)?;
    }
    if let Some(capacity) = msg.relative_amf_capacity {
        ie::encode_relative_amf_capacity(&mut container, capacity)?;
    }
    if let Some(ref list) = msg.plmn_support_list {
        ie::encode_plmn_support_list(&mut container, list)?;
    }
    encode_pdu(
        MessageKind::Initiating,
        ProcedureCode::AMF_CONFIGURATION_UPDATE,
        Criticality::Reject,
        container,
    )
}

/// Build an AMF Configuration Update Acknowledge PDU
pub fn build_amf_configuration_update_acknowledge(_msg: &AmfConfigurationUpdateAcknowledge) -> NgapResult<Vec<u8>> {
    encode_pdu(
        MessageKind::Successful,
        ProcedureCode::AMF_CONFIGURATION_UPDATE,
        Criticality::Reject,
        ProtocolIeContainer::new(),
    )
}

/// Build an AMF Configuration Update Failure PDU
pub fn build_amf_configuration_update_failure(msg: &AmfConfigurationUpdateFailure) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    ie::encode_cause(&mut container, &msg.cause)?;
    if let Some(ttw) = msg.time_to_wait {
        ie::encode_time_to_wait(&mut container, ttw)?;
    }
    encode_pdu(
        MessageKind::Unsuccessful,
        ProcedureCode::AMF_CONFIGURATION_UPDATE,
        Criticality::Reject,
        container,
    )
}

/// Build an Overload Start PDU
pub fn build_overload_start(msg: &OverloadStart) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    if let Some(action) = msg.overload_action {
        ie::encode_amf_overload_response(&mut container, action)?;
    }
    if let Some(percent) = msg.traffic_load_reduction {
        ie::encode_traffic_load_reduction(&mut container, percent)?;
    }
    encode_pdu(
        MessageKind::Initiating,
        ProcedureCode::OVERLOAD_START,
        Criticality::Ignore,
        container,
    )
}

/// Build an Overload Stop PDU
pub fn build_overload_stop() -> NgapResult<Vec<u8>> {
    encode_pdu(
        MessageKind::Initiating,
        ProcedureCode::OVERLOAD_STOP,
        Criticality::Reject,
        ProtocolIeContainer::new(),
    )
}

// ============================================================================
// PDU Session Transfers (OCTET STRING CONTAINING payloads)
// ============================================================================

/// Build a PDUSessionResourceSetupRequestTransfer
pub fn build_pdu_session_resource_setup_request_transfer(
    msg: &PduSessionResourceSetupRequestTransfer,
) -> NgapResult<Vec<u8>> {
    let mut container = ProtocolIeContainer::new();
    if let Some(ref ambr) = msg.session_ambr {
        ie::encode_pdu_session_ambr(&mut container, ambr)?;
    }
    if let Some(ref tunnel) = msg.ul_ngu_up_tnl_info {
        ie::encode_ul_ngu_up_tnl_information(&mut container, tunnel)?;
    }
    ie::encode_pdu_session_type(&mut container, msg.pdu_session_type)?;
    if let Some(ref indication) = msg.security_indication {
        ie::encode_security_indication(&mut container, indication)?;
    }
    if let Some(instance) = msg.network_instance {
        ie::encode_network_instance(&mut container, instance)?;
    }
    ie::encode_qos_flow_setup_request_list(&mut container, &msg.qos_flow_setup_list)?;

    // SEQUENCE { protocolIEs, ... }
    ie::encode_with(|encoder| {
        encoder.write_bit(false);
        Ok(container.encode_aper(encoder)?)
    })
}

/// Build a PDUSessionResourceSetupResponseTransfer
pub fn build_pdu_session_resource_setup_response_transfer(
    msg: &PduSessionResourceSetupResponseTransfer,
) -> NgapResult<Vec<u8>> {
    ie::encode_with(|encoder| {
        // additionalDLQosFlowPerTNLInformation, securityResult, qosFlowFailedToSetupList, iE-Extensions
        ie::write_preamble(encoder, &[false, false, false, false]);
        ie::write_qos_flow_per_tnl_information(encoder, &msg.dl_tunnel, &msg.associated_qfis)
    })
}

/// Build a PDUSessionResourceSetupUnsuccessfulTransfer
pub fn build_pdu_session_resource_setup_unsuccessful_transfer(
    msg: &PduSessionResourceSetupUnsuccessfulTransfer,
) -> NgapResult<Vec<u8>> {
    ie::encode_with(|encoder| {
        // criticalityDiagnostics, iE-Extensions
        ie::write_preamble(encoder, &[false, false]);
        Ok(msg.cause.encode_aper(encoder)?)
    })
}

/// Build a PDUSessionResourceReleaseCommandTransfer
pub fn build_pdu_session_resource_release_command_transfer(
    msg: &PduSessionResourceReleaseCommandTransfer,
) -> NgapResult<Vec<u8>> {
    ie::encode_with(|encoder| {
        ie::write_preamble(encoder, &[false]);
        Ok(msg.cause.encode_aper(encoder)?)
    })
}

/// Build an (empty) PDUSessionResourceReleaseResponseTransfer
pub fn build_pdu_session_resource_release_response_transfer() -> NgapResult<Vec<u8>> {
    ie::encode_with(|encoder| {
        ie::write_preamble(encoder, &[false]);
        Ok(())
    })
}
