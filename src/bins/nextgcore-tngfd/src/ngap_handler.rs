//! NGAP Message Handlers
//!
//! Decodes a PDU received from an AMF and dispatches it by message kind.
//! Handlers run synchronously on the association's receive task; the only
//! deferred work is the NG Setup re-initiation timer.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use ogs_asn1c::ngap::cause::{Cause, CauseProtocol, CauseRadioNetwork, CauseTransport};
use ogs_asn1c::ngap::pdu::{MessageKind, NgapPdu};
use ogs_asn1c::ngap::types::{ProcedureCode, ProtocolIeId};
use ogs_gtp::GTPV1_U_UDP_PORT;
use ogs_ngap::parser::{decode_ngap_pdu_raw, parse_pdu_session_resource_setup_request_transfer};
use ogs_ngap::{
    ie, AmfConfigurationUpdate, DownlinkNasTransport, ErrorIndication, InitialContextSetupRequest, NgReset,
    NgSetupFailure, NgSetupResponse, NgapError, NgapMessage, OverloadStart, PduSessionResourceReleaseCommand,
    PduSessionResourceSetupRequest, PduSessionSetupItem, ProtectionIndication, ResetType, UeContextReleaseCommand,
    UeNgapIds,
};

use crate::context::{
    lock, GatewayContext, GtpConnectionInfo, PduSetupProcedure, PendingPduSetup, SharedUe, TngfError, UeSession,
    AMF_UE_NGAP_ID_UNSPECIFIED,
};
use crate::ike_handler;
use crate::ngap_build;
use crate::radius_handler;

/// Decode one NGAP PDU from `amf_addr` and run its handler
pub fn dispatch(ctx: &Arc<GatewayContext>, amf_addr: SocketAddr, data: &[u8]) {
    let pdu = match NgapPdu::from_bytes(data) {
        Ok(pdu) => pdu,
        Err(e) => {
            log::warn!("[{}] NGAP decode failed: {}", amf_addr, e);
            return;
        }
    };
    let message = match decode_ngap_pdu_raw(pdu.clone()) {
        Ok(message) => message,
        Err(NgapError::MissingMandatoryIe { ie_name, ie_id }) => {
            log::warn!("[{}] Missing mandatory IE {} (id={})", amf_addr, ie_name, ie_id);
            handle_missing_mandatory_ie(ctx, amf_addr, &pdu);
            return;
        }
        Err(e) => {
            log::warn!("[{}] NGAP message decode failed: {}", amf_addr, e);
            return;
        }
    };
    log::debug!("[{}] Receive {}", amf_addr, message.name());

    match message {
        NgapMessage::NgSetupResponse(msg) => handle_ng_setup_response(ctx, amf_addr, msg),
        NgapMessage::NgSetupFailure(msg) => handle_ng_setup_failure(ctx, amf_addr, msg),
        NgapMessage::NgReset(msg) => handle_ng_reset(ctx, amf_addr, msg),
        NgapMessage::NgResetAcknowledge(_) => log::info!("[{}] NG Reset acknowledged", amf_addr),
        NgapMessage::InitialContextSetupRequest(msg) => handle_initial_context_setup_request(ctx, amf_addr, msg),
        NgapMessage::DownlinkNasTransport(msg) => handle_downlink_nas_transport(ctx, amf_addr, msg),
        NgapMessage::PduSessionResourceSetupRequest(msg) => {
            handle_pdu_session_resource_setup_request(ctx, amf_addr, msg)
        }
        NgapMessage::PduSessionResourceReleaseCommand(msg) => {
            handle_pdu_session_resource_release_command(ctx, amf_addr, msg)
        }
        NgapMessage::UeContextReleaseCommand(msg) => handle_ue_context_release_command(ctx, amf_addr, msg),
        NgapMessage::ErrorIndication(msg) => handle_error_indication(amf_addr, msg),
        NgapMessage::AmfConfigurationUpdate(msg) => handle_amf_configuration_update(ctx, amf_addr, msg),
        NgapMessage::OverloadStart(msg) => handle_overload_start(ctx, amf_addr, msg),
        NgapMessage::OverloadStop => handle_overload_stop(ctx, amf_addr),
        NgapMessage::Other { procedure_code, kind } => handle_other(amf_addr, ProcedureCode(procedure_code), kind),
        other => log::warn!("[{}] Unexpected {} from AMF", amf_addr, other.name()),
    }
}

/// A PDU whose mandatory IE is absent still gets a protocol answer when the
/// procedure has one
fn handle_missing_mandatory_ie(ctx: &GatewayContext, amf_addr: SocketAddr, pdu: &NgapPdu) {
    let cause = Cause::Protocol(CauseProtocol::AbstractSyntaxErrorFalselyConstructedMessage);
    let ies = &pdu.body().ies;
    let amf_ue_ngap_id = ies
        .find(ProtocolIeId::AMF_UE_NGAP_ID)
        .and_then(|field| ie::decode_amf_ue_ngap_id(field).ok());
    let ran_ue_ngap_id = ies
        .find(ProtocolIeId::RAN_UE_NGAP_ID)
        .and_then(|field| ie::decode_ran_ue_ngap_id(field).ok());

    match (pdu.kind(), pdu.procedure_code()) {
        (MessageKind::Successful, ProcedureCode::NG_SETUP) => {
            ngap_build::send_error_indication(ctx, amf_addr, None, None, cause);
        }
        (MessageKind::Initiating, ProcedureCode::INITIAL_CONTEXT_SETUP) => match (amf_ue_ngap_id, ran_ue_ngap_id) {
            (Some(amf_id), Some(ran_id)) => {
                ngap_build::send_initial_context_setup_failure(ctx, amf_addr, amf_id, ran_id, Vec::new(), cause);
            }
            (amf_id, ran_id) => ngap_build::send_error_indication(ctx, amf_addr, amf_id, ran_id, cause),
        },
        (kind, code) => {
            log::warn!("[{}] Dropped {:?} message, procedure code {}", amf_addr, kind, code.0);
        }
    }
}

// ============================================================================
// Interface management
// ============================================================================

fn handle_ng_setup_response(ctx: &GatewayContext, amf_addr: SocketAddr, msg: NgSetupResponse) {
    if msg.served_guami_list.is_empty() || msg.plmn_support_list.is_empty() {
        log::error!("[{}] NGSetupResponse without GUAMI or PLMN support", amf_addr);
        let cause = Cause::Protocol(CauseProtocol::AbstractSyntaxErrorFalselyConstructedMessage);
        ngap_build::send_error_indication(ctx, amf_addr, None, None, cause);
        return;
    }
    let Some(amf) = ctx.amf_by_addr(&amf_addr) else {
        log::error!("[{}] NGSetupResponse from unknown AMF", amf_addr);
        return;
    };
    let mut amf = lock(&amf);
    log::info!(
        "[{}] NG Setup complete: {} (capacity {}, {} GUAMI)",
        amf_addr,
        msg.amf_name,
        msg.relative_amf_capacity,
        msg.served_guami_list.len()
    );
    amf.name = Some(msg.amf_name);
    amf.served_guami_list = msg.served_guami_list;
    amf.relative_capacity = msg.relative_amf_capacity;
    amf.plmn_support_list = msg.plmn_support_list;
}

fn handle_ng_setup_failure(ctx: &Arc<GatewayContext>, amf_addr: SocketAddr, msg: NgSetupFailure) {
    log::error!("[{}] NG Setup rejected: {:?}", amf_addr, msg.cause);
    let Some(time_to_wait) = msg.time_to_wait else {
        return;
    };
    if !ctx.ng_setup_reinitiation_available(&amf_addr) {
        log::warn!("[{}] NG Setup re-initiation already scheduled", amf_addr);
        return;
    }

    ctx.set_ng_setup_reinitiation_available(amf_addr, false);
    let wait = Duration::from_secs(time_to_wait.seconds());
    log::info!("[{}] Retrying NG Setup in {:?}", amf_addr, wait);
    let ctx = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(wait).await;
        ctx.set_ng_setup_reinitiation_available(amf_addr, true);
        ngap_build::send_ng_setup_request(&ctx, amf_addr);
    });
}

fn handle_ng_reset(ctx: &GatewayContext, amf_addr: SocketAddr, msg: NgReset) {
    log::info!("[{}] NG Reset: {:?}", amf_addr, msg.cause);
    let acknowledged = match msg.reset_type {
        ResetType::NgInterface => {
            for ran_ue_ngap_id in ctx.ues_of_amf(&amf_addr) {
                ctx.remove_ue(ran_ue_ngap_id);
            }
            Vec::new()
        }
        ResetType::PartOfNgInterface(connections) => {
            for connection in &connections {
                let ue = connection
                    .ran_ue_ngap_id
                    .and_then(|id| ctx.ue_by_ran_id(id))
                    .or_else(|| connection.amf_ue_ngap_id.and_then(|id| ctx.ue_by_amf_ue_id(id)));
                match ue {
                    Some(ue) => {
                        let ran_ue_ngap_id = lock(&ue).ran_ue_ngap_id;
                        ctx.remove_ue(ran_ue_ngap_id);
                    }
                    None => log::warn!("[{}] NG Reset for unknown UE {:?}", amf_addr, connection),
                }
            }
            connections
        }
    };
    ngap_build::send_ng_reset_acknowledge(ctx, amf_addr, acknowledged);
}

fn handle_error_indication(amf_addr: SocketAddr, msg: ErrorIndication) {
    log::warn!(
        "[{}] Error Indication (amf_ue_ngap_id={:?}, ran_ue_ngap_id={:?}): {:?}",
        amf_addr,
        msg.amf_ue_ngap_id,
        msg.ran_ue_ngap_id,
        msg.cause
    );
}

fn handle_amf_configuration_update(ctx: &GatewayContext, amf_addr: SocketAddr, msg: AmfConfigurationUpdate) {
    let Some(amf) = ctx.amf_by_addr(&amf_addr) else {
        log::error!("[{}] AMFConfigurationUpdate from unknown AMF", amf_addr);
        return;
    };
    {
        let mut amf = lock(&amf);
        if let Some(name) = msg.amf_name {
            amf.name = Some(name);
        }
        if let Some(list) = msg.served_guami_list {
            amf.served_guami_list = list;
        }
        if let Some(capacity) = msg.relative_amf_capacity {
            amf.relative_capacity = capacity;
        }
        if let Some(list) = msg.plmn_support_list {
            amf.plmn_support_list = list;
        }
    }
    ngap_build::send_amf_configuration_update_acknowledge(ctx, amf_addr);
}

fn handle_overload_start(ctx: &GatewayContext, amf_addr: SocketAddr, msg: OverloadStart) {
    let Some(amf) = ctx.amf_by_addr(&amf_addr) else {
        return;
    };
    log::warn!("[{}] AMF overloaded: {:?}", amf_addr, msg.overload_action);
    let mut amf = lock(&amf);
    amf.overload_action = msg.overload_action;
    amf.traffic_load_reduction = msg.traffic_load_reduction;
}

fn handle_overload_stop(ctx: &GatewayContext, amf_addr: SocketAddr) {
    let Some(amf) = ctx.amf_by_addr(&amf_addr) else {
        return;
    };
    log::info!("[{}] AMF overload cleared", amf_addr);
    let mut amf = lock(&amf);
    amf.overload_action = None;
    amf.traffic_load_reduction = None;
}

fn handle_other(amf_addr: SocketAddr, code: ProcedureCode, kind: MessageKind) {
    match code {
        ProcedureCode::UE_CONTEXT_MODIFICATION
        | ProcedureCode::PDU_SESSION_RESOURCE_MODIFY
        | ProcedureCode::UE_RADIO_CAPABILITY_CHECK
        | ProcedureCode::RAN_CONFIGURATION_UPDATE
        | ProcedureCode::DOWNLINK_RAN_CONFIGURATION_TRANSFER
        | ProcedureCode::DOWNLINK_RAN_STATUS_TRANSFER
        | ProcedureCode::AMF_STATUS_INDICATION
        | ProcedureCode::LOCATION_REPORTING_CONTROL
        | ProcedureCode::UE_TNLA_BINDING_RELEASE
        | ProcedureCode::PAGING => {
            log::info!("[{}] Procedure {} ({:?}) not implemented", amf_addr, code.0, kind);
        }
        _ => log::warn!("[{}] Unknown procedure code {} ({:?})", amf_addr, code.0, kind),
    }
}

// ============================================================================
// UE-associated
// ============================================================================

/// UE of a UE-associated message, or an Error Indication to the AMF
fn find_ue(ctx: &GatewayContext, amf_addr: SocketAddr, amf_ue_ngap_id: u64, ran_ue_ngap_id: u32) -> Option<SharedUe> {
    let ue = ctx.ue_by_ran_id(ran_ue_ngap_id);
    if ue.is_none() {
        log::error!("[{}] Unknown RAN-UE-NGAP-ID {}", amf_addr, ran_ue_ngap_id);
        ngap_build::send_error_indication(
            ctx,
            amf_addr,
            Some(amf_ue_ngap_id),
            Some(ran_ue_ngap_id),
            Cause::RadioNetwork(CauseRadioNetwork::UnknownLocalUeNgapId),
        );
    }
    ue
}

/// Take the AMF-UE-NGAP-ID the AMF assigned and bind the UE to that AMF
fn adopt_amf_ue_id(ctx: &GatewayContext, ue: &mut UeSession, amf_addr: SocketAddr, amf_ue_ngap_id: u64) {
    if ue.amf_ue_ngap_id != AMF_UE_NGAP_ID_UNSPECIFIED && ue.amf_ue_ngap_id != amf_ue_ngap_id {
        log::warn!(
            "[ran_ue_ngap_id={}] AMF-UE-NGAP-ID changed {} -> {}",
            ue.ran_ue_ngap_id,
            ue.amf_ue_ngap_id,
            amf_ue_ngap_id
        );
    }
    ue.amf_ue_ngap_id = amf_ue_ngap_id;
    if ue.amf_addr != Some(amf_addr) {
        if let Err(e) = ctx.attach_ue_to_amf(ue, amf_addr) {
            log::error!("[ran_ue_ngap_id={}] {}", ue.ran_ue_ngap_id, e);
        }
    }
}

fn handle_downlink_nas_transport(ctx: &GatewayContext, amf_addr: SocketAddr, msg: DownlinkNasTransport) {
    let Some(shared) = find_ue(ctx, amf_addr, msg.amf_ue_ngap_id, msg.ran_ue_ngap_id) else {
        return;
    };
    let mut ue = lock(&shared);
    adopt_amf_ue_id(ctx, &mut ue, amf_addr, msg.amf_ue_ngap_id);

    if ue.ike_established {
        ue.deliver_nas(Bytes::from(msg.nas_pdu));
    } else {
        radius_handler::send_nas_challenge(ctx, &ue, &msg.nas_pdu);
    }
}

/// Register the PDU sessions of a setup list and queue them for Child SA
/// creation. Rejected items land in the failed list.
fn setup_pdu_sessions(ctx: &GatewayContext, ue: &mut UeSession, items: &[PduSessionSetupItem], pending: &mut PendingPduSetup) {
    for item in items {
        match setup_pdu_session(ctx, ue, item) {
            Ok(()) => pending.queue.push_back(item.pdu_session_id),
            Err(cause) => {
                log::warn!(
                    "[ran_ue_ngap_id={}] PDU session {} rejected: {:?}",
                    ue.ran_ue_ngap_id,
                    item.pdu_session_id,
                    cause
                );
                pending.failed_list.push(ngap_build::failed_item(item.pdu_session_id, cause));
            }
        }
    }
}

fn setup_pdu_session(ctx: &GatewayContext, ue: &mut UeSession, item: &PduSessionSetupItem) -> Result<(), Cause> {
    let transfer = parse_pdu_session_resource_setup_request_transfer(&item.transfer).map_err(|e| {
        log::error!("PDUSessionResourceSetupRequestTransfer decode failed: {}", e);
        match e {
            NgapError::MissingMandatoryIe { .. } => {
                Cause::Protocol(CauseProtocol::AbstractSyntaxErrorFalselyConstructedMessage)
            }
            _ => Cause::Protocol(CauseProtocol::TransferSyntaxError),
        }
    })?;
    let tunnel = transfer
        .ul_ngu_up_tnl_info
        .ok_or(Cause::Protocol(CauseProtocol::AbstractSyntaxErrorReject))?;

    let teid = ctx.allocate_teid(ue.ran_ue_ngap_id).map_err(|e| {
        log::error!("{}", e);
        Cause::Transport(CauseTransport::TransportResourceUnavailable)
    })?;
    let session = match ue.create_pdu_session(item.pdu_session_id, item.s_nssai) {
        Ok(session) => session,
        Err(e) => {
            ctx.release_teid(teid);
            return Err(match e {
                TngfError::DuplicatePduSession(_) => {
                    Cause::RadioNetwork(CauseRadioNetwork::MultiplePduSessionIdInstances)
                }
                _ => Cause::Protocol(CauseProtocol::SemanticError),
            });
        }
    };

    session.ambr = transfer.session_ambr;
    session.pdu_session_type = transfer.pdu_session_type;
    session.qfis = transfer.qos_flow_setup_list.iter().map(|flow| flow.qfi).collect();
    session.integrity_required = transfer
        .security_indication
        .map_or(true, |indication| indication.integrity_protection != ProtectionIndication::NotNeeded);
    session.gtp = Some(GtpConnectionInfo {
        upf_address: SocketAddr::new(IpAddr::V4(tunnel.address), GTPV1_U_UDP_PORT),
        incoming_teid: teid,
        outgoing_teid: tunnel.teid,
    });
    session.nas_pdu = item.nas_pdu.clone().map(Bytes::from);
    Ok(())
}

fn handle_initial_context_setup_request(ctx: &GatewayContext, amf_addr: SocketAddr, msg: InitialContextSetupRequest) {
    let Some(shared) = ctx.ue_by_ran_id(msg.ran_ue_ngap_id) else {
        log::error!("[{}] ICS for unknown RAN-UE-NGAP-ID {}", amf_addr, msg.ran_ue_ngap_id);
        let cause = Cause::RadioNetwork(CauseRadioNetwork::UnknownLocalUeNgapId);
        let failed = msg
            .pdu_session_list
            .iter()
            .map(|item| ngap_build::failed_item(item.pdu_session_id, cause))
            .collect();
        ngap_build::send_initial_context_setup_failure(
            ctx,
            amf_addr,
            msg.amf_ue_ngap_id,
            msg.ran_ue_ngap_id,
            failed,
            cause,
        );
        return;
    };
    let mut ue = lock(&shared);
    adopt_amf_ue_id(ctx, &mut ue, amf_addr, msg.amf_ue_ngap_id);

    ue.ue_ambr = msg.ue_ambr;
    ue.guami = Some(msg.guami);
    ue.allowed_nssai = msg.allowed_nssai;
    ue.security_capabilities = Some(msg.ue_security_capabilities);
    ue.ktngf = Some(msg.security_key);

    let mut pending = PendingPduSetup::new(PduSetupProcedure::InitialContextSetup);
    setup_pdu_sessions(ctx, &mut ue, &msg.pdu_session_list, &mut pending);
    ue.pdu_setup = Some(pending);

    if let Some(nas) = msg.nas_pdu {
        ue.deliver_nas(Bytes::from(nas));
    }

    if ue.ike_established {
        ike_handler::continue_pdu_setup(ctx, &mut ue);
    } else {
        radius_handler::send_notification_challenge(ctx, &ue);
    }
}

fn handle_pdu_session_resource_setup_request(
    ctx: &GatewayContext,
    amf_addr: SocketAddr,
    msg: PduSessionResourceSetupRequest,
) {
    let Some(shared) = find_ue(ctx, amf_addr, msg.amf_ue_ngap_id, msg.ran_ue_ngap_id) else {
        return;
    };
    let mut ue = lock(&shared);
    adopt_amf_ue_id(ctx, &mut ue, amf_addr, msg.amf_ue_ngap_id);
    if msg.ue_ambr.is_some() {
        ue.ue_ambr = msg.ue_ambr;
    }

    if ue.pdu_setup.is_some() || !ue.ike_established {
        log::error!(
            "[ran_ue_ngap_id={}] Cannot set up PDU sessions now (IKE SA established: {})",
            ue.ran_ue_ngap_id,
            ue.ike_established
        );
        let cause = Cause::RadioNetwork(CauseRadioNetwork::Unspecified);
        let failed = msg
            .setup_list
            .iter()
            .map(|item| ngap_build::failed_item(item.pdu_session_id, cause))
            .collect();
        ngap_build::send_pdu_session_resource_setup_response(ctx, &ue, Vec::new(), failed);
        return;
    }

    let mut pending = PendingPduSetup::new(PduSetupProcedure::PduSessionResourceSetup);
    setup_pdu_sessions(ctx, &mut ue, &msg.setup_list, &mut pending);
    ue.pdu_setup = Some(pending);

    if let Some(nas) = msg.nas_pdu {
        ue.deliver_nas(Bytes::from(nas));
    }
    ike_handler::continue_pdu_setup(ctx, &mut ue);
}

fn handle_pdu_session_resource_release_command(
    ctx: &GatewayContext,
    amf_addr: SocketAddr,
    msg: PduSessionResourceReleaseCommand,
) {
    let Some(shared) = find_ue(ctx, amf_addr, msg.amf_ue_ngap_id, msg.ran_ue_ngap_id) else {
        return;
    };
    let mut ue = lock(&shared);
    let mut released = Vec::with_capacity(msg.release_list.len());
    for item in &msg.release_list {
        match ctx.release_pdu_session(&mut ue, item.pdu_session_id) {
            Some(_) => released.push(item.pdu_session_id),
            None => log::warn!(
                "[ran_ue_ngap_id={}] Release of unknown PDU session {}",
                ue.ran_ue_ngap_id,
                item.pdu_session_id
            ),
        }
    }
    if let Some(nas) = msg.nas_pdu {
        ue.deliver_nas(Bytes::from(nas));
    }
    ngap_build::send_pdu_session_resource_release_response(ctx, &ue, &released);
}

fn handle_ue_context_release_command(ctx: &GatewayContext, amf_addr: SocketAddr, msg: UeContextReleaseCommand) {
    let (shared, amf_id, ran_id) = match msg.ue_ngap_ids {
        UeNgapIds::Pair {
            amf_ue_ngap_id,
            ran_ue_ngap_id,
        } => (
            ctx.ue_by_ran_id(ran_ue_ngap_id).or_else(|| ctx.ue_by_amf_ue_id(amf_ue_ngap_id)),
            amf_ue_ngap_id,
            Some(ran_ue_ngap_id),
        ),
        UeNgapIds::AmfOnly { amf_ue_ngap_id } => (ctx.ue_by_amf_ue_id(amf_ue_ngap_id), amf_ue_ngap_id, None),
    };
    let Some(shared) = shared else {
        log::error!("[{}] UE Context Release for unknown UE (amf_ue_ngap_id={})", amf_addr, amf_id);
        ngap_build::send_error_indication(
            ctx,
            amf_addr,
            Some(amf_id),
            ran_id,
            Cause::RadioNetwork(CauseRadioNetwork::UnknownLocalUeNgapId),
        );
        return;
    };

    log::info!("[{}] UE Context Release: {:?}", amf_addr, msg.cause);
    let ran_ue_ngap_id = lock(&shared).ran_ue_ngap_id;
    ctx.remove_ue(ran_ue_ngap_id);
    ngap_build::send_ue_context_release_complete(ctx, amf_addr, amf_id, ran_ue_ngap_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    use ogs_asn1c::ngap::pdu::NgapMessageBody;
    use ogs_asn1c::ngap::types::Criticality;
    use ogs_ngap::builder;
    use ogs_ngap::{
        decode_ngap_pdu, AllocationAndRetentionPriority, Ambr, GtpTunnel, Guami, PduSessionResourceSetupRequestTransfer,
        PduSessionType, PlmnSupportItem, QosFlowSetupRequestItem, SNssai, SecurityIndication, ServedGuamiItem,
        TimeToWait, UeAssociatedLogicalNgConnection, UeSecurityCapabilities,
    };

    use crate::test_support::{test_context, test_settings, RecordingTransport, TestReceivers};

    fn amf_addr() -> SocketAddr {
        "127.0.0.1:38412".parse().unwrap()
    }

    fn guami() -> Guami {
        Guami {
            plmn_identity: [0x02, 0xf8, 0x39],
            amf_region_id: 0xca,
            amf_set_id: 0x3f8,
            amf_pointer: 0,
        }
    }

    fn slice() -> SNssai {
        SNssai {
            sst: 1,
            sd: Some([0x01, 0x02, 0x03]),
        }
    }

    fn setup() -> (Arc<GatewayContext>, TestReceivers, Arc<RecordingTransport>) {
        let (ctx, rx) = test_context(test_settings());
        let transport = Arc::new(RecordingTransport::default());
        ctx.new_amf(amf_addr(), transport.clone());
        (ctx, rx, transport)
    }

    fn transfer(upf: Option<GtpTunnel>, integrity: ProtectionIndication) -> Vec<u8> {
        builder::build_pdu_session_resource_setup_request_transfer(&PduSessionResourceSetupRequestTransfer {
            session_ambr: Some(Ambr {
                dl: 100_000_000,
                ul: 50_000_000,
            }),
            ul_ngu_up_tnl_info: upf,
            pdu_session_type: PduSessionType::Ipv4,
            security_indication: Some(SecurityIndication {
                integrity_protection: integrity,
                confidentiality_protection: ProtectionIndication::NotNeeded,
            }),
            network_instance: None,
            qos_flow_setup_list: vec![QosFlowSetupRequestItem {
                qfi: 1,
                five_qi: 9,
                arp: AllocationAndRetentionPriority {
                    priority_level: 8,
                    may_trigger_pre_emption: false,
                    pre_emptable: false,
                },
                gbr: None,
            }],
        })
        .unwrap()
    }

    fn upf_tunnel() -> Option<GtpTunnel> {
        Some(GtpTunnel {
            address: Ipv4Addr::new(10, 200, 200, 102),
            teid: 0x77,
        })
    }

    fn setup_item(id: u8, transfer: Vec<u8>) -> PduSessionSetupItem {
        PduSessionSetupItem {
            pdu_session_id: id,
            nas_pdu: Some(vec![0x7e, 0x00, 0x68]),
            s_nssai: slice(),
            transfer,
        }
    }

    fn ics_request(ran_ue_ngap_id: u32, items: Vec<PduSessionSetupItem>) -> Vec<u8> {
        builder::build_initial_context_setup_request(&InitialContextSetupRequest {
            amf_ue_ngap_id: 77,
            ran_ue_ngap_id,
            ue_ambr: Some(Ambr { dl: 1_000_000, ul: 1_000_000 }),
            guami: guami(),
            pdu_session_list: items,
            allowed_nssai: vec![slice()],
            ue_security_capabilities: UeSecurityCapabilities::default(),
            security_key: [0x5a; 32],
            nas_pdu: Some(vec![0x7e, 0x02]),
        })
        .unwrap()
    }

    fn decode_sent(transport: &RecordingTransport) -> Vec<NgapMessage> {
        transport
            .take()
            .iter()
            .map(|pdu| decode_ngap_pdu(pdu).unwrap())
            .collect()
    }

    #[test]
    fn test_ng_setup_response_stores_amf_information() {
        let (ctx, _rx, _transport) = setup();
        let response = builder::build_ng_setup_response(&NgSetupResponse {
            amf_name: "AMF".to_string(),
            served_guami_list: vec![ServedGuamiItem {
                guami: guami(),
                backup_amf_name: None,
            }],
            relative_amf_capacity: 255,
            plmn_support_list: vec![PlmnSupportItem {
                plmn_identity: [0x02, 0xf8, 0x39],
                slice_support_list: vec![slice()],
            }],
        })
        .unwrap();

        dispatch(&ctx, amf_addr(), &response);
        let amf = ctx.amf_by_addr(&amf_addr()).unwrap();
        let amf = lock(&amf);
        assert_eq!(amf.name.as_deref(), Some("AMF"));
        assert_eq!(amf.relative_capacity, 255);
        assert_eq!(amf.served_guami_list.len(), 1);
        assert_eq!(amf.plmn_support_list.len(), 1);
    }

    #[test]
    fn test_ng_setup_response_missing_ie_gets_error_indication() {
        let (ctx, _rx, transport) = setup();
        let body = NgapMessageBody::new(ProcedureCode::NG_SETUP, Criticality::Reject);
        let pdu = NgapPdu::SuccessfulOutcome(body).to_bytes().unwrap();

        dispatch(&ctx, amf_addr(), &pdu);
        let sent = decode_sent(&transport);
        assert!(matches!(sent.as_slice(), [NgapMessage::ErrorIndication(_)]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ng_setup_failure_with_time_to_wait_retries() {
        let (ctx, _rx, transport) = setup();
        let failure = builder::build_ng_setup_failure(&NgSetupFailure {
            cause: Cause::Misc(ogs_asn1c::ngap::cause::CauseMisc::Unspecified),
            time_to_wait: Some(TimeToWait::V1s),
        })
        .unwrap();

        dispatch(&ctx, amf_addr(), &failure);
        assert!(!ctx.ng_setup_reinitiation_available(&amf_addr()));
        // A second failure while waiting does not schedule another retry
        dispatch(&ctx, amf_addr(), &failure);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(ctx.ng_setup_reinitiation_available(&amf_addr()));
        let sent = decode_sent(&transport);
        assert!(matches!(sent.as_slice(), [NgapMessage::NgSetupRequest(_)]));
    }

    #[test]
    fn test_initial_context_setup_queues_sessions() {
        let (ctx, mut rx, _transport) = setup();
        let shared = ctx.new_ue().unwrap();
        let ran_id = {
            let mut ue = lock(&shared);
            ctx.attach_ue_to_amf(&mut ue, amf_addr()).unwrap();
            ue.radius_session = Some("aa-bb-cc-dd-ee-ff".to_string());
            ue.ran_ue_ngap_id
        };
        ctx.new_radius_session("aa-bb-cc-dd-ee-ff", "192.168.1.10:1812".parse().unwrap());

        let request = ics_request(
            ran_id,
            vec![
                setup_item(1, transfer(upf_tunnel(), ProtectionIndication::Required)),
                setup_item(1, transfer(upf_tunnel(), ProtectionIndication::Required)),
                setup_item(2, transfer(None, ProtectionIndication::NotNeeded)),
                setup_item(3, transfer(upf_tunnel(), ProtectionIndication::NotNeeded)),
            ],
        );
        dispatch(&ctx, amf_addr(), &request);

        let ue = lock(&shared);
        assert_eq!(ue.amf_ue_ngap_id, 77);
        assert_eq!(ue.ktngf, Some([0x5a; 32]));
        assert_eq!(ue.cached_nas, vec![Bytes::from_static(&[0x7e, 0x02])]);

        let pending = ue.pdu_setup.as_ref().unwrap();
        assert_eq!(pending.procedure, PduSetupProcedure::InitialContextSetup);
        assert_eq!(pending.queue.iter().copied().collect::<Vec<_>>(), vec![1, 3]);
        let failed: Vec<u8> = pending.failed_list.iter().map(|item| item.pdu_session_id).collect();
        assert_eq!(failed, vec![1, 2]);

        let first = &ue.pdu_sessions[&1];
        assert!(first.integrity_required);
        assert_eq!(first.qfis, vec![1]);
        let gtp = first.gtp.unwrap();
        assert_eq!(gtp.outgoing_teid, 0x77);
        assert_eq!(gtp.upf_address, "10.200.200.102:2152".parse().unwrap());
        assert!(!ue.pdu_sessions[&3].integrity_required);
        assert_eq!(ctx.allocation_counts().teids, 2);

        // IKE SA not yet up: the UE is told where to run IKE
        assert!(rx.radius.try_recv().is_ok());
    }

    #[test]
    fn test_initial_context_setup_for_unknown_ue_fails() {
        let (ctx, _rx, transport) = setup();
        let request = ics_request(4242, vec![setup_item(1, transfer(upf_tunnel(), ProtectionIndication::Required))]);
        dispatch(&ctx, amf_addr(), &request);

        match decode_sent(&transport).as_slice() {
            [NgapMessage::InitialContextSetupFailure(failure)] => {
                assert_eq!(failure.ran_ue_ngap_id, 4242);
                assert_eq!(failure.failed_list.len(), 1);
                assert_eq!(failure.cause, Cause::RadioNetwork(CauseRadioNetwork::UnknownLocalUeNgapId));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_downlink_nas_after_ike_is_cached_until_tcp() {
        let (ctx, _rx, _transport) = setup();
        let shared = ctx.new_ue().unwrap();
        let ran_id = {
            let mut ue = lock(&shared);
            ue.ike_established = true;
            ue.ran_ue_ngap_id
        };
        let dl = builder::build_downlink_nas_transport(&DownlinkNasTransport {
            amf_ue_ngap_id: 12,
            ran_ue_ngap_id: ran_id,
            nas_pdu: vec![0x7e, 0x00, 0x42],
        })
        .unwrap();

        dispatch(&ctx, amf_addr(), &dl);
        let ue = lock(&shared);
        assert_eq!(ue.amf_ue_ngap_id, 12);
        assert_eq!(ue.amf_addr, Some(amf_addr()));
        assert_eq!(ue.cached_nas, vec![Bytes::from_static(&[0x7e, 0x00, 0x42])]);
    }

    #[test]
    fn test_downlink_nas_for_unknown_ue_gets_error_indication() {
        let (ctx, _rx, transport) = setup();
        let dl = builder::build_downlink_nas_transport(&DownlinkNasTransport {
            amf_ue_ngap_id: 1,
            ran_ue_ngap_id: 999,
            nas_pdu: vec![0x7e],
        })
        .unwrap();
        dispatch(&ctx, amf_addr(), &dl);
        assert!(matches!(decode_sent(&transport).as_slice(), [NgapMessage::ErrorIndication(_)]));
    }

    #[test]
    fn test_ue_context_release_command_removes_ue() {
        let (ctx, _rx, transport) = setup();
        let shared = ctx.new_ue().unwrap();
        let ran_id = {
            let mut ue = lock(&shared);
            ctx.attach_ue_to_amf(&mut ue, amf_addr()).unwrap();
            ue.amf_ue_ngap_id = 31;
            ue.ran_ue_ngap_id
        };
        let command = builder::build_ue_context_release_command(&UeContextReleaseCommand {
            ue_ngap_ids: UeNgapIds::AmfOnly { amf_ue_ngap_id: 31 },
            cause: Cause::Nas(ogs_asn1c::ngap::cause::CauseNas::NormalRelease),
        })
        .unwrap();

        dispatch(&ctx, amf_addr(), &command);
        assert!(ctx.ue_by_ran_id(ran_id).is_none());
        match decode_sent(&transport).as_slice() {
            [NgapMessage::UeContextReleaseComplete(complete)] => {
                assert_eq!(complete.amf_ue_ngap_id, 31);
                assert_eq!(complete.ran_ue_ngap_id, ran_id);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_pdu_session_release_frees_teids() {
        let (ctx, _rx, transport) = setup();
        let shared = ctx.new_ue().unwrap();
        let ran_id = {
            let mut ue = lock(&shared);
            ctx.attach_ue_to_amf(&mut ue, amf_addr()).unwrap();
            let ran_id = ue.ran_ue_ngap_id;
            let teid = ctx.allocate_teid(ran_id).unwrap();
            ue.create_pdu_session(5, slice()).unwrap().gtp = Some(GtpConnectionInfo {
                upf_address: "10.0.0.9:2152".parse().unwrap(),
                incoming_teid: teid,
                outgoing_teid: 1,
            });
            ran_id
        };
        let command = builder::build_pdu_session_resource_release_command(&PduSessionResourceReleaseCommand {
            amf_ue_ngap_id: 1,
            ran_ue_ngap_id: ran_id,
            nas_pdu: None,
            release_list: vec![
                ogs_ngap::PduSessionReleaseItem {
                    pdu_session_id: 5,
                    transfer: vec![0x00],
                },
                ogs_ngap::PduSessionReleaseItem {
                    pdu_session_id: 6,
                    transfer: vec![0x00],
                },
            ],
        })
        .unwrap();

        dispatch(&ctx, amf_addr(), &command);
        assert!(lock(&shared).pdu_sessions.is_empty());
        assert_eq!(ctx.allocation_counts().teids, 0);
        match decode_sent(&transport).as_slice() {
            [NgapMessage::PduSessionResourceReleaseResponse(response)] => {
                let ids: Vec<u8> = response.released_list.iter().map(|item| item.pdu_session_id).collect();
                assert_eq!(ids, vec![5]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ng_reset_partial_and_whole() {
        let (ctx, _rx, transport) = setup();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let shared = ctx.new_ue().unwrap();
            let mut ue = lock(&shared);
            ctx.attach_ue_to_amf(&mut ue, amf_addr()).unwrap();
            ids.push(ue.ran_ue_ngap_id);
        }

        let partial = builder::build_ng_reset(&NgReset {
            cause: Cause::Misc(ogs_asn1c::ngap::cause::CauseMisc::Unspecified),
            reset_type: ResetType::PartOfNgInterface(vec![UeAssociatedLogicalNgConnection {
                amf_ue_ngap_id: None,
                ran_ue_ngap_id: Some(ids[0]),
            }]),
        })
        .unwrap();
        dispatch(&ctx, amf_addr(), &partial);
        assert_eq!(ctx.ue_count(), 2);
        match decode_sent(&transport).as_slice() {
            [NgapMessage::NgResetAcknowledge(ack)] => assert_eq!(ack.connection_list.len(), 1),
            other => panic!("unexpected {:?}", other),
        }

        let whole = builder::build_ng_reset(&NgReset {
            cause: Cause::Misc(ogs_asn1c::ngap::cause::CauseMisc::Unspecified),
            reset_type: ResetType::NgInterface,
        })
        .unwrap();
        dispatch(&ctx, amf_addr(), &whole);
        assert_eq!(ctx.ue_count(), 0);
        assert!(matches!(decode_sent(&transport).as_slice(), [NgapMessage::NgResetAcknowledge(_)]));
    }

    #[test]
    fn test_amf_configuration_update_and_overload() {
        let (ctx, _rx, transport) = setup();
        let update = builder::build_amf_configuration_update(&AmfConfigurationUpdate {
            amf_name: Some("AMF-2".to_string()),
            served_guami_list: None,
            relative_amf_capacity: Some(10),
            plmn_support_list: None,
        })
        .unwrap();
        dispatch(&ctx, amf_addr(), &update);
        assert!(matches!(
            decode_sent(&transport).as_slice(),
            [NgapMessage::AmfConfigurationUpdateAcknowledge(_)]
        ));

        let start = builder::build_overload_start(&OverloadStart {
            overload_action: Some(ogs_ngap::OverloadAction::RejectNonEmergencyMoDt),
            traffic_load_reduction: Some(50),
        })
        .unwrap();
        dispatch(&ctx, amf_addr(), &start);
        {
            let amf = ctx.amf_by_addr(&amf_addr()).unwrap();
            let amf = lock(&amf);
            assert_eq!(amf.name.as_deref(), Some("AMF-2"));
            assert_eq!(amf.relative_capacity, 10);
            assert_eq!(amf.traffic_load_reduction, Some(50));
        }

        dispatch(&ctx, amf_addr(), &builder::build_overload_stop().unwrap());
        let amf = ctx.amf_by_addr(&amf_addr()).unwrap();
        assert!(lock(&amf).overload_action.is_none());
    }

    #[test]
    fn test_garbage_is_dropped() {
        let (ctx, _rx, transport) = setup();
        dispatch(&ctx, amf_addr(), &[0xff, 0xff, 0xff]);
        assert!(transport.take().is_empty());
    }
}
