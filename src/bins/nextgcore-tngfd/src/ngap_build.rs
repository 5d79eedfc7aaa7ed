//! NGAP Message Sending
//!
//! One wrapper per message the gateway originates on N2. Each validates its
//! input, encodes with `ogs_ngap::builder` and queues the PDU on the AMF
//! transport. Failures are logged and the message is abandoned.

use std::net::SocketAddr;

use ogs_asn1c::ngap::cause::Cause;
use ogs_ngap::builder;
use ogs_ngap::{
    AmfConfigurationUpdateAcknowledge, ErrorIndication, GtpTunnel, InitialContextSetupFailure,
    InitialContextSetupResponse, InitialUeMessage, NgResetAcknowledge, NgSetupRequest, NgapResult, PagingDrx,
    PduSessionFailedItem, PduSessionReleaseItem, PduSessionResourceReleaseResponse,
    PduSessionResourceSetupResponse, PduSessionResourceSetupResponseTransfer,
    PduSessionResourceSetupUnsuccessfulTransfer, PduSessionSetupResponseItem, UeAssociatedLogicalNgConnection,
    UeContextReleaseComplete, UeContextReleaseRequest, UplinkNasTransport,
};

use crate::context::{lock, GatewayContext, PduSession, PduSetupProcedure, PendingPduSetup, UeSession};

/// maxnoofPDUSessions
pub const MAX_NUM_OF_PDU_SESSIONS: usize = 256;

/// maxnoofNGConnectionsToReset
pub const MAX_NUM_OF_NG_CONNECTIONS_TO_RESET: usize = 65536;

// ============================================================================
// Send path
// ============================================================================

/// Queue an encoded PDU on the association of `amf_addr`
fn send_to_amf(ctx: &GatewayContext, amf_addr: SocketAddr, name: &str, encoded: NgapResult<Vec<u8>>) {
    let pdu = match encoded {
        Ok(pdu) => pdu,
        Err(e) => {
            log::error!("[{}] Build {} failed: {}", amf_addr, name, e);
            return;
        }
    };
    let Some(amf) = ctx.amf_by_addr(&amf_addr) else {
        log::error!("[{}] No AMF association, {} not sent", amf_addr, name);
        return;
    };
    let transport = lock(&amf).transport.clone();
    match transport.send(&pdu) {
        Ok(()) => log::debug!("[{}] {} sent ({} bytes)", amf_addr, name, pdu.len()),
        Err(e) => log::error!("[{}] Send {} failed: {}", amf_addr, name, e),
    }
}

/// AMF of a UE, logging when it has none
fn ue_amf(ue: &UeSession, name: &str) -> Option<SocketAddr> {
    if ue.amf_addr.is_none() {
        log::error!("[ran_ue_ngap_id={}] UE has no AMF, {} not sent", ue.ran_ue_ngap_id, name);
    }
    ue.amf_addr
}

fn check_list_size(ue: &UeSession, name: &str, list: &str, len: usize) -> bool {
    if len > MAX_NUM_OF_PDU_SESSIONS {
        log::error!(
            "[ran_ue_ngap_id={}] {} {} holds {} items, not sent",
            ue.ran_ue_ngap_id,
            name,
            list,
            len
        );
        return false;
    }
    true
}

// ============================================================================
// Transfers
// ============================================================================

/// Encoded PDUSessionResourceSetupUnsuccessfulTransfer, empty if encoding fails
pub fn unsuccessful_transfer(cause: Cause) -> Vec<u8> {
    builder::build_pdu_session_resource_setup_unsuccessful_transfer(&PduSessionResourceSetupUnsuccessfulTransfer {
        cause,
    })
    .unwrap_or_else(|e| {
        log::error!("Build PDUSessionResourceSetupUnsuccessfulTransfer failed: {}", e);
        Vec::new()
    })
}

pub fn failed_item(pdu_session_id: u8, cause: Cause) -> PduSessionFailedItem {
    PduSessionFailedItem {
        pdu_session_id,
        transfer: unsuccessful_transfer(cause),
    }
}

/// Setup response item pointing the UPF at our GTP-U endpoint
pub fn setup_response_item(ctx: &GatewayContext, session: &PduSession) -> NgapResult<PduSessionSetupResponseItem> {
    let teid = session.gtp.map(|gtp| gtp.incoming_teid).unwrap_or_default();
    let transfer = builder::build_pdu_session_resource_setup_response_transfer(
        &PduSessionResourceSetupResponseTransfer {
            dl_tunnel: GtpTunnel {
                address: ctx.settings.gtp_bind_address,
                teid,
            },
            associated_qfis: session.qfis.clone(),
        },
    )?;
    Ok(PduSessionSetupResponseItem {
        pdu_session_id: session.id,
        transfer,
    })
}

// ============================================================================
// Non-UE-associated
// ============================================================================

pub fn send_ng_setup_request(ctx: &GatewayContext, amf_addr: SocketAddr) {
    let settings = &ctx.settings;
    let msg = NgSetupRequest {
        global_ran_node_id: settings.global_tngf_id,
        ran_node_name: settings.ran_node_name.clone(),
        supported_ta_list: settings.supported_ta_list.clone(),
        default_paging_drx: PagingDrx::V128,
    };
    send_to_amf(ctx, amf_addr, "NGSetupRequest", builder::build_ng_setup_request(&msg));
}

pub fn send_ng_reset_acknowledge(
    ctx: &GatewayContext,
    amf_addr: SocketAddr,
    connection_list: Vec<UeAssociatedLogicalNgConnection>,
) {
    if connection_list.len() > MAX_NUM_OF_NG_CONNECTIONS_TO_RESET {
        log::error!("[{}] NGResetAcknowledge list holds {} items, not sent", amf_addr, connection_list.len());
        return;
    }
    let msg = NgResetAcknowledge { connection_list };
    send_to_amf(ctx, amf_addr, "NGResetAcknowledge", builder::build_ng_reset_acknowledge(&msg));
}

pub fn send_error_indication(
    ctx: &GatewayContext,
    amf_addr: SocketAddr,
    amf_ue_ngap_id: Option<u64>,
    ran_ue_ngap_id: Option<u32>,
    cause: Cause,
) {
    let msg = ErrorIndication {
        amf_ue_ngap_id,
        ran_ue_ngap_id,
        cause: Some(cause),
    };
    send_to_amf(ctx, amf_addr, "ErrorIndication", builder::build_error_indication(&msg));
}

pub fn send_amf_configuration_update_acknowledge(ctx: &GatewayContext, amf_addr: SocketAddr) {
    send_to_amf(
        ctx,
        amf_addr,
        "AMFConfigurationUpdateAcknowledge",
        builder::build_amf_configuration_update_acknowledge(&AmfConfigurationUpdateAcknowledge {}),
    );
}

// ============================================================================
// NAS transport
// ============================================================================

pub fn send_initial_ue_message(ctx: &GatewayContext, ue: &UeSession, nas_pdu: &[u8]) {
    let name = "InitialUEMessage";
    let Some(amf_addr) = ue_amf(ue, name) else {
        return;
    };
    let Some(user_location_info) = ue.user_location.clone() else {
        log::error!("[ran_ue_ngap_id={}] No user location, {} not sent", ue.ran_ue_ngap_id, name);
        return;
    };
    let msg = InitialUeMessage {
        ran_ue_ngap_id: ue.ran_ue_ngap_id,
        nas_pdu: nas_pdu.to_vec(),
        user_location_info,
        rrc_establishment_cause: ue.rrc_establishment_cause,
        ue_context_request: true,
    };
    send_to_amf(ctx, amf_addr, name, builder::build_initial_ue_message(&msg));
}

pub fn send_uplink_nas_transport(ctx: &GatewayContext, ue: &UeSession, nas_pdu: &[u8]) {
    let name = "UplinkNASTransport";
    let Some(amf_addr) = ue_amf(ue, name) else {
        return;
    };
    let Some(user_location_info) = ue.user_location.clone() else {
        log::error!("[ran_ue_ngap_id={}] No user location, {} not sent", ue.ran_ue_ngap_id, name);
        return;
    };
    let msg = UplinkNasTransport {
        amf_ue_ngap_id: ue.amf_ue_ngap_id,
        ran_ue_ngap_id: ue.ran_ue_ngap_id,
        nas_pdu: nas_pdu.to_vec(),
        user_location_info,
    };
    send_to_amf(ctx, amf_addr, name, builder::build_uplink_nas_transport(&msg));
}

// ============================================================================
// Initial Context Setup and PDU session resources
// ============================================================================

pub fn send_initial_context_setup_response(
    ctx: &GatewayContext,
    ue: &UeSession,
    setup_list: Vec<PduSessionSetupResponseItem>,
    failed_list: Vec<PduSessionFailedItem>,
) {
    let name = "InitialContextSetupResponse";
    let Some(amf_addr) = ue_amf(ue, name) else {
        return;
    };
    if !check_list_size(ue, name, "setup list", setup_list.len())
        || !check_list_size(ue, name, "failed list", failed_list.len())
    {
        return;
    }
    let msg = InitialContextSetupResponse {
        amf_ue_ngap_id: ue.amf_ue_ngap_id,
        ran_ue_ngap_id: ue.ran_ue_ngap_id,
        setup_list,
        failed_list,
    };
    send_to_amf(ctx, amf_addr, name, builder::build_initial_context_setup_response(&msg));
}

/// ICS Failure by id pair, usable before the UE is known
pub fn send_initial_context_setup_failure(
    ctx: &GatewayContext,
    amf_addr: SocketAddr,
    amf_ue_ngap_id: u64,
    ran_ue_ngap_id: u32,
    failed_list: Vec<PduSessionFailedItem>,
    cause: Cause,
) {
    let name = "InitialContextSetupFailure";
    if failed_list.len() > MAX_NUM_OF_PDU_SESSIONS {
        log::error!("[ran_ue_ngap_id={}] {} failed list too long, not sent", ran_ue_ngap_id, name);
        return;
    }
    let msg = InitialContextSetupFailure {
        amf_ue_ngap_id,
        ran_ue_ngap_id,
        failed_list,
        cause,
    };
    send_to_amf(ctx, amf_addr, name, builder::build_initial_context_setup_failure(&msg));
}

pub fn send_pdu_session_resource_setup_response(
    ctx: &GatewayContext,
    ue: &UeSession,
    setup_list: Vec<PduSessionSetupResponseItem>,
    failed_list: Vec<PduSessionFailedItem>,
) {
    let name = "PDUSessionResourceSetupResponse";
    let Some(amf_addr) = ue_amf(ue, name) else {
        return;
    };
    if !check_list_size(ue, name, "setup list", setup_list.len())
        || !check_list_size(ue, name, "failed list", failed_list.len())
    {
        return;
    }
    let msg = PduSessionResourceSetupResponse {
        amf_ue_ngap_id: ue.amf_ue_ngap_id,
        ran_ue_ngap_id: ue.ran_ue_ngap_id,
        setup_list,
        failed_list,
    };
    send_to_amf(ctx, amf_addr, name, builder::build_pdu_session_resource_setup_response(&msg));
}

/// Answer the procedure that queued the PDU session setup
pub fn send_pdu_setup_result(ctx: &GatewayContext, ue: &UeSession, pending: PendingPduSetup) {
    match pending.procedure {
        PduSetupProcedure::InitialContextSetup => {
            send_initial_context_setup_response(ctx, ue, pending.setup_list, pending.failed_list)
        }
        PduSetupProcedure::PduSessionResourceSetup => {
            send_pdu_session_resource_setup_response(ctx, ue, pending.setup_list, pending.failed_list)
        }
    }
}

pub fn send_pdu_session_resource_release_response(ctx: &GatewayContext, ue: &UeSession, released: &[u8]) {
    let name = "PDUSessionResourceReleaseResponse";
    let Some(amf_addr) = ue_amf(ue, name) else {
        return;
    };
    if !check_list_size(ue, name, "released list", released.len()) {
        return;
    }
    let transfer = match builder::build_pdu_session_resource_release_response_transfer() {
        Ok(transfer) => transfer,
        Err(e) => {
            log::error!("Build PDUSessionResourceReleaseResponseTransfer failed: {}", e);
            return;
        }
    };
    let msg = PduSessionResourceReleaseResponse {
        amf_ue_ngap_id: ue.amf_ue_ngap_id,
        ran_ue_ngap_id: ue.ran_ue_ngap_id,
        released_list: released
            .iter()
            .map(|id| PduSessionReleaseItem {
                pdu_session_id: *id,
                transfer: transfer.clone(),
            })
            .collect(),
    };
    send_to_amf(ctx, amf_addr, name, builder::build_pdu_session_resource_release_response(&msg));
}

// ============================================================================
// UE context release
// ============================================================================

pub fn send_ue_context_release_request(ctx: &GatewayContext, ue: &UeSession, cause: Cause) {
    let name = "UEContextReleaseRequest";
    let Some(amf_addr) = ue_amf(ue, name) else {
        return;
    };
    let msg = UeContextReleaseRequest {
        amf_ue_ngap_id: ue.amf_ue_ngap_id,
        ran_ue_ngap_id: ue.ran_ue_ngap_id,
        pdu_session_ids: ue.pdu_sessions.keys().copied().collect(),
        cause,
    };
    send_to_amf(ctx, amf_addr, name, builder::build_ue_context_release_request(&msg));
}

pub fn send_ue_context_release_complete(
    ctx: &GatewayContext,
    amf_addr: SocketAddr,
    amf_ue_ngap_id: u64,
    ran_ue_ngap_id: u32,
) {
    let msg = UeContextReleaseComplete {
        amf_ue_ngap_id,
        ran_ue_ngap_id,
    };
    send_to_amf(
        ctx,
        amf_addr,
        "UEContextReleaseComplete",
        builder::build_ue_context_release_complete(&msg),
    );
}
