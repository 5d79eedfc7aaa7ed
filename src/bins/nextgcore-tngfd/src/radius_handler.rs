//! RADIUS / EAP-5G Handlers
//!
//! Each Access-Request from the TNAP carries one EAP packet of the UE. The
//! EAP-5G exchange relays NAS until the AMF sends Initial Context Setup, at
//! which point the UE is told where to run IKE and the TNAP receives Ktnap
//! in the Access-Accept.
//!
//! Downlink messages answer the most recent Access-Request of the session,
//! so the session remembers its identifier and authenticator.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;

use ogs_asn1c::ngap::cause::{Cause, CauseRadioNetwork};
use ogs_crypt::ogs_kdf_ktnap;
use ogs_ngap::{Guami, RrcEstablishmentCause, UserLocationInformationTngf};
use ogs_radius::eap::{EapData, EapPacket};
use ogs_radius::message::{
    RADIUS_ACCESS_ACCEPT, RADIUS_ACCESS_CHALLENGE, RADIUS_ACCESS_REJECT, RADIUS_ACCESS_REQUEST,
    RADIUS_AUTHENTICATOR_LEN, ATTR_CALLED_STATION_ID, ATTR_CALLING_STATION_ID, ATTR_USER_NAME,
};
use ogs_radius::mppe::{generate_salt, ms_mppe_key_attribute, MS_MPPE_RECV_KEY, MS_MPPE_SEND_KEY};
use ogs_radius::{eap5g_data, AnParameters, Eap5gRequest, Eap5gResponse, RadiusAttribute, RadiusMessage};

use crate::context::{
    lock, Eap5gState, GatewayContext, SharedRadiusSession, TngfError, TngfResult, UeSession, AMF_UE_NGAP_ID_UNSPECIFIED,
};
use crate::ngap_build;

/// Characters of Called-Station-Id holding the TNAP MAC address
const CALLED_STATION_MAC_LEN: usize = 17;

/// Where a reply goes and which request it answers
#[derive(Debug, Clone, Copy)]
struct ReplyTo {
    peer: SocketAddr,
    identifier: u8,
    request_authenticator: [u8; RADIUS_AUTHENTICATOR_LEN],
}

/// Handle one datagram received on the RADIUS port
pub fn dispatch(ctx: &GatewayContext, peer: SocketAddr, data: &[u8]) {
    let request = match RadiusMessage::decode(data) {
        Ok(request) => request,
        Err(e) => {
            log::warn!("[{}] RADIUS decode failed: {}", peer, e);
            return;
        }
    };
    if request.code != RADIUS_ACCESS_REQUEST {
        log::warn!("[{}] Unexpected RADIUS code {}", peer, request.code);
        return;
    }
    match request.verify_message_authenticator(&ctx.settings.radius_secret) {
        Ok(Some(false)) => {
            log::error!("[{}] Message-Authenticator mismatch, request dropped", peer);
            return;
        }
        Err(e) => {
            log::error!("[{}] Message-Authenticator check failed: {}", peer, e);
            return;
        }
        Ok(_) => {}
    }

    if let Err(e) = handle_access_request(ctx, peer, &request) {
        log::error!("[{}] Access-Request (id={}) failed: {}", peer, request.identifier, e);
    }
}

fn handle_access_request(ctx: &GatewayContext, peer: SocketAddr, request: &RadiusMessage) -> TngfResult<()> {
    let calling_station_id = request
        .attribute(ATTR_CALLING_STATION_ID)
        .map(|value| String::from_utf8_lossy(value).into_owned())
        .ok_or_else(|| TngfError::not_found("attribute", "Calling-Station-Id"))?;
    let eap_bytes = request
        .eap_message()
        .ok_or_else(|| TngfError::not_found("attribute", "EAP-Message"))?;
    let eap = EapPacket::decode(&eap_bytes)?;
    let reply = ReplyTo {
        peer,
        identifier: request.identifier,
        request_authenticator: request.authenticator,
    };
    log::debug!(
        "[{}] Access-Request (id={}, station={}, eap id={})",
        peer,
        request.identifier,
        calling_station_id,
        eap.identifier
    );

    if let EapData::Identity(_) = eap.data {
        return handle_eap_identity(ctx, reply, request, &calling_station_id, &eap);
    }

    let session = ctx
        .radius_session(&calling_station_id)
        .ok_or_else(|| TngfError::not_found("RADIUS session", &calling_station_id))?;
    // Later downlink messages answer this request
    let (state, ran_ue_ngap_id) = {
        let mut session = lock(&session);
        session.peer = peer;
        session.identifier = request.identifier;
        session.request_authenticator = request.authenticator;
        session.eap_identifier = eap.identifier;
        (session.state, session.ran_ue_ngap_id)
    };

    let response = Eap5gResponse::decode(eap5g_data(&eap)?)?;
    match (response, state) {
        (Eap5gResponse::Stop, _) => {
            log::info!("[{}] EAP-5G Stop from {}", peer, calling_station_id);
            release_session(ctx, &calling_station_id);
            send_reject(ctx, reply, eap.identifier)
        }
        (Eap5gResponse::Nas { an_parameters, nas_pdu }, _) => match ran_ue_ngap_id {
            None => handle_first_nas(ctx, reply, request, &session, an_parameters, &nas_pdu, eap.identifier),
            Some(id) => {
                let shared = ctx
                    .ue_by_ran_id(id)
                    .ok_or_else(|| TngfError::not_found("UE", id))?;
                let ue = lock(&shared);
                ngap_build::send_uplink_nas_transport(ctx, &ue, &nas_pdu);
                Ok(())
            }
        },
        (Eap5gResponse::Notification, Eap5gState::InitialContextSetup) => {
            let id = ran_ue_ngap_id.ok_or_else(|| TngfError::not_found("UE of session", &calling_station_id))?;
            handle_notification_response(ctx, reply, &session, id, eap.identifier)
        }
        (Eap5gResponse::Notification, state) => {
            log::warn!("[{}] EAP-5G Notification in state {:?}, dropped", peer, state);
            Ok(())
        }
    }
}

/// EAP-Response/Identity (re)starts the session with EAP-5G Start
fn handle_eap_identity(
    ctx: &GatewayContext,
    reply: ReplyTo,
    request: &RadiusMessage,
    calling_station_id: &str,
    eap: &EapPacket,
) -> TngfResult<()> {
    if ctx.radius_session(calling_station_id).is_some() {
        log::info!("[{}] RADIUS session {} restarted", reply.peer, calling_station_id);
        release_session(ctx, calling_station_id);
    }
    let session = ctx.new_radius_session(calling_station_id, reply.peer);
    let identifier = eap.identifier.wrapping_add(1);
    {
        let mut session = lock(&session);
        session.identifier = reply.identifier;
        session.request_authenticator = reply.request_authenticator;
        session.eap_identifier = identifier;
        session.user_name = request.attribute(ATTR_USER_NAME).cloned();
        session.state = Eap5gState::Nas;
    }

    log::info!("[{}] EAP-Response/Identity from {}", reply.peer, calling_station_id);
    let start = Eap5gRequest::Start.to_eap(identifier)?;
    send_reply(ctx, reply, RADIUS_ACCESS_CHALLENGE, &start, Vec::new())
}

/// Drop the session of a station and the UE it created. The AMF is asked
/// to release that UE.
fn release_session(ctx: &GatewayContext, calling_station_id: &str) {
    let Some(session) = ctx.radius_session(calling_station_id) else {
        return;
    };
    let ran_ue_ngap_id = lock(&session).ran_ue_ngap_id;
    if let Some(id) = ran_ue_ngap_id {
        if let Some(shared) = ctx.ue_by_ran_id(id) {
            let ue = lock(&shared);
            // Without an AMF-UE-NGAP-ID the AMF holds no context to release
            if ue.amf_ue_ngap_id != AMF_UE_NGAP_ID_UNSPECIFIED {
                let cause = Cause::RadioNetwork(CauseRadioNetwork::ReleaseDueToNgranGeneratedReason);
                ngap_build::send_ue_context_release_request(ctx, &ue, cause);
            }
        }
        ctx.remove_ue(id);
        log::info!("[ran_ue_ngap_id={}] UE of RADIUS session {} released", id, calling_station_id);
    }
    ctx.remove_radius_session(calling_station_id);
}

/// First 5G-NAS of a UE: select the AMF, create the UE session and send
/// Initial UE Message
fn handle_first_nas(
    ctx: &GatewayContext,
    reply: ReplyTo,
    request: &RadiusMessage,
    session: &SharedRadiusSession,
    an_parameters: Option<AnParameters>,
    nas_pdu: &[u8],
    eap_identifier: u8,
) -> TngfResult<()> {
    let called_station_id = request
        .attribute(ATTR_CALLED_STATION_ID)
        .ok_or_else(|| TngfError::not_found("attribute", "Called-Station-Id"))?;
    let tnap_id = tnap_id_from_called_station(called_station_id)?;
    let IpAddr::V4(ip_address) = reply.peer.ip() else {
        return Err(TngfError::Transport(format!("TNAP {} is not IPv4", reply.peer)));
    };

    let an_parameters = an_parameters.unwrap_or_default();
    let guami = an_parameters.guami.map(|g| Guami {
        plmn_identity: g.plmn_identity,
        amf_region_id: g.amf_region_id,
        amf_set_id: g.amf_set_id,
        amf_pointer: g.amf_pointer,
    });
    let Some(amf) = ctx.select_amf(guami.as_ref(), an_parameters.selected_plmn_id.as_ref()) else {
        log::warn!("[{}] No AMF available (GUAMI {:?})", reply.peer, guami);
        return send_reject(ctx, reply, eap_identifier);
    };
    let amf_addr = lock(&amf).addr;

    let shared = ctx.new_ue()?;
    let mut ue = lock(&shared);
    ue.user_location = Some(UserLocationInformationTngf {
        tnap_id,
        ip_address,
        port: Some(reply.peer.port()),
    });
    if let Some(cause) = an_parameters.establishment_cause {
        ue.rrc_establishment_cause = RrcEstablishmentCause::from_value(cause).unwrap_or(RrcEstablishmentCause::MoData);
    }
    ue.identity = an_parameters.ue_identity.map(|id| id.contents);
    ue.radius_session = Some(lock(session).calling_station_id.clone());
    ctx.attach_ue_to_amf(&mut ue, amf_addr)?;
    lock(session).ran_ue_ngap_id = Some(ue.ran_ue_ngap_id);

    log::info!(
        "[ran_ue_ngap_id={}] UE attached via TNAP {} to AMF {}",
        ue.ran_ue_ngap_id,
        reply.peer,
        amf_addr
    );
    ngap_build::send_initial_ue_message(ctx, &ue, nas_pdu);
    Ok(())
}

/// The UE acknowledged the TNGF contact info: hand Ktnap to the TNAP
fn handle_notification_response(
    ctx: &GatewayContext,
    reply: ReplyTo,
    session: &SharedRadiusSession,
    ran_ue_ngap_id: u32,
    eap_identifier: u8,
) -> TngfResult<()> {
    let shared = ctx
        .ue_by_ran_id(ran_ue_ngap_id)
        .ok_or_else(|| TngfError::not_found("UE", ran_ue_ngap_id))?;
    let mut ue = lock(&shared);
    let ktngf = ue.ktngf.ok_or_else(|| TngfError::not_found("Ktngf of UE", ran_ue_ngap_id))?;
    let ktnap = ogs_kdf_ktnap(&ktngf)?;
    ue.ktnap = Some(ktnap);
    let user_name = lock(session).user_name.clone();

    let secret = &ctx.settings.radius_secret;
    let (recv_key, send_key) = ktnap.split_at(ktnap.len() / 2);
    let mut attributes = vec![
        ms_mppe_key_attribute(MS_MPPE_RECV_KEY, recv_key, secret, &reply.request_authenticator, generate_salt())?,
        ms_mppe_key_attribute(MS_MPPE_SEND_KEY, send_key, secret, &reply.request_authenticator, generate_salt())?,
    ];
    if let Some(name) = user_name {
        attributes.push(RadiusAttribute::new(ATTR_USER_NAME, name));
    }

    log::info!("[ran_ue_ngap_id={}] EAP-5G complete, Access-Accept sent", ran_ue_ngap_id);
    send_reply(ctx, reply, RADIUS_ACCESS_ACCEPT, &EapPacket::success(eap_identifier), attributes)
}

fn send_reject(ctx: &GatewayContext, reply: ReplyTo, eap_identifier: u8) -> TngfResult<()> {
    send_reply(ctx, reply, RADIUS_ACCESS_REJECT, &EapPacket::failure(eap_identifier), Vec::new())
}

/// Sign and queue a reply carrying `eap`. The Message-Authenticator is
/// always added.
fn send_reply(
    ctx: &GatewayContext,
    reply: ReplyTo,
    code: u8,
    eap: &EapPacket,
    attributes: Vec<RadiusAttribute>,
) -> TngfResult<()> {
    let mut msg = RadiusMessage::new(code, reply.identifier, reply.request_authenticator);
    msg.push_eap_message(&eap.encode()?);
    msg.attributes.extend(attributes);
    let packet = msg.sign_response(&reply.request_authenticator, &ctx.settings.radius_secret)?;
    ctx.send_radius(reply.peer, Bytes::from(packet));
    Ok(())
}

/// TNAP id from the `AA-BB-CC-DD-EE-FF[:SSID]` form of Called-Station-Id
pub fn tnap_id_from_called_station(value: &[u8]) -> TngfResult<Vec<u8>> {
    let mac = value
        .get(..CALLED_STATION_MAC_LEN)
        .ok_or_else(|| TngfError::Transport(format!("Called-Station-Id too short ({} bytes)", value.len())))?;
    let digits: Vec<u8> = mac.iter().copied().filter(|c| *c != b'-').collect();
    if digits.len() % 2 != 0 {
        return Err(TngfError::Transport("Called-Station-Id is not a MAC address".to_string()));
    }
    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .ok_or_else(|| TngfError::Transport("Called-Station-Id is not hexadecimal".to_string()))
        })
        .collect()
}

// ============================================================================
// Downlink before the IKE SA exists
// ============================================================================

/// Session to answer for `ue` and the reply address of its last request
fn pending_reply(ctx: &GatewayContext, ue: &UeSession) -> Option<(SharedRadiusSession, ReplyTo)> {
    let Some(key) = ue.radius_session.as_deref() else {
        log::error!("[ran_ue_ngap_id={}] UE has no RADIUS session", ue.ran_ue_ngap_id);
        return None;
    };
    let Some(session) = ctx.radius_session(key) else {
        log::error!("[ran_ue_ngap_id={}] RADIUS session {} is gone", ue.ran_ue_ngap_id, key);
        return None;
    };
    let reply = {
        let session = lock(&session);
        ReplyTo {
            peer: session.peer,
            identifier: session.identifier,
            request_authenticator: session.request_authenticator,
        }
    };
    Some((session, reply))
}

fn next_eap_identifier(session: &SharedRadiusSession) -> u8 {
    let mut session = lock(session);
    session.eap_identifier = session.eap_identifier.wrapping_add(1);
    session.eap_identifier
}

/// Relay a downlink NAS PDU as an EAP-5G NAS Access-Challenge
pub fn send_nas_challenge(ctx: &GatewayContext, ue: &UeSession, nas_pdu: &[u8]) {
    let Some((session, reply)) = pending_reply(ctx, ue) else {
        return;
    };
    let identifier = next_eap_identifier(&session);
    let result = Eap5gRequest::Nas(Bytes::copy_from_slice(nas_pdu))
        .to_eap(identifier)
        .map_err(TngfError::from)
        .and_then(|eap| send_reply(ctx, reply, RADIUS_ACCESS_CHALLENGE, &eap, Vec::new()));
    if let Err(e) = result {
        log::error!("[ran_ue_ngap_id={}] EAP-5G NAS not sent: {}", ue.ran_ue_ngap_id, e);
    }
}

/// Tell the UE the TNGF address to run IKE with. The session then waits for
/// the Notification response.
pub fn send_notification_challenge(ctx: &GatewayContext, ue: &UeSession) {
    let Some((session, reply)) = pending_reply(ctx, ue) else {
        return;
    };
    let identifier = next_eap_identifier(&session);
    let result = Eap5gRequest::Notification(ctx.settings.ike_bind_address)
        .to_eap(identifier)
        .map_err(TngfError::from)
        .and_then(|eap| send_reply(ctx, reply, RADIUS_ACCESS_CHALLENGE, &eap, Vec::new()));
    match result {
        Ok(()) => lock(&session).state = Eap5gState::InitialContextSetup,
        Err(e) => log::error!("[ran_ue_ngap_id={}] EAP-5G Notification not sent: {}", ue.ran_ue_ngap_id, e),
    }
}
