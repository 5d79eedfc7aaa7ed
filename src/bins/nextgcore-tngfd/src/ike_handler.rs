//! IKE Handler - IKEv2 responder on NWt
//!
//! IKE_SA_INIT and IKE_AUTH build the IKE SA and the signalling Child SA.
//! The UE has already been authenticated over EAP-5G, so IKE_AUTH only checks
//! a shared-key AUTH keyed with Ktipsec. Once the SA is established the
//! gateway initiates one CREATE_CHILD_SA per PDU session.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::Bytes;
use tokio::time::Instant;

use ogs_asn1c::ngap::cause::{Cause, CauseRadioNetwork, CauseTransport};
use ogs_crypt::ogs_kdf_ktipsec;
use ogs_ike::{
    Authentication, ConfigAttribute, Configuration, Delete, ExchangeType, Identification, IkeHeader, IkeMessage,
    KeyExchange, Notification, Payload, Proposal, QosInfo, TrafficSelector, AUTH_METHOD_SHARED_KEY_MIC, CFG_REPLY,
    ID_FQDN, IKE_FLAG_RESPONSE, IKE_MAJOR_VERSION, INTERNAL_IP4_ADDRESS, INTERNAL_IP4_NETMASK,
    NOTIFY_AUTHENTICATION_FAILED, NOTIFY_INTERNAL_ADDRESS_FAILURE, NOTIFY_INVALID_IKE_SPI, NOTIFY_INVALID_KE_PAYLOAD,
    NOTIFY_INVALID_MAJOR_VERSION, NOTIFY_INVALID_SYNTAX, NOTIFY_NAT_DETECTION_DESTINATION_IP,
    NOTIFY_NAT_DETECTION_SOURCE_IP, NOTIFY_NO_PROPOSAL_CHOSEN, PROTOCOL_IKE,
};

use crate::context::{
    lock, ChildSecurityAssociation, GatewayContext, IkePeer, IkeSaState, IkeSecurityAssociation, NatPorts, TngfError,
    TngfResult, UeSession, XfrmInterface, HALF_OPEN_TIMEOUT,
};
use crate::ike_security::{
    decrypt_message, encrypt_message, identification_body, nat_detection_hash, random_bytes, select_child_proposal,
    select_ike_proposal, shared_key_auth, ChildKeys, ChildTransforms, DhKeyPair, IkeKeys, IkeTransforms, NONCE_LEN,
};
use crate::ngap_build;
use crate::xfrm::XfrmInterfaceConfig;

/// Key of the signalling Child SA while it is half-created
const SIGNALLING_CHILD_SA_ID: u32 = 1;

// ============================================================================
// Dispatch
// ============================================================================

/// Handle one IKE datagram, with any non-ESP marker already stripped
pub fn dispatch(ctx: &GatewayContext, peer: IkePeer, data: &[u8]) {
    let message = match IkeMessage::decode(data) {
        Ok(message) => message,
        Err(e) => {
            log::error!("[{}] IKE decode failed: {}", peer.remote, e);
            return;
        }
    };
    let header = message.header;

    if header.major_version > IKE_MAJOR_VERSION {
        log::warn!("[{}] IKE major version {} not supported", peer.remote, header.major_version);
        if !header.is_response() {
            send_notify(ctx, peer, &header, header.responder_spi, NOTIFY_INVALID_MAJOR_VERSION, Bytes::new());
        }
        return;
    }

    let exchange = match ExchangeType::try_from(header.exchange_type) {
        Ok(exchange) => exchange,
        Err(e) => {
            log::warn!("[{}] {}", peer.remote, e);
            return;
        }
    };
    log::debug!("[{}] {:?} received (message id {})", peer.remote, exchange, header.message_id);

    let result = match exchange {
        ExchangeType::IkeSaInit => handle_ike_sa_init(ctx, peer, data, &message),
        ExchangeType::IkeAuth => handle_ike_auth(ctx, peer, data, &message),
        ExchangeType::CreateChildSa => handle_create_child_sa(ctx, peer, data, &message),
        ExchangeType::Informational => handle_informational(ctx, peer, data, &message),
    };
    if let Err(e) = result {
        log::error!("[{}] {:?} failed: {}", peer.remote, exchange, e);
    }
}

/// Payloads of one message, by type
#[derive(Default)]
struct PayloadSet<'a> {
    sa: Option<&'a [Proposal]>,
    ke: Option<&'a KeyExchange>,
    nonce: Option<&'a Bytes>,
    idi: Option<&'a Identification>,
    auth: Option<&'a Authentication>,
    tsi: Option<&'a [TrafficSelector]>,
    tsr: Option<&'a [TrafficSelector]>,
    cp: Option<&'a Configuration>,
    notifies: Vec<&'a Notification>,
    deletes: Vec<&'a Delete>,
}

impl<'a> PayloadSet<'a> {
    fn new(payloads: &'a [Payload]) -> Self {
        let mut set = Self::default();
        for payload in payloads {
            match payload {
                Payload::SecurityAssociation(proposals) => set.sa = Some(proposals),
                Payload::KeyExchange(ke) => set.ke = Some(ke),
                Payload::Nonce(nonce) => set.nonce = Some(nonce),
                Payload::IdInitiator(id) => set.idi = Some(id),
                Payload::Authentication(auth) => set.auth = Some(auth),
                Payload::TrafficSelectorInitiator(ts) => set.tsi = Some(ts),
                Payload::TrafficSelectorResponder(ts) => set.tsr = Some(ts),
                Payload::Configuration(cp) => set.cp = Some(cp),
                Payload::Notify(notify) => set.notifies.push(notify),
                Payload::Delete(delete) => set.deletes.push(delete),
                other => log::trace!("Payload type {} ignored", other.payload_type()),
            }
        }
        set
    }

    fn notify(&self, notify_type: u16) -> impl Iterator<Item = &'a Notification> + '_ {
        self.notifies.iter().copied().filter(move |n| n.notify_type == notify_type)
    }
}

fn required<T>(payload: Option<T>, name: &'static str) -> TngfResult<T> {
    payload.ok_or(TngfError::MissingPayload(name))
}

fn ipv4_of(addr: SocketAddr) -> TngfResult<Ipv4Addr> {
    match addr.ip() {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(ip) => Err(TngfError::Transport(format!("IPv6 peer {ip} not supported"))),
    }
}

fn proposal_spi(proposal: &Proposal) -> TngfResult<u32> {
    <[u8; 4]>::try_from(&proposal.spi[..])
        .map(u32::from_be_bytes)
        .map_err(|_| TngfError::NoProposal)
}

/// Unprotected response carrying a single notify
fn send_notify(
    ctx: &GatewayContext,
    peer: IkePeer,
    request: &IkeHeader,
    responder_spi: u64,
    notify_type: u16,
    data: Bytes,
) {
    let header = IkeHeader::new(
        request.initiator_spi,
        responder_spi,
        request.exchange_type,
        IKE_FLAG_RESPONSE,
        request.message_id,
    );
    let mut response = IkeMessage::new(header);
    response.push(Payload::Notify(Notification::new(notify_type, data)));
    match response.encode() {
        Ok(datagram) => ctx.send_ike(peer, datagram.freeze()),
        Err(e) => log::error!("[{}] Encode notify {} failed: {}", peer.remote, notify_type, e),
    }
}

/// SK-protected message toward the SA's peer
fn send_encrypted(
    ctx: &GatewayContext,
    sa: &IkeSecurityAssociation,
    exchange: ExchangeType,
    flags: u8,
    message_id: u32,
    payloads: &[Payload],
) {
    let header = IkeHeader::new(sa.remote_spi, sa.local_spi, exchange as u8, flags, message_id);
    match encrypt_message(&sa.transforms, &sa.keys, header, payloads) {
        Ok(datagram) => ctx.send_ike(sa.peer, datagram.freeze()),
        Err(e) => log::error!("[spi={:016x}] Encrypt {:?} failed: {}", sa.local_spi, exchange, e),
    }
}

fn send_encrypted_notify(ctx: &GatewayContext, sa: &IkeSecurityAssociation, message_id: u32, notify_type: u16) {
    let notify = Payload::Notify(Notification::new(notify_type, Bytes::new()));
    send_encrypted(ctx, sa, ExchangeType::IkeAuth, IKE_FLAG_RESPONSE, message_id, &[notify]);
}

// ============================================================================
// IKE_SA_INIT
// ============================================================================

fn handle_ike_sa_init(ctx: &GatewayContext, peer: IkePeer, raw: &[u8], message: &IkeMessage) -> TngfResult<()> {
    let request = message.header;
    if request.is_response() {
        log::warn!("[{}] Unexpected IKE_SA_INIT response", peer.remote);
        return Ok(());
    }

    let payloads = PayloadSet::new(&message.payloads);
    let (Some(proposals), Some(key_exchange), Some(ni)) = (payloads.sa, payloads.ke, payloads.nonce) else {
        log::error!("[{}] IKE_SA_INIT lacks SA, KE or Nonce", peer.remote);
        send_notify(ctx, peer, &request, 0, NOTIFY_INVALID_SYNTAX, Bytes::new());
        return Ok(());
    };

    let Some((proposal_number, transforms)) = select_ike_proposal(proposals) else {
        log::warn!("[{}] No acceptable IKE proposal", peer.remote);
        send_notify(ctx, peer, &request, 0, NOTIFY_NO_PROPOSAL_CHOSEN, Bytes::new());
        return Ok(());
    };
    let group = transforms.dh_group.id();
    if key_exchange.dh_group != group {
        log::warn!(
            "[{}] KE group {} differs from the chosen group {}",
            peer.remote,
            key_exchange.dh_group,
            group
        );
        let data = Bytes::copy_from_slice(&group.to_be_bytes());
        send_notify(ctx, peer, &request, 0, NOTIFY_INVALID_KE_PAYLOAD, data);
        return Ok(());
    }

    // The request hashes use a zero responder SPI
    let spi_i = request.initiator_spi;
    let remote_ip = ipv4_of(peer.remote)?;
    let local_ip = ctx.settings.ike_bind_address;
    let ue_hash = nat_detection_hash(spi_i, request.responder_spi, remote_ip, peer.remote.port());
    let mut sources = payloads.notify(NOTIFY_NAT_DETECTION_SOURCE_IP).peekable();
    let ue_behind_nat = sources.peek().is_some() && !sources.any(|n| n.data[..] == ue_hash[..]);
    let gateway_hash = nat_detection_hash(spi_i, request.responder_spi, local_ip, peer.local_port);
    let tngf_behind_nat = payloads
        .notify(NOTIFY_NAT_DETECTION_DESTINATION_IP)
        .any(|n| n.data[..] != gateway_hash[..]);

    let dh = DhKeyPair::generate(transforms.dh_group);
    let shared_secret = dh.shared_secret(&key_exchange.data)?;
    let ni = ni.clone();
    let nr = Bytes::from(random_bytes(NONCE_LEN));

    let (local_spi, shared_sa) = ctx.new_ike_sa(|local_spi| IkeSecurityAssociation {
        local_spi,
        remote_spi: spi_i,
        state: IkeSaState::InitSent,
        transforms,
        keys: IkeKeys::default(),
        ni: ni.clone(),
        nr: nr.clone(),
        initiator_signed_octets: Vec::new(),
        responder_signed_octets: Vec::new(),
        initiator_message_id: request.message_id.wrapping_add(1),
        responder_message_id: 0,
        peer,
        ue_behind_nat,
        tngf_behind_nat,
        ran_ue_ngap_id: None,
        created_at: Instant::now(),
    })?;

    let response = ike_sa_init_response(ctx, &request, peer, local_spi, proposal_number, &transforms, &dh, &nr)
        .and_then(|response| {
            let keys = IkeKeys::derive(&transforms, &ni, &nr, &shared_secret, spi_i, local_spi)?;
            let mut sa = lock(&shared_sa);
            sa.keys = keys;
            // The ID parts are appended at IKE_AUTH
            sa.initiator_signed_octets = [raw, &nr[..]].concat();
            sa.responder_signed_octets = [&response[..], &ni[..]].concat();
            Ok(response)
        });

    match response {
        Ok(response) => {
            log::info!(
                "[{}] IKE SA {:016x} created (UE behind NAT: {}, TNGF behind NAT: {})",
                peer.remote,
                local_spi,
                ue_behind_nat,
                tngf_behind_nat
            );
            ctx.send_ike(peer, response);
            Ok(())
        }
        Err(e) => {
            ctx.remove_ike_sa(local_spi);
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn ike_sa_init_response(
    ctx: &GatewayContext,
    request: &IkeHeader,
    peer: IkePeer,
    local_spi: u64,
    proposal_number: u8,
    transforms: &IkeTransforms,
    dh: &DhKeyPair,
    nr: &Bytes,
) -> TngfResult<Bytes> {
    let spi_i = request.initiator_spi;
    let remote_ip = ipv4_of(peer.remote)?;
    let source = nat_detection_hash(spi_i, local_spi, ctx.settings.ike_bind_address, peer.local_port);
    let destination = nat_detection_hash(spi_i, local_spi, remote_ip, peer.remote.port());

    let header = IkeHeader::new(
        spi_i,
        local_spi,
        ExchangeType::IkeSaInit as u8,
        IKE_FLAG_RESPONSE,
        request.message_id,
    );
    let mut response = IkeMessage::new(header);
    response
        .push(Payload::SecurityAssociation(vec![transforms.to_proposal(proposal_number)]))
        .push(Payload::KeyExchange(KeyExchange {
            dh_group: transforms.dh_group.id(),
            data: Bytes::copy_from_slice(dh.public_value()),
        }))
        .push(Payload::Nonce(nr.clone()))
        .push(Payload::Notify(Notification::new(NOTIFY_NAT_DETECTION_SOURCE_IP, source.to_vec())))
        .push(Payload::Notify(Notification::new(
            NOTIFY_NAT_DETECTION_DESTINATION_IP,
            destination.to_vec(),
        )));
    Ok(response.encode()?.freeze())
}

// ============================================================================
// IKE_AUTH
// ============================================================================

fn handle_ike_auth(ctx: &GatewayContext, peer: IkePeer, raw: &[u8], message: &IkeMessage) -> TngfResult<()> {
    let request = message.header;
    if request.is_response() {
        log::warn!("[{}] Unexpected IKE_AUTH response", peer.remote);
        return Ok(());
    }
    let Some(shared_sa) = ctx.ike_sa_by_spi(request.responder_spi) else {
        log::warn!("[{}] IKE_AUTH for unknown SPI {:016x}", peer.remote, request.responder_spi);
        send_notify(ctx, peer, &request, request.responder_spi, NOTIFY_INVALID_IKE_SPI, Bytes::new());
        return Ok(());
    };

    let (sa, payloads) = {
        let mut sa = lock(&shared_sa);
        if sa.state != IkeSaState::InitSent {
            log::warn!("[spi={:016x}] IKE_AUTH in state {:?}, dropped", sa.local_spi, sa.state);
            return Ok(());
        }
        if request.message_id != sa.initiator_message_id {
            log::warn!(
                "[spi={:016x}] IKE_AUTH message id {} (expected {}), dropped",
                sa.local_spi,
                request.message_id,
                sa.initiator_message_id
            );
            return Ok(());
        }
        let payloads = decrypt_message(&sa.transforms, &sa.keys, raw, message)?;
        // A malformed request is answered but leaves the message id open
        // for the UE's corrected retransmission
        if let Some(missing) = missing_auth_payload(&PayloadSet::new(&payloads)) {
            log::error!("[spi={:016x}] IKE_AUTH lacks {}", sa.local_spi, missing);
            send_encrypted_notify(ctx, &sa, request.message_id, NOTIFY_INVALID_SYNTAX);
            return Err(TngfError::MissingPayload(missing));
        }
        sa.initiator_message_id = sa.initiator_message_id.wrapping_add(1);
        sa.peer = peer;
        (sa.clone(), payloads)
    };
    let message_id = request.message_id;
    let set = PayloadSet::new(&payloads);

    let idi = required(set.idi, "IDi")?;
    let Some(shared_ue) = ctx.ue_by_identity(&idi.data) else {
        log::error!("[spi={:016x}] No UE with identity {:02x?}", sa.local_spi, &idi.data[..]);
        send_encrypted_notify(ctx, &sa, message_id, NOTIFY_AUTHENTICATION_FAILED);
        ctx.remove_ike_sa(sa.local_spi);
        return Ok(());
    };
    let proposals = required(set.sa, "SA")?;
    let auth = required(set.auth, "AUTH")?;

    let Some((proposal, child_transforms)) = select_child_proposal(proposals) else {
        log::warn!("[spi={:016x}] No acceptable Child SA proposal", sa.local_spi);
        send_encrypted_notify(ctx, &sa, message_id, NOTIFY_NO_PROPOSAL_CHOSEN);
        return Ok(());
    };
    let outbound_spi = proposal_spi(proposal)?;

    let idr = Identification {
        id_type: ID_FQDN,
        data: Bytes::copy_from_slice(ctx.settings.fqdn.as_bytes()),
    };

    let mut ue = lock(&shared_ue);
    let ran_ue_ngap_id = ue.ran_ue_ngap_id;
    let responder_auth = match ue.ktngf {
        Some(ktngf) => {
            let ktipsec = ogs_kdf_ktipsec(&ktngf)?;
            ue.ktipsec = Some(ktipsec);
            verify_auth(&sa, &ktipsec, idi, &idr, auth)?
        }
        None => {
            log::error!("[ran_ue_ngap_id={}] No Ktngf for IKE_AUTH", ran_ue_ngap_id);
            None
        }
    };
    let Some(responder_auth) = responder_auth else {
        drop(ue);
        log::error!("[ran_ue_ngap_id={}] IKE_AUTH authentication failed", ran_ue_ngap_id);
        send_encrypted_notify(ctx, &sa, message_id, NOTIFY_AUTHENTICATION_FAILED);
        ctx.remove_ike_sa(sa.local_spi);
        ctx.remove_ue(ran_ue_ngap_id);
        return Ok(());
    };
    lock(&shared_sa).state = IkeSaState::AuthComplete;

    let inner_ip = match ue.inner_ip {
        Some(ip) => ip,
        None => match ctx.allocate_inner_ip(ran_ue_ngap_id) {
            Ok(ip) => {
                ue.inner_ip = Some(ip);
                ip
            }
            Err(e) => {
                send_encrypted_notify(ctx, &sa, message_id, NOTIFY_INTERNAL_ADDRESS_FAILURE);
                return Err(e);
            }
        },
    };
    let inbound_spi = ctx.allocate_child_spi(ran_ue_ngap_id)?;

    let settings = &ctx.settings;
    let gateway = settings.ipsec_gateway_address;
    let response = [
        Payload::IdResponder(idr),
        Payload::Authentication(Authentication {
            method: AUTH_METHOD_SHARED_KEY_MIC,
            data: Bytes::from(responder_auth),
        }),
        Payload::Configuration(Configuration {
            cfg_type: CFG_REPLY,
            attributes: vec![
                ConfigAttribute {
                    attr_type: INTERNAL_IP4_ADDRESS,
                    value: Bytes::copy_from_slice(&inner_ip.octets()),
                },
                ConfigAttribute {
                    attr_type: INTERNAL_IP4_NETMASK,
                    value: Bytes::copy_from_slice(&settings.ue_subnet.netmask().octets()),
                },
            ],
        }),
        Payload::SecurityAssociation(vec![child_transforms.to_proposal(proposal.proposal_number, inbound_spi)]),
        Payload::TrafficSelectorInitiator(vec![TrafficSelector::host(inner_ip)]),
        Payload::TrafficSelectorResponder(vec![TrafficSelector::host(gateway)]),
        Payload::Notify(Notification::nas_ip4_address(gateway)),
        Payload::Notify(Notification::nas_tcp_port(settings.nas_tcp_port)),
    ];

    ctx.create_half_child_sa(&mut ue, SIGNALLING_CHILD_SA_ID, inbound_spi, Vec::new(), sa.nr.clone());
    if let Err(e) = install_signalling_child_sa(ctx, &mut ue, &sa, proposal, outbound_spi, inner_ip) {
        log::error!("[ran_ue_ngap_id={}] Signalling Child SA failed: {}", ran_ue_ngap_id, e);
        ue.half_child_sas.remove(&SIGNALLING_CHILD_SA_ID);
        ctx.remove_child_sa(&mut ue, inbound_spi);
    }

    send_encrypted(ctx, &sa, ExchangeType::IkeAuth, IKE_FLAG_RESPONSE, message_id, &response);

    {
        let mut shared = lock(&shared_sa);
        shared.state = IkeSaState::Established;
        shared.ran_ue_ngap_id = Some(ran_ue_ngap_id);
    }
    if let Some(previous) = ue.ike_spi.replace(sa.local_spi) {
        if previous != sa.local_spi {
            ctx.remove_ike_sa(previous);
        }
    }
    ue.ike_peer = Some(peer);
    ue.ike_established = true;
    log::info!(
        "[ran_ue_ngap_id={}] IKE SA {:016x} established, inner IP {}",
        ran_ue_ngap_id,
        sa.local_spi,
        inner_ip
    );

    if ue.pdu_setup.is_some() {
        continue_pdu_setup(ctx, &mut ue);
    }
    Ok(())
}

/// First payload an IKE_AUTH request must carry but does not
fn missing_auth_payload(set: &PayloadSet<'_>) -> Option<&'static str> {
    if set.idi.is_none() {
        Some("IDi")
    } else if set.auth.is_none() {
        Some("AUTH")
    } else if set.sa.is_none() {
        Some("SA")
    } else if set.tsi.is_none() {
        Some("TSi")
    } else if set.tsr.is_none() {
        Some("TSr")
    } else if !set.cp.is_some_and(|cp| cp.attribute(INTERNAL_IP4_ADDRESS).is_some()) {
        Some("CP(INTERNAL_IP4_ADDRESS)")
    } else {
        None
    }
}

/// Check the UE's AUTH and return ours, or None on mismatch
fn verify_auth(
    sa: &IkeSecurityAssociation,
    ktipsec: &[u8],
    idi: &Identification,
    idr: &Identification,
    auth: &Authentication,
) -> TngfResult<Option<Vec<u8>>> {
    let prf = sa.transforms.prf;
    let mut initiator_octets = sa.initiator_signed_octets.clone();
    initiator_octets.extend(prf.compute(&sa.keys.sk_pi, &identification_body(idi))?);
    let mut responder_octets = sa.responder_signed_octets.clone();
    responder_octets.extend(prf.compute(&sa.keys.sk_pr, &identification_body(idr))?);

    let expected = shared_key_auth(prf, ktipsec, &initiator_octets)?;
    if auth.method != AUTH_METHOD_SHARED_KEY_MIC || auth.data[..] != expected[..] {
        return Ok(None);
    }
    Ok(Some(shared_key_auth(prf, ktipsec, &responder_octets)?))
}

/// Addresses, selectors and NAT-T ports shared by every Child SA of the UE
fn set_tunnel_endpoints(
    ctx: &GatewayContext,
    child: &mut ChildSecurityAssociation,
    sa: &IkeSecurityAssociation,
    inner_ip: Ipv4Addr,
) -> TngfResult<()> {
    child.local_public_address = ctx.settings.ike_bind_address;
    child.peer_public_address = ipv4_of(sa.peer.remote)?;
    child.local_selector = TrafficSelector::host(ctx.settings.ipsec_gateway_address);
    child.peer_selector = TrafficSelector::host(inner_ip);
    child.nat = sa.nat_detected().then_some(NatPorts {
        local_port: sa.peer.local_port,
        peer_port: sa.peer.remote.port(),
    });
    Ok(())
}

/// Complete the NAS Child SA and install it on the default interface
fn install_signalling_child_sa(
    ctx: &GatewayContext,
    ue: &mut UeSession,
    sa: &IkeSecurityAssociation,
    proposal: &Proposal,
    outbound_spi: u32,
    inner_ip: Ipv4Addr,
) -> TngfResult<()> {
    let if_id = ctx.settings.xfrm_interface_id;
    let ifindex = ctx.xfrm_interface(if_id).map(|interface| interface.ifindex);

    let child = ctx.complete_child_sa(ue, SIGNALLING_CHILD_SA_ID, outbound_spi, std::slice::from_ref(proposal))?;
    child.keys = ChildKeys::derive(sa.transforms.prf, &sa.keys.sk_d, &sa.ni, &sa.nr, &child.transforms)?;
    set_tunnel_endpoints(ctx, child, sa, inner_ip)?;
    child.xfrm_if_id = if_id;
    child.xfrm_ifindex = ifindex;
    child.local_is_initiator = false;
    ctx.xfrm.apply_child_sa(child, false, if_id)
}

// ============================================================================
// CREATE_CHILD_SA
// ============================================================================

/// Start the next queued PDU session Child SA. With nothing left, answer the
/// NGAP procedure that queued the sessions. The caller holds the UE lock.
pub fn continue_pdu_setup(ctx: &GatewayContext, ue: &mut UeSession) {
    loop {
        let next = match ue.pdu_setup.as_ref() {
            Some(pending) => pending.queue.front().copied(),
            None => return,
        };
        let Some(pdu_session_id) = next else {
            if let Some(pending) = ue.pdu_setup.take() {
                ngap_build::send_pdu_setup_result(ctx, ue, pending);
            }
            return;
        };

        match send_create_child_sa(ctx, ue, pdu_session_id) {
            Ok(()) => return,
            Err(e) => {
                log::error!(
                    "[ran_ue_ngap_id={}] CREATE_CHILD_SA for PDU session {} failed: {}",
                    ue.ran_ue_ngap_id,
                    pdu_session_id,
                    e
                );
                if let Some(pending) = ue.pdu_setup.as_mut() {
                    pending.queue.pop_front();
                    pending.failed_list.push(ngap_build::failed_item(
                        pdu_session_id,
                        Cause::Transport(CauseTransport::TransportResourceUnavailable),
                    ));
                }
            }
        }
    }
}

fn send_create_child_sa(ctx: &GatewayContext, ue: &mut UeSession, pdu_session_id: u8) -> TngfResult<()> {
    let ran_ue_ngap_id = ue.ran_ue_ngap_id;
    let session = ue
        .pdu_sessions
        .get(&pdu_session_id)
        .ok_or_else(|| TngfError::not_found("PDU session", pdu_session_id))?;
    let transforms = ChildTransforms::for_pdu_session(session.integrity_required);
    let qos = QosInfo {
        pdu_session_id,
        qfis: session.qfis.clone(),
        dcsi: true,
        dscp: None,
    };
    let inner_ip = ue
        .inner_ip
        .ok_or_else(|| TngfError::not_found("inner IP of UE", ran_ue_ngap_id))?;
    let spi = ue
        .ike_spi
        .ok_or_else(|| TngfError::not_found("IKE SA of UE", ran_ue_ngap_id))?;
    let shared_sa = ctx.ike_sa_by_spi(spi).ok_or_else(|| TngfError::not_found("IKE SA", spi))?;

    let inbound_spi = ctx.allocate_child_spi(ran_ue_ngap_id)?;
    let nonce = Bytes::from(random_bytes(NONCE_LEN));
    let gateway = ctx.settings.ipsec_gateway_address;
    let payloads = [
        Payload::SecurityAssociation(vec![transforms.to_proposal(1, inbound_spi)]),
        Payload::Nonce(nonce.clone()),
        Payload::TrafficSelectorInitiator(vec![TrafficSelector::host(gateway)]),
        Payload::TrafficSelectorResponder(vec![TrafficSelector::host(inner_ip)]),
        Payload::Notify(Notification::qos_info(&qos)?),
        Payload::Notify(Notification::up_ip4_address(gateway)),
    ];

    let sent = {
        let mut sa = lock(&shared_sa);
        let message_id = sa.responder_message_id;
        let header = IkeHeader::new(sa.remote_spi, sa.local_spi, ExchangeType::CreateChildSa as u8, 0, message_id);
        encrypt_message(&sa.transforms, &sa.keys, header, &payloads).map(|datagram| {
            sa.responder_message_id = message_id.wrapping_add(1);
            (message_id, sa.peer, datagram.freeze())
        })
    };
    let (message_id, peer, datagram) = match sent {
        Ok(sent) => sent,
        Err(e) => {
            ctx.remove_child_sa(ue, inbound_spi);
            return Err(e);
        }
    };

    ctx.create_half_child_sa(ue, message_id, inbound_spi, vec![pdu_session_id], nonce);
    ctx.send_ike(peer, datagram);
    log::info!(
        "[ran_ue_ngap_id={}] CREATE_CHILD_SA sent for PDU session {} (message id {})",
        ran_ue_ngap_id,
        pdu_session_id,
        message_id
    );
    Ok(())
}

fn handle_create_child_sa(ctx: &GatewayContext, peer: IkePeer, raw: &[u8], message: &IkeMessage) -> TngfResult<()> {
    let header = message.header;
    if !header.is_response() {
        log::warn!("[{}] UE-initiated CREATE_CHILD_SA not supported, dropped", peer.remote);
        return Ok(());
    }
    let spi = header.responder_spi;
    let (Some(shared_ue), Some(shared_sa)) = (ctx.ue_by_ike_spi(spi), ctx.ike_sa_by_spi(spi)) else {
        log::warn!("[{}] CREATE_CHILD_SA response for unknown SPI {:016x}", peer.remote, spi);
        return Ok(());
    };

    let mut ue = lock(&shared_ue);
    let sa = {
        let sa = lock(&shared_sa);
        if sa.state != IkeSaState::Established {
            log::warn!("[spi={:016x}] CREATE_CHILD_SA in state {:?}, dropped", spi, sa.state);
            return Ok(());
        }
        sa.clone()
    };
    let payloads = decrypt_message(&sa.transforms, &sa.keys, raw, message)?;

    let message_id = header.message_id;
    let Some(half) = ue.half_child_sas.get(&message_id) else {
        log::warn!(
            "[ran_ue_ngap_id={}] No CREATE_CHILD_SA pending with message id {}",
            ue.ran_ue_ngap_id,
            message_id
        );
        return Ok(());
    };
    let inbound_spi = half.inbound_spi;
    let pdu_session_ids = half.pdu_session_ids.clone();

    match install_pdu_child_sa(ctx, &mut ue, &sa, message_id, &payloads) {
        Ok(()) => {
            for id in &pdu_session_ids {
                record_session_setup(ctx, &mut ue, *id, inbound_spi);
            }
        }
        Err(e) => {
            log::error!(
                "[ran_ue_ngap_id={}] Child SA for PDU sessions {:?} failed: {}",
                ue.ran_ue_ngap_id,
                pdu_session_ids,
                e
            );
            ue.half_child_sas.remove(&message_id);
            ctx.remove_child_sa(&mut ue, inbound_spi);
            if let Some(pending) = ue.pdu_setup.as_mut() {
                let cause = Cause::Transport(CauseTransport::TransportResourceUnavailable);
                for id in &pdu_session_ids {
                    pending.failed_list.push(ngap_build::failed_item(*id, cause));
                }
            }
        }
    }

    if let Some(pending) = ue.pdu_setup.as_mut() {
        pending.queue.retain(|id| !pdu_session_ids.contains(id));
    }
    continue_pdu_setup(ctx, &mut ue);
    Ok(())
}

/// Complete a PDU session Child SA on its own xfrm interface
fn install_pdu_child_sa(
    ctx: &GatewayContext,
    ue: &mut UeSession,
    sa: &IkeSecurityAssociation,
    message_id: u32,
    payloads: &[Payload],
) -> TngfResult<()> {
    let set = PayloadSet::new(payloads);
    if let Some(error) = set.notifies.iter().find(|n| n.is_error()) {
        return Err(TngfError::Crypto(format!("peer refused the Child SA (notify {})", error.notify_type)));
    }
    let proposals = required(set.sa, "SA")?;
    let nr = required(set.nonce, "Nonce")?;
    required(set.tsi, "TSi")?;
    required(set.tsr, "TSr")?;
    let outbound_spi = proposals.first().ok_or(TngfError::NoProposal).and_then(proposal_spi)?;
    let inner_ip = ue
        .inner_ip
        .ok_or_else(|| TngfError::not_found("inner IP of UE", ue.ran_ue_ngap_id))?;

    let settings = &ctx.settings;
    let if_id = ctx.next_xfrm_interface_id();
    let name = format!("{}-{}", settings.xfrm_interface_name, if_id);

    let child = ctx.complete_child_sa(ue, message_id, outbound_spi, proposals)?;
    child.keys = ChildKeys::derive(sa.transforms.prf, &sa.keys.sk_d, &child.local_nonce, nr, &child.transforms)?;
    set_tunnel_endpoints(ctx, child, sa, inner_ip)?;
    child.local_is_initiator = true;

    let ifindex = ctx.xfrm.setup_interface(&XfrmInterfaceConfig {
        name: name.clone(),
        if_id,
        parent: settings.xfrm_parent_interface.clone(),
        address: Some((settings.ipsec_gateway_address, settings.ue_subnet.prefix_len)),
        route: None,
    })?;
    log::info!("xfrm interface {} (if_id {}, ifindex {}) created", name, if_id, ifindex);
    ctx.register_xfrm_interface(XfrmInterface { name, if_id, ifindex });
    child.xfrm_if_id = if_id;
    child.xfrm_ifindex = Some(ifindex);
    ctx.xfrm.apply_child_sa(child, true, if_id)
}

/// Mark a PDU session as carried by `inbound_spi`, forward its NAS and queue
/// its setup response item
fn record_session_setup(ctx: &GatewayContext, ue: &mut UeSession, pdu_session_id: u8, inbound_spi: u32) {
    let Some(session) = ue.pdu_sessions.get_mut(&pdu_session_id) else {
        log::warn!("[ran_ue_ngap_id={}] PDU session {} vanished", ue.ran_ue_ngap_id, pdu_session_id);
        return;
    };
    session.child_sa_spi = Some(inbound_spi);
    let nas = session.nas_pdu.take();
    let item = ngap_build::setup_response_item(ctx, session);

    if let Some(nas) = nas {
        ue.deliver_nas(nas);
    }
    let ran_ue_ngap_id = ue.ran_ue_ngap_id;
    let Some(pending) = ue.pdu_setup.as_mut() else {
        return;
    };
    match item {
        Ok(item) => pending.setup_list.push(item),
        Err(e) => {
            log::error!("[ran_ue_ngap_id={}] Build setup response transfer failed: {}", ran_ue_ngap_id, e);
            pending.failed_list.push(ngap_build::failed_item(
                pdu_session_id,
                Cause::Transport(CauseTransport::TransportResourceUnavailable),
            ));
        }
    }
}

// ============================================================================
// Half-open expiry
// ============================================================================

/// Drop IKE SAs never authenticated and Child SAs never answered within
/// [`HALF_OPEN_TIMEOUT`]. The PDU sessions of an expired Child SA are
/// reported as failed. Returns how many SAs went away.
pub fn expire_half_open(ctx: &GatewayContext, now: Instant) -> usize {
    let mut expired = 0;
    for spi in ctx.expire_ike_sas(now, HALF_OPEN_TIMEOUT) {
        log::info!("[spi={:016x}] IKE SA expired before IKE_AUTH", spi);
        expired += 1;
    }

    for shared_ue in ctx.ues() {
        let mut ue = lock(&shared_ue);
        let halves = ctx.take_expired_half_child_sas(&mut ue, now, HALF_OPEN_TIMEOUT);
        if halves.is_empty() {
            continue;
        }
        expired += halves.len();
        let pdu_session_ids: Vec<u8> = halves
            .iter()
            .flat_map(|half| half.pdu_session_ids.iter().copied())
            .collect();
        log::warn!(
            "[ran_ue_ngap_id={}] No CREATE_CHILD_SA response for PDU sessions {:?}",
            ue.ran_ue_ngap_id,
            pdu_session_ids
        );
        if let Some(pending) = ue.pdu_setup.as_mut() {
            let cause = Cause::Transport(CauseTransport::TransportResourceUnavailable);
            pending.queue.retain(|id| !pdu_session_ids.contains(id));
            for id in &pdu_session_ids {
                pending.failed_list.push(ngap_build::failed_item(*id, cause));
            }
        }
        continue_pdu_setup(ctx, &mut ue);
    }
    expired
}

// ============================================================================
// INFORMATIONAL
// ============================================================================

fn handle_informational(ctx: &GatewayContext, peer: IkePeer, raw: &[u8], message: &IkeMessage) -> TngfResult<()> {
    let header = message.header;
    let Some(shared_sa) = ctx.ike_sa_by_spi(header.responder_spi) else {
        log::warn!("[{}] INFORMATIONAL for unknown SPI {:016x}", peer.remote, header.responder_spi);
        if !header.is_response() {
            send_notify(ctx, peer, &header, header.responder_spi, NOTIFY_INVALID_IKE_SPI, Bytes::new());
        }
        return Ok(());
    };
    if header.is_response() {
        log::debug!("[{}] INFORMATIONAL response ignored", peer.remote);
        return Ok(());
    }

    let (sa, payloads) = {
        let mut sa = lock(&shared_sa);
        if header.message_id != sa.initiator_message_id {
            log::warn!(
                "[spi={:016x}] INFORMATIONAL message id {} (expected {}), dropped",
                sa.local_spi,
                header.message_id,
                sa.initiator_message_id
            );
            return Ok(());
        }
        let payloads = decrypt_message(&sa.transforms, &sa.keys, raw, message)?;
        sa.initiator_message_id = sa.initiator_message_id.wrapping_add(1);
        sa.peer = peer;
        (sa.clone(), payloads)
    };
    send_encrypted(ctx, &sa, ExchangeType::Informational, IKE_FLAG_RESPONSE, header.message_id, &[]);

    let set = PayloadSet::new(&payloads);
    if !set.deletes.iter().any(|delete| delete.protocol_id == PROTOCOL_IKE) {
        return Ok(());
    }

    log::info!("[spi={:016x}] IKE SA deleted by the UE", sa.local_spi);
    match sa.ran_ue_ngap_id.and_then(|id| ctx.ue_by_ran_id(id)) {
        Some(shared_ue) => {
            let ran_ue_ngap_id = {
                let ue = lock(&shared_ue);
                ngap_build::send_ue_context_release_request(
                    ctx,
                    &ue,
                    Cause::RadioNetwork(CauseRadioNetwork::RadioConnectionWithUeLost),
                );
                ue.ran_ue_ngap_id
            };
            ctx.remove_ue(ran_ue_ngap_id);
        }
        None => {
            ctx.remove_ike_sa(sa.local_spi);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use ogs_ike::{
        Transform, AUTH_HMAC_SHA1_96, CFG_REQUEST, DH_1024_BIT_MODP, DH_2048_BIT_MODP, ENCR_3DES, ENCR_AES_CBC,
        ESN_NO, ID_KEY_ID, IKE_FLAG_INITIATOR, NOTIFY_5G_QOS_INFO, NOTIFY_NAS_IP4_ADDRESS, NOTIFY_NAS_TCP_PORT,
        PRF_HMAC_SHA1, PROTOCOL_ESP, TRANSFORM_DH, TRANSFORM_ENCR, TRANSFORM_ESN, TRANSFORM_INTEG, TRANSFORM_PRF,
    };
    use ogs_ngap::{decode_ngap_pdu, NgapMessage, SNssai};

    use crate::context::{GtpConnectionInfo, PendingPduSetup, PduSetupProcedure, SharedUe};
    use crate::ike_security::DhGroup;
    use crate::test_support::{
        test_context_with_xfrm, test_settings, RecordingTransport, RecordingXfrm, TestReceivers, XfrmCall,
    };

    const IDENTITY: &[u8] = b"\x02\xf8\x39\x00\x00\x00\x00\x00\x01";
    const KTNGF: [u8; 32] = [0x5a; 32];
    const UE_CHILD_SPI: u32 = 0x0000_c001;

    fn amf_addr() -> SocketAddr {
        "127.0.0.1:38412".parse().unwrap()
    }

    struct Harness {
        ctx: Arc<GatewayContext>,
        rx: TestReceivers,
        amf: Arc<RecordingTransport>,
        xfrm: Arc<RecordingXfrm>,
        ue: SharedUe,
    }

    impl Harness {
        fn new() -> Self {
            let xfrm = Arc::new(RecordingXfrm::default());
            let (ctx, rx) = test_context_with_xfrm(test_settings(), xfrm.clone());
            let amf = Arc::new(RecordingTransport::default());
            ctx.new_amf(amf_addr(), amf.clone());

            let ue = ctx.new_ue().unwrap();
            {
                let mut session = lock(&ue);
                ctx.attach_ue_to_amf(&mut session, amf_addr()).unwrap();
                session.amf_ue_ngap_id = 77;
                session.identity = Some(Bytes::from_static(IDENTITY));
                session.ktngf = Some(KTNGF);
                session.pdu_setup = Some(PendingPduSetup::new(PduSetupProcedure::InitialContextSetup));
            }
            Self {
                ctx,
                rx,
                amf,
                xfrm,
                ue,
            }
        }

        fn ran_ue_ngap_id(&self) -> u32 {
            lock(&self.ue).ran_ue_ngap_id
        }

        /// Queue a PDU session for the Child SA procedure
        fn queue_pdu_session(&self, id: u8) {
            let mut ue = lock(&self.ue);
            let ran_ue_ngap_id = ue.ran_ue_ngap_id;
            let teid = self.ctx.allocate_teid(ran_ue_ngap_id).unwrap();
            let session = ue
                .create_pdu_session(
                    id,
                    SNssai {
                        sst: 1,
                        sd: Some([0x01, 0x02, 0x03]),
                    },
                )
                .unwrap();
            session.qfis = vec![1];
            session.integrity_required = true;
            session.gtp = Some(GtpConnectionInfo {
                upf_address: "10.200.200.102:2152".parse().unwrap(),
                incoming_teid: teid,
                outgoing_teid: 0x77,
            });
            session.nas_pdu = Some(Bytes::from_static(&[0x7e, 0x00, 0x68]));
            if let Some(pending) = ue.pdu_setup.as_mut() {
                pending.queue.push_back(id);
            }
        }

        fn next_ike(&mut self) -> (IkePeer, Vec<u8>) {
            let datagram = self.rx.ike.try_recv().expect("an IKE datagram");
            (datagram.peer, datagram.data.to_vec())
        }

        fn sent_ngap(&self) -> Vec<NgapMessage> {
            self.amf.take().iter().map(|pdu| decode_ngap_pdu(pdu).unwrap()).collect()
        }
    }

    /// The UE side of the exchanges
    struct TestUe {
        peer: IkePeer,
        spi_i: u64,
        spi_r: u64,
        dh: DhKeyPair,
        ni: Bytes,
        nr: Bytes,
        transforms: Option<IkeTransforms>,
        keys: IkeKeys,
        sa_init_request: Vec<u8>,
    }

    impl TestUe {
        fn new() -> Self {
            Self {
                peer: IkePeer {
                    remote: "192.168.1.50:500".parse().unwrap(),
                    local_port: 500,
                },
                spi_i: 0x1122_3344_5566_7788,
                spi_r: 0,
                dh: DhKeyPair::generate(DhGroup::Modp1024),
                ni: Bytes::from(random_bytes(NONCE_LEN)),
                nr: Bytes::new(),
                transforms: None,
                keys: IkeKeys::default(),
                sa_init_request: Vec::new(),
            }
        }

        fn ike_proposal(encryption: u16) -> Proposal {
            let mut proposal = Proposal::new(1, PROTOCOL_IKE, Bytes::new());
            proposal
                .push(Transform::new(TRANSFORM_ENCR, encryption).with_key_length(128))
                .push(Transform::new(TRANSFORM_PRF, PRF_HMAC_SHA1))
                .push(Transform::new(TRANSFORM_INTEG, AUTH_HMAC_SHA1_96))
                .push(Transform::new(TRANSFORM_DH, DH_1024_BIT_MODP));
            proposal
        }

        fn child_proposal(spi: u32) -> Proposal {
            let mut proposal = Proposal::new(1, PROTOCOL_ESP, Bytes::copy_from_slice(&spi.to_be_bytes()));
            proposal
                .push(Transform::new(TRANSFORM_ENCR, ENCR_AES_CBC).with_key_length(128))
                .push(Transform::new(TRANSFORM_INTEG, AUTH_HMAC_SHA1_96))
                .push(Transform::new(TRANSFORM_ESN, ESN_NO));
            proposal
        }

        fn sa_init_with(&mut self, proposal: Proposal, ke_group: u16, source_hash: [u8; 20]) -> Vec<u8> {
            let settings = test_settings();
            let header = IkeHeader::new(self.spi_i, 0, ExchangeType::IkeSaInit as u8, IKE_FLAG_INITIATOR, 0);
            let destination = nat_detection_hash(self.spi_i, 0, settings.ike_bind_address, self.peer.local_port);
            let mut message = IkeMessage::new(header);
            message
                .push(Payload::SecurityAssociation(vec![proposal]))
                .push(Payload::KeyExchange(KeyExchange {
                    dh_group: ke_group,
                    data: Bytes::copy_from_slice(self.dh.public_value()),
                }))
                .push(Payload::Nonce(self.ni.clone()))
                .push(Payload::Notify(Notification::new(NOTIFY_NAT_DETECTION_SOURCE_IP, source_hash.to_vec())))
                .push(Payload::Notify(Notification::new(
                    NOTIFY_NAT_DETECTION_DESTINATION_IP,
                    destination.to_vec(),
                )));
            self.sa_init_request = message.encode().unwrap().to_vec();
            self.sa_init_request.clone()
        }

        fn sa_init(&mut self) -> Vec<u8> {
            let ip = ipv4_of(self.peer.remote).unwrap();
            let source = nat_detection_hash(self.spi_i, 0, ip, self.peer.remote.port());
            self.sa_init_with(Self::ike_proposal(ENCR_AES_CBC), DH_1024_BIT_MODP, source)
        }

        /// Derive the SA from the gateway's IKE_SA_INIT response
        fn accept_sa_init(&mut self, response: &[u8]) {
            let message = IkeMessage::decode(response).unwrap();
            self.spi_r = message.header.responder_spi;
            let set = PayloadSet::new(&message.payloads);
            let (_, transforms) = select_ike_proposal(set.sa.unwrap()).unwrap();
            self.nr = set.nonce.unwrap().clone();
            let shared = self.dh.shared_secret(&set.ke.unwrap().data).unwrap();
            let keys = IkeKeys::derive(&transforms, &self.ni, &self.nr, &shared, self.spi_i, self.spi_r).unwrap();
            // Swapped so the responder-side helpers act as the initiator
            self.keys = IkeKeys {
                sk_ai: keys.sk_ar.clone(),
                sk_ar: keys.sk_ai.clone(),
                sk_ei: keys.sk_er.clone(),
                sk_er: keys.sk_ei.clone(),
                ..keys
            };
            self.transforms = Some(transforms);
        }

        fn idi() -> Identification {
            Identification {
                id_type: ID_KEY_ID,
                data: Bytes::from_static(IDENTITY),
            }
        }

        fn auth_data(&self, ktngf: &[u8; 32]) -> Vec<u8> {
            let prf = self.transforms.unwrap().prf;
            // sk_pi is not swapped
            let mut octets = self.sa_init_request.clone();
            octets.extend_from_slice(&self.nr);
            octets.extend(prf.compute(&self.keys.sk_pi, &identification_body(&Self::idi())).unwrap());
            let ktipsec = ogs_kdf_ktipsec(ktngf).unwrap();
            shared_key_auth(prf, &ktipsec, &octets).unwrap()
        }

        fn encrypt(&self, exchange: ExchangeType, flags: u8, message_id: u32, payloads: &[Payload]) -> Vec<u8> {
            let header = IkeHeader::new(self.spi_i, self.spi_r, exchange as u8, flags, message_id);
            encrypt_message(&self.transforms.unwrap(), &self.keys, header, payloads)
                .unwrap()
                .to_vec()
        }

        fn decrypt(&self, data: &[u8]) -> (IkeHeader, Vec<Payload>) {
            let message = IkeMessage::decode(data).unwrap();
            let payloads = decrypt_message(&self.transforms.unwrap(), &self.keys, data, &message).unwrap();
            (message.header, payloads)
        }

        fn ike_auth_with(&self, ktngf: &[u8; 32]) -> Vec<u8> {
            let payloads = [
                Payload::IdInitiator(Self::idi()),
                Payload::Authentication(Authentication {
                    method: AUTH_METHOD_SHARED_KEY_MIC,
                    data: Bytes::from(self.auth_data(ktngf)),
                }),
                Payload::Configuration(Configuration {
                    cfg_type: CFG_REQUEST,
                    attributes: vec![ConfigAttribute {
                        attr_type: INTERNAL_IP4_ADDRESS,
                        value: Bytes::new(),
                    }],
                }),
                Payload::SecurityAssociation(vec![Self::child_proposal(UE_CHILD_SPI)]),
                Payload::TrafficSelectorInitiator(vec![TrafficSelector::host(Ipv4Addr::UNSPECIFIED)]),
                Payload::TrafficSelectorResponder(vec![TrafficSelector::host(Ipv4Addr::UNSPECIFIED)]),
            ];
            self.encrypt(ExchangeType::IkeAuth, IKE_FLAG_INITIATOR, 1, &payloads)
        }
    }

    fn notify_types(payloads: &[Payload]) -> Vec<u16> {
        payloads
            .iter()
            .filter_map(|payload| match payload {
                Payload::Notify(notify) => Some(notify.notify_type),
                _ => None,
            })
            .collect()
    }

    /// Run IKE_SA_INIT and IKE_AUTH, returning the decrypted AUTH response
    fn establish(harness: &mut Harness, ue: &mut TestUe) -> Vec<Payload> {
        dispatch(&harness.ctx, ue.peer, &ue.sa_init());
        let (_, response) = harness.next_ike();
        ue.accept_sa_init(&response);

        dispatch(&harness.ctx, ue.peer, &ue.ike_auth_with(&KTNGF));
        let (_, response) = harness.next_ike();
        let (header, payloads) = ue.decrypt(&response);
        assert!(header.is_response());
        assert_eq!(header.message_id, 1);
        payloads
    }

    #[test]
    fn test_ike_sa_init_negotiates_keys() {
        let mut harness = Harness::new();
        let mut ue = TestUe::new();
        dispatch(&harness.ctx, ue.peer, &ue.sa_init());

        let (peer, response) = harness.next_ike();
        assert_eq!(peer, ue.peer);
        let message = IkeMessage::decode(&response).unwrap();
        assert!(message.header.is_response());
        assert_eq!(message.header.initiator_spi, ue.spi_i);
        assert_eq!(message.notifications().count(), 2);

        ue.accept_sa_init(&response);
        let sa = harness.ctx.ike_sa_by_spi(ue.spi_r).unwrap();
        let sa = lock(&sa);
        assert_eq!(sa.state, IkeSaState::InitSent);
        assert_eq!(sa.keys.sk_d, ue.keys.sk_d);
        assert_eq!(sa.keys.sk_ei, ue.keys.sk_er);
        assert_eq!(sa.initiator_message_id, 1);
        assert!(!sa.nat_detected());
    }

    #[test]
    fn test_ike_sa_init_without_acceptable_proposal() {
        let mut harness = Harness::new();
        let mut ue = TestUe::new();
        let request = ue.sa_init_with(TestUe::ike_proposal(ENCR_3DES), DH_1024_BIT_MODP, [0; 20]);
        dispatch(&harness.ctx, ue.peer, &request);

        let (_, response) = harness.next_ike();
        let message = IkeMessage::decode(&response).unwrap();
        assert_eq!(message.header.responder_spi, 0);
        assert_eq!(notify_types(&message.payloads), vec![NOTIFY_NO_PROPOSAL_CHOSEN]);
        assert_eq!(harness.ctx.allocation_counts().ike_sas, 0);
    }

    #[test]
    fn test_ike_sa_init_with_wrong_ke_group() {
        let mut harness = Harness::new();
        let mut ue = TestUe::new();
        let request = ue.sa_init_with(TestUe::ike_proposal(ENCR_AES_CBC), DH_2048_BIT_MODP, [0; 20]);
        dispatch(&harness.ctx, ue.peer, &request);

        let (_, response) = harness.next_ike();
        let message = IkeMessage::decode(&response).unwrap();
        match message.payloads.as_slice() {
            [Payload::Notify(notify)] => {
                assert_eq!(notify.notify_type, NOTIFY_INVALID_KE_PAYLOAD);
                assert_eq!(&notify.data[..], &[0, 2]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_major_version() {
        let mut harness = Harness::new();
        let mut ue = TestUe::new();
        let mut request = ue.sa_init();
        request[17] = 0x30;
        dispatch(&harness.ctx, ue.peer, &request);

        let (_, response) = harness.next_ike();
        let message = IkeMessage::decode(&response).unwrap();
        assert_eq!(notify_types(&message.payloads), vec![NOTIFY_INVALID_MAJOR_VERSION]);
    }

    #[test]
    fn test_ike_sa_init_detects_ue_behind_nat() {
        let mut harness = Harness::new();
        let mut ue = TestUe::new();
        let request = ue.sa_init_with(TestUe::ike_proposal(ENCR_AES_CBC), DH_1024_BIT_MODP, [0xab; 20]);
        dispatch(&harness.ctx, ue.peer, &request);

        let (_, response) = harness.next_ike();
        let spi = IkeMessage::decode(&response).unwrap().header.responder_spi;
        let sa = harness.ctx.ike_sa_by_spi(spi).unwrap();
        let sa = lock(&sa);
        assert!(sa.ue_behind_nat);
        assert!(!sa.tngf_behind_nat);
    }

    #[test]
    fn test_ike_auth_establishes_sa() {
        let mut harness = Harness::new();
        let mut ue = TestUe::new();
        let payloads = establish(&mut harness, &mut ue);
        let set = PayloadSet::new(&payloads);

        // Responder AUTH over the response, Ni and the FQDN identity
        let idr = payloads
            .iter()
            .find_map(|payload| match payload {
                Payload::IdResponder(id) => Some(id.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(&idr.data[..], b"tngf.free5gc.org");
        let sa = harness.ctx.ike_sa_by_spi(ue.spi_r).unwrap();
        let expected = {
            let sa = lock(&sa);
            let prf = sa.transforms.prf;
            let mut octets = sa.responder_signed_octets.clone();
            octets.extend(prf.compute(&ue.keys.sk_pr, &identification_body(&idr)).unwrap());
            shared_key_auth(prf, &ogs_kdf_ktipsec(&KTNGF).unwrap(), &octets).unwrap()
        };
        assert_eq!(&set.auth.unwrap().data[..], &expected[..]);

        let inner_ip = lock(&harness.ue).inner_ip.unwrap();
        let cp = set.cp.unwrap();
        assert_eq!(cp.cfg_type, CFG_REPLY);
        assert_eq!(&cp.attribute(INTERNAL_IP4_ADDRESS).unwrap().value[..], &inner_ip.octets());
        assert_eq!(&cp.attribute(INTERNAL_IP4_NETMASK).unwrap().value[..], &[255, 255, 255, 0]);
        let notifies = notify_types(&payloads);
        assert!(notifies.contains(&NOTIFY_NAS_IP4_ADDRESS));
        assert!(notifies.contains(&NOTIFY_NAS_TCP_PORT));
        let port = set.notify(NOTIFY_NAS_TCP_PORT).next().unwrap();
        assert_eq!(&port.data[..], &20000u16.to_be_bytes());

        // Signalling Child SA on the default interface, gateway as responder
        match harness.xfrm.calls().as_slice() {
            [XfrmCall::ApplyChildSa {
                outbound_spi,
                local_is_initiator,
                if_id,
                ..
            }] => {
                assert_eq!(*outbound_spi, UE_CHILD_SPI);
                assert!(!local_is_initiator);
                assert_eq!(*if_id, 7);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(lock(&sa).state, IkeSaState::Established);
        {
            let ue_session = lock(&harness.ue);
            assert!(ue_session.ike_established);
            assert_eq!(ue_session.ike_spi, Some(ue.spi_r));
            assert_eq!(ue_session.child_sas.len(), 1);
            assert!(ue_session.pdu_setup.is_none());
        }
        match harness.sent_ngap().as_slice() {
            [NgapMessage::InitialContextSetupResponse(response)] => {
                assert_eq!(response.amf_ue_ngap_id, 77);
                assert!(response.setup_list.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ike_auth_with_wrong_key_fails() {
        let mut harness = Harness::new();
        let mut ue = TestUe::new();
        dispatch(&harness.ctx, ue.peer, &ue.sa_init());
        let (_, response) = harness.next_ike();
        ue.accept_sa_init(&response);

        let ran_ue_ngap_id = harness.ran_ue_ngap_id();
        dispatch(&harness.ctx, ue.peer, &ue.ike_auth_with(&[0x11; 32]));
        let (_, response) = harness.next_ike();
        let (_, payloads) = ue.decrypt(&response);
        assert_eq!(notify_types(&payloads), vec![NOTIFY_AUTHENTICATION_FAILED]);
        assert!(harness.ctx.ue_by_ran_id(ran_ue_ngap_id).is_none());
        assert!(harness.ctx.ike_sa_by_spi(ue.spi_r).is_none());
    }

    #[test]
    fn test_ike_auth_for_unknown_spi() {
        let mut harness = Harness::new();
        let mut ue = TestUe::new();
        ue.spi_r = 0xdead_beef;
        let header = IkeHeader::new(ue.spi_i, ue.spi_r, ExchangeType::IkeAuth as u8, IKE_FLAG_INITIATOR, 1);
        let request = IkeMessage::new(header).encode().unwrap();
        dispatch(&harness.ctx, ue.peer, &request);

        let (_, response) = harness.next_ike();
        let message = IkeMessage::decode(&response).unwrap();
        assert_eq!(notify_types(&message.payloads), vec![NOTIFY_INVALID_IKE_SPI]);
    }

    #[test]
    fn test_ike_auth_with_stale_message_id_is_dropped() {
        let mut harness = Harness::new();
        let mut ue = TestUe::new();
        dispatch(&harness.ctx, ue.peer, &ue.sa_init());
        let (_, response) = harness.next_ike();
        ue.accept_sa_init(&response);

        let request = ue.encrypt(ExchangeType::IkeAuth, IKE_FLAG_INITIATOR, 5, &[Payload::IdInitiator(TestUe::idi())]);
        dispatch(&harness.ctx, ue.peer, &request);
        assert!(harness.rx.ike.try_recv().is_err());
        let sa = harness.ctx.ike_sa_by_spi(ue.spi_r).unwrap();
        assert_eq!(lock(&sa).state, IkeSaState::InitSent);
    }

    #[test]
    fn test_ike_auth_missing_payload_keeps_message_id() {
        let mut harness = Harness::new();
        let mut ue = TestUe::new();
        dispatch(&harness.ctx, ue.peer, &ue.sa_init());
        let (_, response) = harness.next_ike();
        ue.accept_sa_init(&response);

        let request = ue.encrypt(ExchangeType::IkeAuth, IKE_FLAG_INITIATOR, 1, &[Payload::IdInitiator(TestUe::idi())]);
        dispatch(&harness.ctx, ue.peer, &request);
        let (_, response) = harness.next_ike();
        let (header, payloads) = ue.decrypt(&response);
        assert_eq!(header.message_id, 1);
        assert_eq!(notify_types(&payloads), vec![NOTIFY_INVALID_SYNTAX]);
        {
            let sa = harness.ctx.ike_sa_by_spi(ue.spi_r).unwrap();
            let sa = lock(&sa);
            assert_eq!(sa.state, IkeSaState::InitSent);
            assert_eq!(sa.initiator_message_id, 1);
        }

        // The complete request under the same id is still accepted
        dispatch(&harness.ctx, ue.peer, &ue.ike_auth_with(&KTNGF));
        let (_, response) = harness.next_ike();
        let (header, payloads) = ue.decrypt(&response);
        assert_eq!(header.message_id, 1);
        assert!(PayloadSet::new(&payloads).auth.is_some());
        let sa = harness.ctx.ike_sa_by_spi(ue.spi_r).unwrap();
        assert_eq!(lock(&sa).state, IkeSaState::Established);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthenticated_ike_sas_expire() {
        let mut harness = Harness::new();
        for _ in 0..10 {
            let mut ue = TestUe::new();
            dispatch(&harness.ctx, ue.peer, &ue.sa_init());
            harness.next_ike();
        }
        let mut established = TestUe::new();
        establish(&mut harness, &mut established);
        assert_eq!(harness.ctx.allocation_counts().ike_sas, 11);

        tokio::time::advance(HALF_OPEN_TIMEOUT - Duration::from_secs(1)).await;
        assert_eq!(expire_half_open(&harness.ctx, Instant::now()), 0);
        assert_eq!(harness.ctx.allocation_counts().ike_sas, 11);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(expire_half_open(&harness.ctx, Instant::now()), 10);
        assert_eq!(harness.ctx.allocation_counts().ike_sas, 1);
        assert!(harness.ctx.ike_sa_by_spi(established.spi_r).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_child_sa_expires() {
        let mut harness = Harness::new();
        harness.queue_pdu_session(5);
        let mut ue = TestUe::new();
        establish(&mut harness, &mut ue);
        // CREATE_CHILD_SA request left unanswered
        harness.next_ike();
        assert_eq!(lock(&harness.ue).half_child_sas.len(), 1);
        let child_spis = harness.ctx.allocation_counts().child_spis;

        tokio::time::advance(HALF_OPEN_TIMEOUT).await;
        assert_eq!(expire_half_open(&harness.ctx, Instant::now()), 1);

        {
            let ue_session = lock(&harness.ue);
            assert!(ue_session.half_child_sas.is_empty());
            assert_eq!(ue_session.child_sas.len(), 1);
            assert!(ue_session.pdu_setup.is_none());
        }
        assert_eq!(harness.ctx.allocation_counts().child_spis, child_spis - 1);
        match harness.sent_ngap().as_slice() {
            [NgapMessage::InitialContextSetupResponse(response)] => {
                assert!(response.setup_list.is_empty());
                assert_eq!(response.failed_list.len(), 1);
                assert_eq!(response.failed_list[0].pdu_session_id, 5);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(harness.ctx.ike_sa_by_spi(ue.spi_r).is_some());
        assert!(harness.rx.ike.try_recv().is_err());
    }

    #[test]
    fn test_create_child_sa_for_pdu_session() {
        let mut harness = Harness::new();
        harness.queue_pdu_session(5);
        let mut ue = TestUe::new();
        establish(&mut harness, &mut ue);

        // The gateway starts CREATE_CHILD_SA right after IKE_AUTH
        let (_, request) = harness.next_ike();
        let (header, payloads) = ue.decrypt(&request);
        assert!(!header.is_response());
        assert_eq!(header.exchange_type, ExchangeType::CreateChildSa as u8);
        assert_eq!(header.message_id, 0);
        let notifies = notify_types(&payloads);
        assert!(notifies.contains(&NOTIFY_5G_QOS_INFO));
        let set = PayloadSet::new(&payloads);
        let offered = &set.sa.unwrap()[0];
        assert_eq!(ChildTransforms::from_proposal(offered), Some(ChildTransforms::for_pdu_session(true)));
        assert!(harness.sent_ngap().is_empty());

        let response = ue.encrypt(
            ExchangeType::CreateChildSa,
            IKE_FLAG_INITIATOR | IKE_FLAG_RESPONSE,
            header.message_id,
            &[
                Payload::SecurityAssociation(vec![ChildTransforms::for_pdu_session(true).to_proposal(1, 0xc002)]),
                Payload::Nonce(Bytes::from(random_bytes(NONCE_LEN))),
                Payload::TrafficSelectorInitiator(set.tsi.unwrap().to_vec()),
                Payload::TrafficSelectorResponder(set.tsr.unwrap().to_vec()),
            ],
        );
        dispatch(&harness.ctx, ue.peer, &response);

        let calls = harness.xfrm.calls();
        assert_eq!(
            calls[1],
            XfrmCall::SetupInterface {
                name: "ipsec-8".to_string(),
                if_id: 8
            }
        );
        assert!(matches!(
            calls[2],
            XfrmCall::ApplyChildSa {
                outbound_spi: 0xc002,
                local_is_initiator: true,
                if_id: 8,
                ..
            }
        ));
        assert_eq!(harness.ctx.xfrm_interface(8).unwrap().ifindex, 108);

        {
            let ue_session = lock(&harness.ue);
            let inbound_spi = ue_session.pdu_sessions[&5].child_sa_spi.unwrap();
            let child = &ue_session.child_sas[&inbound_spi];
            assert_eq!(child.pdu_session_ids, vec![5]);
            assert_eq!(child.xfrm_ifindex, Some(108));
            assert_eq!(ue_session.child_sa_for_ifindex(108).map(|c| c.inbound_spi), Some(inbound_spi));
            assert_eq!(ue_session.cached_nas, vec![Bytes::from_static(&[0x7e, 0x00, 0x68])]);
            assert!(ue_session.pdu_setup.is_none());
        }
        match harness.sent_ngap().as_slice() {
            [NgapMessage::InitialContextSetupResponse(response)] => {
                assert_eq!(response.setup_list.len(), 1);
                assert_eq!(response.setup_list[0].pdu_session_id, 5);
                assert!(response.failed_list.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
        let sa = harness.ctx.ike_sa_by_spi(ue.spi_r).unwrap();
        assert_eq!(lock(&sa).responder_message_id, 1);
    }

    #[test]
    fn test_refused_child_sa_reports_failure() {
        let mut harness = Harness::new();
        harness.queue_pdu_session(5);
        let mut ue = TestUe::new();
        establish(&mut harness, &mut ue);

        let (_, request) = harness.next_ike();
        let (header, _) = ue.decrypt(&request);
        let response = ue.encrypt(
            ExchangeType::CreateChildSa,
            IKE_FLAG_INITIATOR | IKE_FLAG_RESPONSE,
            header.message_id,
            &[Payload::Notify(Notification::new(NOTIFY_NO_PROPOSAL_CHOSEN, Bytes::new()))],
        );
        dispatch(&harness.ctx, ue.peer, &response);

        assert_eq!(lock(&harness.ue).child_sas.len(), 1);
        match harness.sent_ngap().as_slice() {
            [NgapMessage::InitialContextSetupResponse(response)] => {
                assert!(response.setup_list.is_empty());
                assert_eq!(response.failed_list.len(), 1);
                assert_eq!(response.failed_list[0].pdu_session_id, 5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_informational_delete_releases_ue() {
        let mut harness = Harness::new();
        let mut ue = TestUe::new();
        establish(&mut harness, &mut ue);
        harness.sent_ngap();
        let ran_ue_ngap_id = harness.ran_ue_ngap_id();

        let request = ue.encrypt(
            ExchangeType::Informational,
            IKE_FLAG_INITIATOR,
            2,
            &[Payload::Delete(Delete {
                protocol_id: PROTOCOL_IKE,
                spi_size: 0,
                spis: Vec::new(),
            })],
        );
        dispatch(&harness.ctx, ue.peer, &request);

        let (_, response) = harness.next_ike();
        let (header, payloads) = ue.decrypt(&response);
        assert!(header.is_response());
        assert_eq!(header.message_id, 2);
        assert!(payloads.is_empty());

        match harness.sent_ngap().as_slice() {
            [NgapMessage::UeContextReleaseRequest(request)] => {
                assert_eq!(request.ran_ue_ngap_id, ran_ue_ngap_id);
                assert_eq!(
                    request.cause,
                    Cause::RadioNetwork(CauseRadioNetwork::RadioConnectionWithUeLost)
                );
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(harness.ctx.ue_by_ran_id(ran_ue_ngap_id).is_none());
        assert!(harness.ctx.ike_sa_by_spi(ue.spi_r).is_none());
    }
}
