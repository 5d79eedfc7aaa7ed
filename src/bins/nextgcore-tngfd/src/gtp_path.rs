//! GTP Path - N3 GTP-U socket
//!
//! Downlink T-PDUs from the UPF are looked up by their TEID and forwarded to
//! the UE as GRE over its PDU Child SA. Echo Requests are answered here.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use ogs_gtp::v1::{Gtp1uMessage, Gtp1uMessageType};
use ogs_gtp::GTPV1_U_UDP_PORT;

use crate::context::{lock, GatewayContext, TngfError, TngfResult};
use crate::gre::gtp_to_gre;
use crate::up_path::GreSocket;

const GTP_MAX_DATAGRAM_LEN: usize = 65535;

/// What to do with a received GTP-U datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GtpAction {
    /// Answer the sender
    Reply(Bytes),
    /// GRE packet for the UE with this inner address
    ToUe { inner_ip: Ipv4Addr, gre: Bytes },
    Drop,
}

pub async fn bind(ctx: &GatewayContext) -> TngfResult<Arc<UdpSocket>> {
    let addr = SocketAddr::new(ctx.settings.gtp_bind_address.into(), GTPV1_U_UDP_PORT);
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|e| TngfError::Transport(format!("bind GTP-U {addr}: {e}")))?;
    log::info!("GTP-U server bound to {}", addr);
    Ok(Arc::new(socket))
}

pub fn handle_datagram(ctx: &GatewayContext, mut data: Bytes) -> TngfResult<GtpAction> {
    let message = Gtp1uMessage::decode(&mut data)?;
    match message.message_type() {
        Some(Gtp1uMessageType::EchoRequest) => {
            let response = Gtp1uMessage::echo_response(&message.header).encode()?;
            Ok(GtpAction::Reply(response.freeze()))
        }
        Some(Gtp1uMessageType::GPdu) => {
            let teid = message.header.teid;
            let shared_ue = ctx
                .ue_by_teid(teid)
                .ok_or_else(|| TngfError::not_found("UE with TEID", teid))?;
            let inner_ip = lock(&shared_ue)
                .inner_ip
                .ok_or_else(|| TngfError::not_found("inner IP of UE with TEID", teid))?;
            Ok(GtpAction::ToUe {
                inner_ip,
                gre: gtp_to_gre(&message).freeze(),
            })
        }
        other => {
            log::debug!("GTP-U message {:?} ignored", other.map_or(message.header.message_type, |t| t as u8));
            Ok(GtpAction::Drop)
        }
    }
}

/// Start the GTP-U reader. Downlink packets leave through `gre`.
pub fn open(ctx: &Arc<GatewayContext>, socket: Arc<UdpSocket>, gre: Arc<GreSocket>) -> JoinHandle<()> {
    tokio::spawn(receive_loop(ctx.clone(), socket, gre))
}

async fn receive_loop(ctx: Arc<GatewayContext>, socket: Arc<UdpSocket>, gre: Arc<GreSocket>) {
    let mut buf = vec![0u8; GTP_MAX_DATAGRAM_LEN];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                log::error!("GTP-U receive failed: {}", e);
                continue;
            }
        };
        let ctx = ctx.clone();
        let socket = socket.clone();
        let gre = gre.clone();
        let data = Bytes::copy_from_slice(&buf[..len]);
        tokio::spawn(async move {
            match handle_datagram(&ctx, data) {
                Ok(GtpAction::Reply(reply)) => {
                    if let Err(e) = socket.send_to(&reply, peer).await {
                        log::error!("[{}] GTP-U send failed: {}", peer, e);
                    }
                }
                Ok(GtpAction::ToUe { inner_ip, gre: packet }) => {
                    if let Err(e) = gre.send_to(&packet, inner_ip).await {
                        log::error!("[{}] GRE send failed: {}", inner_ip, e);
                    }
                }
                Ok(GtpAction::Drop) => {}
                Err(e) => log::error!("[{}] Downlink packet dropped: {}", peer, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogs_gtp::v1::PduSessionContainer;
    use ogs_ngap::SNssai;

    use crate::context::GtpConnectionInfo;
    use crate::gre::{GreHeader, GreKey};
    use crate::test_support::{test_context, test_settings};

    fn setup() -> (Arc<GatewayContext>, Ipv4Addr, u32) {
        let (ctx, _rx) = test_context(test_settings());
        let shared = ctx.new_ue().unwrap();
        let mut ue = lock(&shared);
        let ran_ue_ngap_id = ue.ran_ue_ngap_id;
        let inner_ip = ctx.allocate_inner_ip(ran_ue_ngap_id).unwrap();
        ue.inner_ip = Some(inner_ip);
        let teid = ctx.allocate_teid(ran_ue_ngap_id).unwrap();
        ue.create_pdu_session(1, SNssai { sst: 1, sd: None }).unwrap().gtp = Some(GtpConnectionInfo {
            upf_address: "10.200.200.102:2152".parse().unwrap(),
            incoming_teid: teid,
            outgoing_teid: 0x99,
        });
        drop(ue);
        (ctx, inner_ip, teid)
    }

    fn wire(message: &Gtp1uMessage) -> Bytes {
        message.encode().unwrap().freeze()
    }

    #[test]
    fn test_echo_request_is_answered() {
        let (ctx, _, _) = setup();
        let action = handle_datagram(&ctx, wire(&Gtp1uMessage::echo_request(33))).unwrap();
        let GtpAction::Reply(mut reply) = action else {
            panic!("expected a reply, got {:?}", action);
        };
        let response = Gtp1uMessage::decode(&mut reply).unwrap();
        assert_eq!(response.message_type(), Some(Gtp1uMessageType::EchoResponse));
        assert_eq!(response.header.sequence_number, Some(33));
    }

    #[test]
    fn test_downlink_with_container_is_keyed() {
        let (ctx, inner_ip, teid) = setup();
        let message = Gtp1uMessage::gpdu(
            teid,
            Some(PduSessionContainer::downlink(5, true)),
            Bytes::from_static(&[0x45, 0x00]),
        );
        let action = handle_datagram(&ctx, wire(&message)).unwrap();
        let GtpAction::ToUe { inner_ip: target, gre } = action else {
            panic!("expected a GRE packet, got {:?}", action);
        };
        assert_eq!(target, inner_ip);
        let (header, payload) = GreHeader::decode(&gre).unwrap();
        assert_eq!(header.key, Some(GreKey::qos(5, true)));
        assert_eq!(&payload[..], &[0x45, 0x00]);
    }

    #[test]
    fn test_downlink_without_container_has_no_key() {
        let (ctx, _, teid) = setup();
        let message = Gtp1uMessage::gpdu(teid, None, Bytes::from_static(&[0x45]));
        let GtpAction::ToUe { gre, .. } = handle_datagram(&ctx, wire(&message)).unwrap() else {
            panic!("expected a GRE packet");
        };
        assert_eq!(GreHeader::decode(&gre).unwrap().0.key, None);
    }

    #[test]
    fn test_unknown_teid_and_garbage() {
        let (ctx, _, teid) = setup();
        let message = Gtp1uMessage::gpdu(teid.wrapping_add(1000), None, Bytes::from_static(&[0x45]));
        assert!(handle_datagram(&ctx, wire(&message)).is_err());
        assert!(handle_datagram(&ctx, Bytes::from_static(&[0x30, 0xff])).is_err());
    }
}
