//! User plane bridging between GRE on NWt and GTP-U on N3

mod common;

use std::net::{Ipv4Addr, SocketAddr};

use bytes::{Bytes, BytesMut};

use nextgcore_tngfd::context::{lock, GtpConnectionInfo};
use nextgcore_tngfd::gre::{GreHeader, GreKey};
use nextgcore_tngfd::gtp_path::{self, GtpAction};
use nextgcore_tngfd::ike_security::ChildTransforms;
use nextgcore_tngfd::up_path;
use nextgcore_tngfd::GatewayContext;
use ogs_gtp::v1::{Gtp1uMessage, PduSessionContainer};
use ogs_ngap::SNssai;

const IFINDEX: u32 = 208;
const UPLINK_TEID: u32 = 0x0102_0304;

fn upf() -> SocketAddr {
    "10.100.200.3:2152".parse().unwrap()
}

struct Session {
    ran_ue_ngap_id: u32,
    inner_ip: Ipv4Addr,
    downlink_teid: u32,
}

/// UE with PDU session 3 carried by a Child SA on IFINDEX
fn establish(ctx: &GatewayContext) -> Session {
    let shared = ctx.new_ue().unwrap();
    let mut ue = lock(&shared);
    let ran_ue_ngap_id = ue.ran_ue_ngap_id;
    let inner_ip = ctx.allocate_inner_ip(ran_ue_ngap_id).unwrap();
    ue.inner_ip = Some(inner_ip);

    let downlink_teid = ctx.allocate_teid(ran_ue_ngap_id).unwrap();
    ue.create_pdu_session(3, SNssai { sst: 1, sd: None }).unwrap().gtp = Some(GtpConnectionInfo {
        upf_address: upf(),
        incoming_teid: downlink_teid,
        outgoing_teid: UPLINK_TEID,
    });

    let spi = ctx.allocate_child_spi(ran_ue_ngap_id).unwrap();
    ctx.create_half_child_sa(&mut ue, 4, spi, vec![3], Bytes::new());
    let proposal = ChildTransforms::for_pdu_session(false).to_proposal(1, 0xdead_0001);
    ctx.complete_child_sa(&mut ue, 4, 0xdead_0001, &[proposal]).unwrap().xfrm_ifindex = Some(IFINDEX);

    Session {
        ran_ue_ngap_id,
        inner_ip,
        downlink_teid,
    }
}

fn ip_packet(source: Ipv4Addr, gre: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x45, 0, 0, 0, 0, 0, 0, 0, 64, 47, 0, 0];
    packet.extend_from_slice(&source.octets());
    packet.extend_from_slice(&[10, 45, 0, 1]);
    packet.extend_from_slice(gre);
    packet
}

#[test]
fn test_downlink_then_uplink() {
    let gw = common::gateway();
    let session = establish(&gw.ctx);

    // N3 -> NWt
    let t_pdu = Bytes::from_static(&[0x45, 0x00, 0x00, 0x1c, 0xde, 0xad]);
    let downlink = Gtp1uMessage::gpdu(
        session.downlink_teid,
        Some(PduSessionContainer::downlink(9, false)),
        t_pdu.clone(),
    );
    let action = gtp_path::handle_datagram(&gw.ctx, downlink.encode().unwrap().freeze()).unwrap();
    let GtpAction::ToUe { inner_ip, gre } = action else {
        panic!("expected a GRE packet, got {:?}", action);
    };
    assert_eq!(inner_ip, session.inner_ip);
    let (header, payload) = GreHeader::decode(&gre).unwrap();
    assert_eq!(header.key.map(|key| key.qfi()), Some(9));
    assert_eq!(payload, t_pdu);

    // NWt -> N3, echoing the QFI the UE learned
    let mut reply = BytesMut::new();
    GreHeader::ipv4(Some(GreKey::qos(9, false))).encode(&mut reply);
    reply.extend_from_slice(&[0x45, 0x00, 0x00, 0x1c, 0xbe, 0xef]);
    let (target, datagram) =
        up_path::handle_uplink(&gw.ctx, Some(IFINDEX), &ip_packet(session.inner_ip, &reply)).unwrap();
    assert_eq!(target, upf());

    let uplink = Gtp1uMessage::decode(&mut datagram.clone()).unwrap();
    assert_eq!(uplink.header.teid, UPLINK_TEID);
    assert_eq!(uplink.pdu_session_container.map(|c| c.qfi), Some(9));
    assert_eq!(&uplink.payload[..], &[0x45, 0x00, 0x00, 0x1c, 0xbe, 0xef]);
}

#[test]
fn test_released_ue_no_longer_forwards() {
    let gw = common::gateway();
    let session = establish(&gw.ctx);
    assert!(gw.ctx.remove_ue(session.ran_ue_ngap_id));

    let downlink = Gtp1uMessage::gpdu(session.downlink_teid, None, Bytes::from_static(&[0x45]));
    assert!(gtp_path::handle_datagram(&gw.ctx, downlink.encode().unwrap().freeze()).is_err());

    let mut gre = BytesMut::new();
    GreHeader::ipv4(None).encode(&mut gre);
    assert!(up_path::handle_uplink(&gw.ctx, Some(IFINDEX), &ip_packet(session.inner_ip, &gre)).is_err());
}

#[test]
fn test_echo_request_from_upf() {
    let gw = common::gateway();
    let action = gtp_path::handle_datagram(&gw.ctx, Gtp1uMessage::echo_request(7).encode().unwrap().freeze()).unwrap();
    assert!(matches!(action, GtpAction::Reply(_)));
}
