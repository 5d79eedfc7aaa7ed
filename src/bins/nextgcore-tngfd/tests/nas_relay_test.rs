//! NAS relay between the AMF (NGAP) and the UE (TCP over the signalling
//! Child SA)

mod common;

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use nextgcore_tngfd::context::lock;
use nextgcore_tngfd::{nas_path, ngap_handler};
use ogs_ngap::builder::build_downlink_nas_transport;
use ogs_ngap::{decode_ngap_pdu, DownlinkNasTransport, NgapMessage, UserLocationInformationTngf};

#[tokio::test]
async fn test_downlink_and_uplink_nas_over_tcp() {
    let gw = common::gateway();
    let shared = gw.ctx.new_ue().unwrap();
    let (ran_ue_ngap_id, inner_ip) = {
        let mut ue = lock(&shared);
        gw.ctx.attach_ue_to_amf(&mut ue, common::amf_addr()).unwrap();
        ue.amf_ue_ngap_id = 77;
        ue.ike_established = true;
        ue.user_location = Some(UserLocationInformationTngf {
            tnap_id: vec![0xaa, 0xbb],
            ip_address: "192.168.10.20".parse().unwrap(),
            port: Some(4500),
        });
        let ip = gw.ctx.allocate_inner_ip(ue.ran_ue_ngap_id).unwrap();
        ue.inner_ip = Some(ip);
        (ue.ran_ue_ngap_id, ip)
    };

    let (mut ue_side, gateway_side) = tokio::io::duplex(1024);
    let server = tokio::spawn(nas_path::serve_connection(gw.ctx.clone(), gateway_side, inner_ip));

    // Wait for the connection to be bound before the AMF speaks
    for _ in 0..50 {
        if lock(&shared).nas_connection.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let downlink = build_downlink_nas_transport(&DownlinkNasTransport {
        amf_ue_ngap_id: 77,
        ran_ue_ngap_id,
        nas_pdu: vec![0x7e, 0x00, 0x56],
    })
    .unwrap();
    ngap_handler::dispatch(&gw.ctx, common::amf_addr(), &downlink);

    let mut envelope = [0u8; 5];
    ue_side.read_exact(&mut envelope).await.unwrap();
    assert_eq!(envelope, [0x00, 0x03, 0x7e, 0x00, 0x56]);

    ue_side.write_all(&[0x00, 0x02, 0x7e, 0x57]).await.unwrap();
    let mut sent = Vec::new();
    for _ in 0..50 {
        sent = gw.amf.take();
        if !sent.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    match decode_ngap_pdu(&sent[0]).unwrap() {
        NgapMessage::UplinkNasTransport(msg) => {
            assert_eq!(msg.amf_ue_ngap_id, 77);
            assert_eq!(msg.ran_ue_ngap_id, ran_ue_ngap_id);
            assert_eq!(msg.nas_pdu, vec![0x7e, 0x57]);
        }
        other => panic!("unexpected {:?}", other),
    }

    drop(ue_side);
    server.await.unwrap();
    assert!(lock(&shared).nas_connection.is_none());
}

#[tokio::test]
async fn test_downlink_nas_before_tcp_is_cached() {
    let gw = common::gateway();
    let shared = gw.ctx.new_ue().unwrap();
    let ran_ue_ngap_id = {
        let mut ue = lock(&shared);
        gw.ctx.attach_ue_to_amf(&mut ue, common::amf_addr()).unwrap();
        ue.amf_ue_ngap_id = 78;
        ue.ike_established = true;
        ue.ran_ue_ngap_id
    };

    for nas in [vec![0x7e, 0x01], vec![0x7e, 0x02]] {
        let downlink = build_downlink_nas_transport(&DownlinkNasTransport {
            amf_ue_ngap_id: 78,
            ran_ue_ngap_id,
            nas_pdu: nas,
        })
        .unwrap();
        ngap_handler::dispatch(&gw.ctx, common::amf_addr(), &downlink);
    }

    assert_eq!(lock(&shared).cached_nas.len(), 2);
}
