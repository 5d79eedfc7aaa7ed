//! Full NWt attachment: IKE_SA_INIT, IKE_AUTH and one CREATE_CHILD_SA, then
//! release from the AMF

mod common;

use bytes::Bytes;

use common::ue::SimulatedUe;
use nextgcore_tngfd::context::{lock, AllocationCounts, GtpConnectionInfo, PendingPduSetup, PduSetupProcedure};
use nextgcore_tngfd::ike_handler;
use nextgcore_tngfd::ike_security::{random_bytes, ChildTransforms, NONCE_LEN};
use nextgcore_tngfd::ngap_handler;
use ogs_asn1c::ngap::cause::{Cause, CauseNas};
use ogs_ike::{
    ExchangeType, Payload, CFG_REPLY, IKE_FLAG_INITIATOR, IKE_FLAG_RESPONSE, INTERNAL_IP4_ADDRESS,
};
use ogs_ngap::builder::build_ue_context_release_command;
use ogs_ngap::{decode_ngap_pdu, NgapMessage, SNssai, UeContextReleaseCommand, UeNgapIds};

const IDENTITY: &[u8] = b"\x02\x00\xf1\x10\x00\x00\x00\x00\x21";
const KTNGF: [u8; 32] = [0x3c; 32];
const AMF_UE_NGAP_ID: u64 = 5;
const PDU_SESSION_ID: u8 = 1;

fn sent_ngap(gw: &common::TestGateway) -> Vec<NgapMessage> {
    gw.amf.take().iter().map(|pdu| decode_ngap_pdu(pdu).unwrap()).collect()
}

#[test]
fn test_attach_with_pdu_session_then_release() {
    let mut gw = common::gateway();

    // State left by EAP-5G and the InitialContextSetupRequest
    let shared = gw.ctx.new_ue().unwrap();
    let ran_ue_ngap_id = {
        let mut ue = lock(&shared);
        gw.ctx.attach_ue_to_amf(&mut ue, common::amf_addr()).unwrap();
        ue.amf_ue_ngap_id = AMF_UE_NGAP_ID;
        ue.identity = Some(Bytes::from_static(IDENTITY));
        ue.ktngf = Some(KTNGF);

        let ran_ue_ngap_id = ue.ran_ue_ngap_id;
        let teid = gw.ctx.allocate_teid(ran_ue_ngap_id).unwrap();
        let session = ue.create_pdu_session(PDU_SESSION_ID, SNssai { sst: 1, sd: None }).unwrap();
        session.qfis = vec![1];
        session.gtp = Some(GtpConnectionInfo {
            upf_address: "10.100.200.3:2152".parse().unwrap(),
            incoming_teid: teid,
            outgoing_teid: 0x55,
        });
        let mut pending = PendingPduSetup::new(PduSetupProcedure::InitialContextSetup);
        pending.queue.push_back(PDU_SESSION_ID);
        ue.pdu_setup = Some(pending);
        ran_ue_ngap_id
    };

    // IKE_SA_INIT
    let mut ue = SimulatedUe::new(IDENTITY);
    let request = ue.sa_init(gw.ctx.settings.ike_bind_address);
    ike_handler::dispatch(&gw.ctx, ue.peer, &request);
    let response = gw.queues.ike.try_recv().unwrap();
    assert_eq!(response.peer, ue.peer);
    ue.accept_sa_init(&response.data);
    assert_ne!(ue.spi_r, 0);

    // IKE_AUTH hands out the inner address
    ike_handler::dispatch(&gw.ctx, ue.peer, &ue.ike_auth(&KTNGF));
    let response = gw.queues.ike.try_recv().unwrap();
    let (header, payloads) = ue.decrypt(&response.data);
    assert!(header.is_response());
    let inner_ip = lock(&shared).inner_ip.unwrap();
    let cp = payloads
        .iter()
        .find_map(|payload| match payload {
            Payload::Configuration(cp) => Some(cp.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(cp.cfg_type, CFG_REPLY);
    assert_eq!(&cp.attribute(INTERNAL_IP4_ADDRESS).unwrap().value[..], &inner_ip.octets());
    assert!(gw.ctx.settings.ue_subnet.contains(inner_ip));

    // CREATE_CHILD_SA from the gateway for the PDU session
    let request = gw.queues.ike.try_recv().unwrap();
    let (header, payloads) = ue.decrypt(&request.data);
    assert_eq!(header.exchange_type, ExchangeType::CreateChildSa as u8);
    let mut tsi = Vec::new();
    let mut tsr = Vec::new();
    for payload in &payloads {
        match payload {
            Payload::TrafficSelectorInitiator(ts) => tsi = ts.clone(),
            Payload::TrafficSelectorResponder(ts) => tsr = ts.clone(),
            _ => {}
        }
    }
    let answer = ue.encrypt(
        ExchangeType::CreateChildSa,
        IKE_FLAG_INITIATOR | IKE_FLAG_RESPONSE,
        header.message_id,
        &[
            Payload::SecurityAssociation(vec![ChildTransforms::for_pdu_session(false).to_proposal(1, 0xa002)]),
            Payload::Nonce(Bytes::from(random_bytes(NONCE_LEN))),
            Payload::TrafficSelectorInitiator(tsi),
            Payload::TrafficSelectorResponder(tsr),
        ],
    );
    ike_handler::dispatch(&gw.ctx, ue.peer, &answer);

    match sent_ngap(&gw).as_slice() {
        [NgapMessage::InitialContextSetupResponse(response)] => {
            assert_eq!(response.amf_ue_ngap_id, AMF_UE_NGAP_ID);
            assert_eq!(response.setup_list.len(), 1);
            assert_eq!(response.setup_list[0].pdu_session_id, PDU_SESSION_ID);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(gw.xfrm.child_sas.lock().unwrap().len(), 2);
    assert_eq!(*gw.xfrm.interfaces.lock().unwrap(), vec!["ipsec-8".to_string()]);
    {
        let ue_session = lock(&shared);
        assert!(ue_session.ike_established);
        assert_eq!(ue_session.child_sas.len(), 2);
        assert!(ue_session.child_sa_for_ifindex(208).is_some());
    }

    // Release from the AMF returns every resource
    let command = build_ue_context_release_command(&UeContextReleaseCommand {
        ue_ngap_ids: UeNgapIds::Pair {
            amf_ue_ngap_id: AMF_UE_NGAP_ID,
            ran_ue_ngap_id,
        },
        cause: Cause::Nas(CauseNas::Deregister),
    })
    .unwrap();
    ngap_handler::dispatch(&gw.ctx, common::amf_addr(), &command);

    assert!(matches!(sent_ngap(&gw).as_slice(), [NgapMessage::UeContextReleaseComplete(_)]));
    assert_eq!(gw.ctx.allocation_counts(), AllocationCounts::default());
    assert!(gw.ctx.ike_sa_by_spi(ue.spi_r).is_none());

    // A second release finds nothing to free
    ngap_handler::dispatch(&gw.ctx, common::amf_addr(), &command);
    assert!(matches!(sent_ngap(&gw).as_slice(), [NgapMessage::ErrorIndication(_)]));
    assert_eq!(gw.ctx.allocation_counts(), AllocationCounts::default());
}
