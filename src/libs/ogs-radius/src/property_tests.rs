//! Property-Based Tests for RADIUS and EAP-5G
//!
//! These tests verify that packets survive encode/decode, that the response
//! authenticator is the MD5 of the packet carrying the request
//! authenticator followed by the secret, and that the EAP-5G NAS framing
//! keeps the NAS PDU intact.

use bytes::Bytes;
use md5::{Digest, Md5};
use proptest::prelude::*;

use crate::eap::EapPacket;
use crate::eap5g::{eap5g_data, AnParameters, AnSnssai, Eap5gRequest, Eap5gResponse, EAP_5G_NAS};
use crate::message::{RadiusMessage, RADIUS_ACCESS_CHALLENGE};

fn arb_attributes() -> impl Strategy<Value = Vec<(u8, Vec<u8>)>> {
    prop::collection::vec((any::<u8>(), prop::collection::vec(any::<u8>(), 0..64)), 0..8)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_radius_round_trip(
        code in any::<u8>(),
        identifier in any::<u8>(),
        authenticator in any::<[u8; 16]>(),
        attributes in arb_attributes(),
    ) {
        let mut msg = RadiusMessage::new(code, identifier, authenticator);
        for (t, v) in attributes {
            msg.push(t, Bytes::from(v));
        }
        let bytes = msg.encode().unwrap();
        prop_assert_eq!(RadiusMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn prop_response_authenticator(
        request_auth in any::<[u8; 16]>(),
        secret in prop::collection::vec(any::<u8>(), 1..32),
        eap in prop::collection::vec(any::<u8>(), 4..300),
    ) {
        let mut resp = RadiusMessage::new(RADIUS_ACCESS_CHALLENGE, 1, [0; 16]);
        resp.push_eap_message(&eap);
        let packet = resp.sign_response(&request_auth, &secret).unwrap();

        let mut hashed = packet.clone();
        hashed[4..20].copy_from_slice(&request_auth);
        let mut md5 = Md5::new();
        md5.update(&hashed);
        md5.update(&secret);
        let expected: [u8; 16] = md5.finalize().into();
        prop_assert_eq!(&packet[4..20], &expected[..]);
    }

    #[test]
    fn prop_eap5g_nas_framing(identifier in any::<u8>(), nas in prop::collection::vec(any::<u8>(), 1..1024)) {
        let eap = Eap5gRequest::Nas(Bytes::from(nas.clone())).to_eap(identifier).unwrap();
        let decoded = EapPacket::decode(&eap.encode().unwrap()).unwrap();
        let data = eap5g_data(&decoded).unwrap();

        prop_assert_eq!(data[0], EAP_5G_NAS);
        prop_assert_eq!(u16::from_be_bytes([data[2], data[3]]) as usize, nas.len());
        prop_assert_eq!(Eap5gRequest::decode(data).unwrap(), Eap5gRequest::Nas(Bytes::from(nas)));
    }

    #[test]
    fn prop_an_parameters_round_trip(
        plmn in any::<[u8; 3]>(),
        sst in any::<u8>(),
        sd in prop::option::of(any::<[u8; 3]>()),
        nas in prop::collection::vec(any::<u8>(), 1..128),
    ) {
        let params = AnParameters {
            selected_plmn_id: Some(plmn),
            requested_nssai: vec![AnSnssai { sst, sd }],
            ..Default::default()
        };
        let response = Eap5gResponse::Nas { an_parameters: Some(params), nas_pdu: Bytes::from(nas) };
        prop_assert_eq!(Eap5gResponse::decode(&response.encode().unwrap()).unwrap(), response);
    }

    #[test]
    fn prop_arbitrary_input_never_panics(data in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = RadiusMessage::decode(&data);
        let _ = EapPacket::decode(&data);
        let _ = Eap5gResponse::decode(&data);
        let _ = AnParameters::decode(&data);
    }
}
