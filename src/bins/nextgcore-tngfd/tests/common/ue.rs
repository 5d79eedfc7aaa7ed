//! IKEv2 initiator standing in for the UE

use std::net::{IpAddr, Ipv4Addr};

use bytes::Bytes;

use nextgcore_tngfd::context::IkePeer;
use nextgcore_tngfd::ike_security::{
    decrypt_message, encrypt_message, identification_body, nat_detection_hash, random_bytes, select_ike_proposal,
    shared_key_auth, DhGroup, DhKeyPair, IkeKeys, IkeTransforms, NONCE_LEN,
};
use ogs_crypt::ogs_kdf_ktipsec;
use ogs_ike::{
    Authentication, ConfigAttribute, Configuration, ExchangeType, Identification, IkeHeader, IkeMessage, KeyExchange,
    Notification, Payload, Proposal, TrafficSelector, Transform, AUTH_HMAC_SHA1_96, AUTH_METHOD_SHARED_KEY_MIC,
    CFG_REQUEST, DH_1024_BIT_MODP, ENCR_AES_CBC, ESN_NO, ID_KEY_ID, IKE_FLAG_INITIATOR, INTERNAL_IP4_ADDRESS,
    NOTIFY_NAT_DETECTION_DESTINATION_IP, NOTIFY_NAT_DETECTION_SOURCE_IP, PRF_HMAC_SHA1, PROTOCOL_ESP, PROTOCOL_IKE,
    TRANSFORM_DH, TRANSFORM_ENCR, TRANSFORM_ESN, TRANSFORM_INTEG, TRANSFORM_PRF,
};

pub const UE_CHILD_SPI: u32 = 0x0000_a001;

pub struct SimulatedUe {
    pub peer: IkePeer,
    pub identity: Bytes,
    pub spi_i: u64,
    pub spi_r: u64,
    dh: DhKeyPair,
    ni: Bytes,
    nr: Bytes,
    transforms: Option<IkeTransforms>,
    keys: IkeKeys,
    sa_init_request: Vec<u8>,
}

impl SimulatedUe {
    pub fn new(identity: &'static [u8]) -> Self {
        Self {
            peer: IkePeer {
                remote: "127.0.0.1:500".parse().unwrap(),
                local_port: 500,
            },
            identity: Bytes::from_static(identity),
            spi_i: 0x0a0b_0c0d_0e0f_1011,
            spi_r: 0,
            dh: DhKeyPair::generate(DhGroup::Modp1024),
            ni: Bytes::from(random_bytes(NONCE_LEN)),
            nr: Bytes::new(),
            transforms: None,
            keys: IkeKeys::default(),
            sa_init_request: Vec::new(),
        }
    }

    pub fn esp_proposal(spi: u32) -> Proposal {
        let mut proposal = Proposal::new(1, PROTOCOL_ESP, Bytes::copy_from_slice(&spi.to_be_bytes()));
        proposal
            .push(Transform::new(TRANSFORM_ENCR, ENCR_AES_CBC).with_key_length(128))
            .push(Transform::new(TRANSFORM_INTEG, AUTH_HMAC_SHA1_96))
            .push(Transform::new(TRANSFORM_ESN, ESN_NO));
        proposal
    }

    /// IKE_SA_INIT request; both NAT-D hashes match, so no NAT is seen
    pub fn sa_init(&mut self, gateway: Ipv4Addr) -> Vec<u8> {
        let mut proposal = Proposal::new(1, PROTOCOL_IKE, Bytes::new());
        proposal
            .push(Transform::new(TRANSFORM_ENCR, ENCR_AES_CBC).with_key_length(128))
            .push(Transform::new(TRANSFORM_PRF, PRF_HMAC_SHA1))
            .push(Transform::new(TRANSFORM_INTEG, AUTH_HMAC_SHA1_96))
            .push(Transform::new(TRANSFORM_DH, DH_1024_BIT_MODP));

        let source_ip = match self.peer.remote.ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(ip) => panic!("simulated UE has IPv6 address {ip}"),
        };
        let source = nat_detection_hash(self.spi_i, 0, source_ip, self.peer.remote.port());
        let destination = nat_detection_hash(self.spi_i, 0, gateway, self.peer.local_port);

        let header = IkeHeader::new(self.spi_i, 0, ExchangeType::IkeSaInit as u8, IKE_FLAG_INITIATOR, 0);
        let mut message = IkeMessage::new(header);
        message
            .push(Payload::SecurityAssociation(vec![proposal]))
            .push(Payload::KeyExchange(KeyExchange {
                dh_group: DH_1024_BIT_MODP,
                data: Bytes::copy_from_slice(self.dh.public_value()),
            }))
            .push(Payload::Nonce(self.ni.clone()))
            .push(Payload::Notify(Notification::new(NOTIFY_NAT_DETECTION_SOURCE_IP, source.to_vec())))
            .push(Payload::Notify(Notification::new(
                NOTIFY_NAT_DETECTION_DESTINATION_IP,
                destination.to_vec(),
            )));
        self.sa_init_request = message.encode().unwrap().to_vec();
        self.sa_init_request.clone()
    }

    /// Derive the IKE SA keys from the gateway's IKE_SA_INIT response
    pub fn accept_sa_init(&mut self, response: &[u8]) {
        let message = IkeMessage::decode(response).unwrap();
        self.spi_r = message.header.responder_spi;

        let mut transforms = None;
        let mut peer_public = None;
        for payload in &message.payloads {
            match payload {
                Payload::SecurityAssociation(proposals) => transforms = select_ike_proposal(proposals).map(|(_, t)| t),
                Payload::KeyExchange(ke) => peer_public = Some(ke.data.clone()),
                Payload::Nonce(nonce) => self.nr = nonce.clone(),
                _ => {}
            }
        }
        let transforms = transforms.expect("an accepted proposal");
        let shared = self.dh.shared_secret(&peer_public.expect("a KE payload")).unwrap();
        let keys = IkeKeys::derive(&transforms, &self.ni, &self.nr, &shared, self.spi_i, self.spi_r).unwrap();
        // The encrypt/decrypt helpers act as responder; swap directions
        self.keys = IkeKeys {
            sk_ai: keys.sk_ar.clone(),
            sk_ar: keys.sk_ai.clone(),
            sk_ei: keys.sk_er.clone(),
            sk_er: keys.sk_ei.clone(),
            ..keys
        };
        self.transforms = Some(transforms);
    }

    fn idi(&self) -> Identification {
        Identification {
            id_type: ID_KEY_ID,
            data: self.identity.clone(),
        }
    }

    /// IKE_AUTH request signed with Ktipsec derived from `ktngf`
    pub fn ike_auth(&self, ktngf: &[u8; 32]) -> Vec<u8> {
        let prf = self.transforms.expect("IKE_SA_INIT done").prf;
        let mut octets = self.sa_init_request.clone();
        octets.extend_from_slice(&self.nr);
        octets.extend(prf.compute(&self.keys.sk_pi, &identification_body(&self.idi())).unwrap());
        let auth = shared_key_auth(prf, &ogs_kdf_ktipsec(ktngf).unwrap(), &octets).unwrap();

        let payloads = [
            Payload::IdInitiator(self.idi()),
            Payload::Authentication(Authentication {
                method: AUTH_METHOD_SHARED_KEY_MIC,
                data: Bytes::from(auth),
            }),
            Payload::Configuration(Configuration {
                cfg_type: CFG_REQUEST,
                attributes: vec![ConfigAttribute {
                    attr_type: INTERNAL_IP4_ADDRESS,
                    value: Bytes::new(),
                }],
            }),
            Payload::SecurityAssociation(vec![Self::esp_proposal(UE_CHILD_SPI)]),
            Payload::TrafficSelectorInitiator(vec![TrafficSelector::host(Ipv4Addr::UNSPECIFIED)]),
            Payload::TrafficSelectorResponder(vec![TrafficSelector::host(Ipv4Addr::UNSPECIFIED)]),
        ];
        self.encrypt(ExchangeType::IkeAuth, IKE_FLAG_INITIATOR, 1, &payloads)
    }

    pub fn encrypt(&self, exchange: ExchangeType, flags: u8, message_id: u32, payloads: &[Payload]) -> Vec<u8> {
        let header = IkeHeader::new(self.spi_i, self.spi_r, exchange as u8, flags, message_id);
        encrypt_message(&self.transforms.expect("IKE_SA_INIT done"), &self.keys, header, payloads)
            .unwrap()
            .to_vec()
    }

    pub fn decrypt(&self, data: &[u8]) -> (IkeHeader, Vec<Payload>) {
        let message = IkeMessage::decode(data).unwrap();
        let payloads =
            decrypt_message(&self.transforms.expect("IKE_SA_INIT done"), &self.keys, data, &message).unwrap();
        (message.header, payloads)
    }
}
