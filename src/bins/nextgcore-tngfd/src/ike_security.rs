//! IKE Security Functions
//!
//! Algorithm negotiation, Diffie-Hellman, key derivation (RFC 7296 2.13-2.17),
//! SK payload protection, NAT detection and shared-key AUTH for the IKE SA and
//! its Child SAs. The gateway is always the responder of its IKE SAs, so
//! outgoing SK payloads use SK_er/SK_ar and incoming ones SK_ei/SK_ai.

use bytes::{BufMut, Bytes, BytesMut};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use md5::Md5;
use num_bigint::BigUint;
use rand::RngCore;
use sha1::{Digest, Sha1};

use ogs_crypt::{aes_cbc_decrypt, aes_cbc_encrypt, AES_BLOCK_SIZE};
use ogs_ike::{
    decode_payloads, encode_payloads, first_payload_type, Identification, IkeHeader, IkeMessage, Payload, Proposal,
    Transform, AUTH_AES_XCBC_96, AUTH_HMAC_MD5_96, AUTH_HMAC_SHA1_96, AUTH_NONE, DH_1024_BIT_MODP,
    DH_2048_BIT_MODP, ENCR_3DES, ENCR_AES_CBC, ENCR_AES_CTR, ENCR_BLOWFISH, ENCR_CAST, ENCR_DES, ENCR_NULL,
    ESN_NO, ESN_YES, PRF_HMAC_MD5, PRF_HMAC_SHA1, PROTOCOL_ESP, PROTOCOL_IKE, TRANSFORM_DH, TRANSFORM_ENCR,
    TRANSFORM_ESN, TRANSFORM_INTEG, TRANSFORM_PRF,
};

use crate::context::{TngfError, TngfResult};

// ============================================================================
// Constants
// ============================================================================

/// Truncated ICV length for HMAC-MD5-96 and HMAC-SHA1-96
pub const ICV_LEN: usize = 12;

/// Nonce length generated by the gateway
pub const NONCE_LEN: usize = 32;

/// Pad string of the shared-key AUTH (RFC 7296 2.15)
pub const KEY_PAD: &[u8] = b"Key Pad for IKEv2";

const MODP_1024_PRIME: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381FFFFFFFFFFFFFFFF",
);

const MODP_2048_PRIME: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05",
    "98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB",
    "9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

const DH_GENERATOR: u32 = 2;

/// Random bytes for nonces and secrets
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    rand::rng().fill_bytes(&mut out);
    out
}

fn hmac_digest<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> TngfResult<Vec<u8>> {
    let mut mac = <M as KeyInit>::new_from_slice(key).map_err(|_| TngfError::Crypto("invalid HMAC key".into()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

// ============================================================================
// IKE SA algorithms
// ============================================================================

/// ENCR transform usable for the SK payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionAlgorithm {
    Null,
    /// AES-CBC with a 16, 24 or 32 byte key
    AesCbc { key_len: usize },
}

impl EncryptionAlgorithm {
    pub fn from_transform(transform: &Transform) -> Option<Self> {
        match transform.transform_id {
            ENCR_NULL => Some(Self::Null),
            ENCR_AES_CBC => match transform.key_length {
                Some(128) => Some(Self::AesCbc { key_len: 16 }),
                Some(192) => Some(Self::AesCbc { key_len: 24 }),
                Some(256) => Some(Self::AesCbc { key_len: 32 }),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::AesCbc { key_len } => *key_len,
        }
    }

    pub fn to_transform(&self) -> Transform {
        match self {
            Self::Null => Transform::new(TRANSFORM_ENCR, ENCR_NULL),
            Self::AesCbc { key_len } => {
                Transform::new(TRANSFORM_ENCR, ENCR_AES_CBC).with_key_length((*key_len * 8) as u16)
            }
        }
    }
}

/// Pseudo-random function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrfAlgorithm {
    HmacMd5,
    HmacSha1,
}

impl PrfAlgorithm {
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            PRF_HMAC_MD5 => Some(Self::HmacMd5),
            PRF_HMAC_SHA1 => Some(Self::HmacSha1),
            _ => None,
        }
    }

    pub fn id(&self) -> u16 {
        match self {
            Self::HmacMd5 => PRF_HMAC_MD5,
            Self::HmacSha1 => PRF_HMAC_SHA1,
        }
    }

    /// Preferred key length, equal to the output length
    pub fn key_len(&self) -> usize {
        match self {
            Self::HmacMd5 => 16,
            Self::HmacSha1 => 20,
        }
    }

    pub fn compute(&self, key: &[u8], data: &[u8]) -> TngfResult<Vec<u8>> {
        match self {
            Self::HmacMd5 => hmac_digest::<Hmac<Md5>>(key, data),
            Self::HmacSha1 => hmac_digest::<Hmac<Sha1>>(key, data),
        }
    }

    /// prf+ (RFC 7296 2.13): T1 = prf(K, S | 0x01), Tn = prf(K, Tn-1 | S | n)
    pub fn plus(&self, key: &[u8], seed: &[u8], len: usize) -> TngfResult<Vec<u8>> {
        let mut out = Vec::with_capacity(len + self.key_len());
        let mut block = Vec::new();
        let mut counter: u8 = 1;
        while out.len() < len {
            let mut input = Vec::with_capacity(block.len() + seed.len() + 1);
            input.extend_from_slice(&block);
            input.extend_from_slice(seed);
            input.push(counter);
            block = self.compute(key, &input)?;
            out.extend_from_slice(&block);
            counter = counter
                .checked_add(1)
                .ok_or_else(|| TngfError::Crypto(format!("prf+ cannot produce {len} bytes")))?;
        }
        out.truncate(len);
        Ok(out)
    }
}

/// Integrity algorithm of the SK payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityAlgorithm {
    HmacMd5_96,
    HmacSha1_96,
}

impl IntegrityAlgorithm {
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            AUTH_HMAC_MD5_96 => Some(Self::HmacMd5_96),
            AUTH_HMAC_SHA1_96 => Some(Self::HmacSha1_96),
            _ => None,
        }
    }

    pub fn id(&self) -> u16 {
        match self {
            Self::HmacMd5_96 => AUTH_HMAC_MD5_96,
            Self::HmacSha1_96 => AUTH_HMAC_SHA1_96,
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            Self::HmacMd5_96 => 16,
            Self::HmacSha1_96 => 20,
        }
    }

    /// HMAC truncated to the ICV length
    pub fn checksum(&self, key: &[u8], data: &[u8]) -> TngfResult<[u8; ICV_LEN]> {
        let digest = match self {
            Self::HmacMd5_96 => hmac_digest::<Hmac<Md5>>(key, data)?,
            Self::HmacSha1_96 => hmac_digest::<Hmac<Sha1>>(key, data)?,
        };
        let mut icv = [0u8; ICV_LEN];
        icv.copy_from_slice(&digest[..ICV_LEN]);
        Ok(icv)
    }
}

/// MODP Diffie-Hellman group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhGroup {
    /// Group 2
    Modp1024,
    /// Group 14
    Modp2048,
}

impl DhGroup {
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            DH_1024_BIT_MODP => Some(Self::Modp1024),
            DH_2048_BIT_MODP => Some(Self::Modp2048),
            _ => None,
        }
    }

    pub fn id(&self) -> u16 {
        match self {
            Self::Modp1024 => DH_1024_BIT_MODP,
            Self::Modp2048 => DH_2048_BIT_MODP,
        }
    }

    /// Prime length in bytes; public values and shared secrets are padded to it
    pub fn prime_len(&self) -> usize {
        match self {
            Self::Modp1024 => 128,
            Self::Modp2048 => 256,
        }
    }

    fn prime(&self) -> BigUint {
        let hex = match self {
            Self::Modp1024 => MODP_1024_PRIME,
            Self::Modp2048 => MODP_2048_PRIME,
        };
        // The constants are valid hex
        BigUint::parse_bytes(hex.as_bytes(), 16).unwrap_or_default()
    }
}

fn left_pad(value: &BigUint, len: usize) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes.len() >= len {
        return bytes;
    }
    let mut out = vec![0u8; len - bytes.len()];
    out.extend_from_slice(&bytes);
    out
}

/// Local Diffie-Hellman secret with its public value
#[derive(Debug, Clone)]
pub struct DhKeyPair {
    group: DhGroup,
    secret: BigUint,
    public: Vec<u8>,
}

impl DhKeyPair {
    pub fn generate(group: DhGroup) -> Self {
        let prime = group.prime();
        let secret = BigUint::from_bytes_be(&random_bytes(group.prime_len())) % &prime;
        let public = BigUint::from(DH_GENERATOR).modpow(&secret, &prime);
        Self {
            group,
            secret,
            public: left_pad(&public, group.prime_len()),
        }
    }

    pub fn group(&self) -> DhGroup {
        self.group
    }

    pub fn public_value(&self) -> &[u8] {
        &self.public
    }

    /// g^ir from the peer's KE data
    pub fn shared_secret(&self, peer_public: &[u8]) -> TngfResult<Vec<u8>> {
        let prime = self.group.prime();
        let peer = BigUint::from_bytes_be(peer_public);
        let one = BigUint::from(1u32);
        if peer <= one || peer >= &prime - &one {
            return Err(TngfError::Crypto("peer DH public value out of range".into()));
        }
        Ok(left_pad(&peer.modpow(&self.secret, &prime), self.group.prime_len()))
    }
}

/// Transforms chosen for an IKE SA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IkeTransforms {
    pub encryption: EncryptionAlgorithm,
    pub prf: PrfAlgorithm,
    pub integrity: IntegrityAlgorithm,
    pub dh_group: DhGroup,
}

impl IkeTransforms {
    /// The chosen proposal as echoed in the IKE_SA_INIT response
    pub fn to_proposal(&self, proposal_number: u8) -> Proposal {
        let mut proposal = Proposal::new(proposal_number, PROTOCOL_IKE, Bytes::new());
        proposal
            .push(self.encryption.to_transform())
            .push(Transform::new(TRANSFORM_PRF, self.prf.id()))
            .push(Transform::new(TRANSFORM_INTEG, self.integrity.id()))
            .push(Transform::new(TRANSFORM_DH, self.dh_group.id()));
        proposal
    }
}

/// First fully supported IKE proposal, taking the first supported transform
/// of each type. ESN may only be offered as NO.
pub fn select_ike_proposal(proposals: &[Proposal]) -> Option<(u8, IkeTransforms)> {
    proposals.iter().filter(|p| p.protocol_id == PROTOCOL_IKE).find_map(|p| {
        let encryption = p.transforms_of(TRANSFORM_ENCR).find_map(EncryptionAlgorithm::from_transform)?;
        let prf = p.transforms_of(TRANSFORM_PRF).find_map(|t| PrfAlgorithm::from_id(t.transform_id))?;
        let integrity = p
            .transforms_of(TRANSFORM_INTEG)
            .find_map(|t| IntegrityAlgorithm::from_id(t.transform_id))?;
        let dh_group = p.transforms_of(TRANSFORM_DH).find_map(|t| DhGroup::from_id(t.transform_id))?;
        let mut esn = p.transforms_of(TRANSFORM_ESN).peekable();
        if esn.peek().is_some() && !esn.any(|t| t.transform_id == ESN_NO) {
            return None;
        }
        Some((
            p.proposal_number,
            IkeTransforms {
                encryption,
                prf,
                integrity,
                dh_group,
            },
        ))
    })
}

// ============================================================================
// IKE SA keys
// ============================================================================

/// SK_* keys of an IKE SA
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IkeKeys {
    pub sk_d: Vec<u8>,
    pub sk_ai: Vec<u8>,
    pub sk_ar: Vec<u8>,
    pub sk_ei: Vec<u8>,
    pub sk_er: Vec<u8>,
    pub sk_pi: Vec<u8>,
    pub sk_pr: Vec<u8>,
}

impl IkeKeys {
    /// SKEYSEED = prf(Ni | Nr, g^ir), then
    /// {SK_d | SK_ai | SK_ar | SK_ei | SK_er | SK_pi | SK_pr} = prf+(SKEYSEED, Ni | Nr | SPIi | SPIr)
    pub fn derive(
        transforms: &IkeTransforms,
        ni: &[u8],
        nr: &[u8],
        shared_secret: &[u8],
        spi_i: u64,
        spi_r: u64,
    ) -> TngfResult<Self> {
        let prf = transforms.prf;
        let mut nonces = Vec::with_capacity(ni.len() + nr.len());
        nonces.extend_from_slice(ni);
        nonces.extend_from_slice(nr);
        let skeyseed = prf.compute(&nonces, shared_secret)?;

        let mut seed = nonces;
        seed.extend_from_slice(&spi_i.to_be_bytes());
        seed.extend_from_slice(&spi_r.to_be_bytes());

        let prf_len = prf.key_len();
        let integ_len = transforms.integrity.key_len();
        let encr_len = transforms.encryption.key_len();
        let total = 3 * prf_len + 2 * integ_len + 2 * encr_len;
        let material = prf.plus(&skeyseed, &seed, total)?;

        let mut keys = KeySplitter::new(&material);
        Ok(Self {
            sk_d: keys.take(prf_len),
            sk_ai: keys.take(integ_len),
            sk_ar: keys.take(integ_len),
            sk_ei: keys.take(encr_len),
            sk_er: keys.take(encr_len),
            sk_pi: keys.take(prf_len),
            sk_pr: keys.take(prf_len),
        })
    }
}

struct KeySplitter<'a> {
    material: &'a [u8],
}

impl<'a> KeySplitter<'a> {
    fn new(material: &'a [u8]) -> Self {
        Self { material }
    }

    fn take(&mut self, len: usize) -> Vec<u8> {
        let (head, rest) = self.material.split_at(len.min(self.material.len()));
        self.material = rest;
        head.to_vec()
    }
}

// ============================================================================
// SK payload
// ============================================================================

fn encrypt_body(algorithm: EncryptionAlgorithm, key: &[u8], plain: &[u8]) -> TngfResult<Vec<u8>> {
    match algorithm {
        EncryptionAlgorithm::Null => {
            let mut out = Vec::with_capacity(plain.len() + 1);
            out.extend_from_slice(plain);
            out.push(0);
            Ok(out)
        }
        EncryptionAlgorithm::AesCbc { .. } => {
            let pad_len = AES_BLOCK_SIZE - 1 - plain.len() % AES_BLOCK_SIZE;
            let mut padded = Vec::with_capacity(plain.len() + pad_len + 1);
            padded.extend_from_slice(plain);
            padded.resize(plain.len() + pad_len, 0);
            padded.push(pad_len as u8);

            let iv = random_bytes(AES_BLOCK_SIZE);
            let cipher = aes_cbc_encrypt(key, &iv, &padded)?;
            let mut out = iv;
            out.extend_from_slice(&cipher);
            Ok(out)
        }
    }
}

fn decrypt_body(algorithm: EncryptionAlgorithm, key: &[u8], body: &[u8]) -> TngfResult<Vec<u8>> {
    let plain = match algorithm {
        EncryptionAlgorithm::Null => body.to_vec(),
        EncryptionAlgorithm::AesCbc { .. } => {
            if body.len() < AES_BLOCK_SIZE {
                return Err(TngfError::Crypto("cipher text shorter than the IV".into()));
            }
            let (iv, cipher) = body.split_at(AES_BLOCK_SIZE);
            aes_cbc_decrypt(key, iv, cipher)?
        }
    };
    let pad_len = match plain.last() {
        Some(&last) => last as usize + 1,
        None => return Err(TngfError::Crypto("empty encrypted payload".into())),
    };
    if pad_len > plain.len() {
        return Err(TngfError::Crypto(format!("pad length {pad_len} exceeds payload")));
    }
    Ok(plain[..plain.len() - pad_len].to_vec())
}

/// Encrypt `payloads` into an SK payload under `header` and return the whole
/// datagram with its ICV.
pub fn encrypt_message(
    transforms: &IkeTransforms,
    keys: &IkeKeys,
    header: IkeHeader,
    payloads: &[Payload],
) -> TngfResult<BytesMut> {
    let mut plain = BytesMut::new();
    encode_payloads(payloads, &mut plain)?;

    let mut data = BytesMut::from(&encrypt_body(transforms.encryption, &keys.sk_er, &plain)?[..]);
    data.put_bytes(0, ICV_LEN);

    let mut message = IkeMessage::new(header);
    message.push(Payload::Encrypted {
        next_payload: first_payload_type(payloads),
        data: data.freeze(),
    });
    let mut encoded = message.encode()?;

    let signed_len = encoded.len() - ICV_LEN;
    let icv = transforms.integrity.checksum(&keys.sk_ar, &encoded[..signed_len])?;
    encoded[signed_len..].copy_from_slice(&icv);
    Ok(encoded)
}

/// Verify the ICV over the raw datagram, then decrypt the SK payload of
/// `message` into its inner payloads.
pub fn decrypt_message(
    transforms: &IkeTransforms,
    keys: &IkeKeys,
    raw: &[u8],
    message: &IkeMessage,
) -> TngfResult<Vec<Payload>> {
    let (first_type, data) = message
        .encrypted()
        .ok_or_else(|| TngfError::Crypto("no encrypted payload".into()))?;
    if data.len() < ICV_LEN || raw.len() < ICV_LEN {
        return Err(TngfError::Crypto("encrypted payload shorter than the ICV".into()));
    }

    let (signed, icv) = raw.split_at(raw.len() - ICV_LEN);
    let expected = transforms.integrity.checksum(&keys.sk_ai, signed)?;
    if expected[..] != *icv {
        return Err(TngfError::ChecksumMismatch);
    }

    let plain = decrypt_body(transforms.encryption, &keys.sk_ei, &data[..data.len() - ICV_LEN])?;
    Ok(decode_payloads(first_type, Bytes::from(plain))?)
}

// ============================================================================
// NAT detection and AUTH
// ============================================================================

/// NAT_DETECTION_*_IP data: SHA1(SPIi | SPIr | IP | port)
pub fn nat_detection_hash(spi_i: u64, spi_r: u64, addr: std::net::Ipv4Addr, port: u16) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(spi_i.to_be_bytes());
    hasher.update(spi_r.to_be_bytes());
    hasher.update(addr.octets());
    hasher.update(port.to_be_bytes());
    hasher.finalize().into()
}

/// The ID payload body as covered by the signed octets
pub fn identification_body(id: &Identification) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + id.data.len());
    body.extend_from_slice(&[id.id_type, 0, 0, 0]);
    body.extend_from_slice(&id.data);
    body
}

/// AUTH = prf(prf(Shared Secret, "Key Pad for IKEv2"), signed octets)
pub fn shared_key_auth(prf: PrfAlgorithm, shared_secret: &[u8], signed_octets: &[u8]) -> TngfResult<Vec<u8>> {
    let secret = prf.compute(shared_secret, KEY_PAD)?;
    prf.compute(&secret, signed_octets)
}

// ============================================================================
// Child SA algorithms
// ============================================================================

/// Key length of an ESP encryption transform accepted by the kernel
pub fn esp_encryption_key_len(transform: &Transform) -> Option<usize> {
    let from_attribute = || transform.key_length.map(|bits| bits as usize / 8);
    match transform.transform_id {
        ENCR_DES => Some(8),
        ENCR_3DES => Some(24),
        ENCR_CAST => Some(from_attribute().unwrap_or(16)),
        ENCR_BLOWFISH => Some(from_attribute().unwrap_or(16)),
        ENCR_NULL => Some(0),
        ENCR_AES_CBC => from_attribute().filter(|len| matches!(len, 16 | 24 | 32)),
        // RFC 3686 appends a 4-byte nonce to the key
        ENCR_AES_CTR => from_attribute().filter(|len| matches!(len, 16 | 24 | 32)).map(|len| len + 4),
        _ => None,
    }
}

/// Key length of an ESP integrity transform accepted by the kernel
pub fn esp_integrity_key_len(transform_id: u16) -> Option<usize> {
    match transform_id {
        AUTH_NONE => Some(0),
        AUTH_HMAC_MD5_96 => Some(16),
        AUTH_HMAC_SHA1_96 => Some(20),
        AUTH_AES_XCBC_96 => Some(16),
        _ => None,
    }
}

/// Transforms chosen for a Child SA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildTransforms {
    pub encryption: Transform,
    /// None when the proposal carries no INTEG or INTEG NONE
    pub integrity: Option<Transform>,
    pub esn: bool,
}

impl ChildTransforms {
    /// First supported transform of each type. PRF must be absent and the
    /// SPI must be 4 bytes.
    pub fn from_proposal(proposal: &Proposal) -> Option<Self> {
        if proposal.protocol_id != PROTOCOL_ESP || proposal.spi.len() != 4 {
            return None;
        }
        if proposal.transforms_of(TRANSFORM_PRF).next().is_some() {
            return None;
        }
        let encryption = *proposal
            .transforms_of(TRANSFORM_ENCR)
            .find(|t| esp_encryption_key_len(t).is_some())?;

        let mut integrity_offered = proposal.transforms_of(TRANSFORM_INTEG).peekable();
        let integrity = if integrity_offered.peek().is_some() {
            let chosen = *integrity_offered.find(|t| esp_integrity_key_len(t.transform_id).is_some())?;
            (chosen.transform_id != AUTH_NONE).then_some(chosen)
        } else {
            None
        };

        let mut esn_offered = proposal.transforms_of(TRANSFORM_ESN).peekable();
        let esn = if esn_offered.peek().is_some() {
            esn_offered
                .find(|t| t.transform_id == ESN_NO || t.transform_id == ESN_YES)?
                .transform_id
                == ESN_YES
        } else {
            false
        };

        Some(Self {
            encryption,
            integrity,
            esn,
        })
    }

    /// Transforms offered by the gateway for a PDU session Child SA
    pub fn for_pdu_session(integrity_required: bool) -> Self {
        Self {
            encryption: Transform::new(TRANSFORM_ENCR, ENCR_NULL),
            integrity: integrity_required.then(|| Transform::new(TRANSFORM_INTEG, AUTH_HMAC_SHA1_96)),
            esn: false,
        }
    }

    pub fn encryption_key_len(&self) -> usize {
        esp_encryption_key_len(&self.encryption).unwrap_or(0)
    }

    pub fn integrity_key_len(&self) -> usize {
        self.integrity
            .and_then(|t| esp_integrity_key_len(t.transform_id))
            .unwrap_or(0)
    }

    pub fn to_proposal(&self, proposal_number: u8, spi: u32) -> Proposal {
        let mut proposal = Proposal::new(proposal_number, PROTOCOL_ESP, Bytes::copy_from_slice(&spi.to_be_bytes()));
        proposal.push(self.encryption);
        if let Some(integrity) = self.integrity {
            proposal.push(integrity);
        }
        proposal.push(Transform::new(TRANSFORM_ESN, if self.esn { ESN_YES } else { ESN_NO }));
        proposal
    }
}

/// First acceptable Child SA proposal
pub fn select_child_proposal(proposals: &[Proposal]) -> Option<(&Proposal, ChildTransforms)> {
    proposals
        .iter()
        .find_map(|p| ChildTransforms::from_proposal(p).map(|transforms| (p, transforms)))
}

/// Per-direction Child SA keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildKeys {
    pub initiator_to_responder_encryption: Vec<u8>,
    pub initiator_to_responder_integrity: Vec<u8>,
    pub responder_to_initiator_encryption: Vec<u8>,
    pub responder_to_initiator_integrity: Vec<u8>,
}

impl ChildKeys {
    /// KEYMAT = prf+(SK_d, Ni | Nr), split encr/integ I->R then R->I
    pub fn derive(
        prf: PrfAlgorithm,
        sk_d: &[u8],
        ni: &[u8],
        nr: &[u8],
        transforms: &ChildTransforms,
    ) -> TngfResult<Self> {
        let encr_len = transforms.encryption_key_len();
        let integ_len = transforms.integrity_key_len();
        let mut seed = Vec::with_capacity(ni.len() + nr.len());
        seed.extend_from_slice(ni);
        seed.extend_from_slice(nr);
        let material = prf.plus(sk_d, &seed, 2 * (encr_len + integ_len))?;

        let mut keys = KeySplitter::new(&material);
        Ok(Self {
            initiator_to_responder_encryption: keys.take(encr_len),
            initiator_to_responder_integrity: keys.take(integ_len),
            responder_to_initiator_encryption: keys.take(encr_len),
            responder_to_initiator_integrity: keys.take(integ_len),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogs_ike::{ExchangeType, Notification, ID_FQDN, IKE_FLAG_RESPONSE, NOTIFY_NAS_TCP_PORT};

    fn transforms(encryption: EncryptionAlgorithm) -> IkeTransforms {
        IkeTransforms {
            encryption,
            prf: PrfAlgorithm::HmacSha1,
            integrity: IntegrityAlgorithm::HmacSha1_96,
            dh_group: DhGroup::Modp1024,
        }
    }

    // Same keys in both directions so a message encrypted as responder
    // decrypts as if it came from the initiator
    fn symmetric_keys(encr_len: usize) -> IkeKeys {
        IkeKeys {
            sk_ai: vec![0x11; 20],
            sk_ar: vec![0x11; 20],
            sk_ei: vec![0x22; encr_len],
            sk_er: vec![0x22; encr_len],
            ..Default::default()
        }
    }

    fn ike_proposal(number: u8, transforms: &[Transform]) -> Proposal {
        let mut proposal = Proposal::new(number, PROTOCOL_IKE, Bytes::new());
        for t in transforms {
            proposal.push(*t);
        }
        proposal
    }

    #[test]
    fn test_prf_plus_first_block() {
        let prf = PrfAlgorithm::HmacSha1;
        let out = prf.plus(b"key", b"seed", 50).unwrap();
        assert_eq!(out.len(), 50);
        assert_eq!(&out[..20], &prf.compute(b"key", b"seed\x01").unwrap()[..]);
    }

    #[test]
    fn test_select_ike_proposal_skips_unsupported() {
        let unsupported = ike_proposal(
            1,
            &[
                Transform::new(TRANSFORM_ENCR, ENCR_3DES),
                Transform::new(TRANSFORM_PRF, PRF_HMAC_SHA1),
                Transform::new(TRANSFORM_INTEG, AUTH_HMAC_SHA1_96),
                Transform::new(TRANSFORM_DH, DH_2048_BIT_MODP),
            ],
        );
        let supported = ike_proposal(
            2,
            &[
                Transform::new(TRANSFORM_ENCR, ENCR_AES_CBC).with_key_length(256),
                Transform::new(TRANSFORM_PRF, 5),
                Transform::new(TRANSFORM_PRF, PRF_HMAC_MD5),
                Transform::new(TRANSFORM_INTEG, AUTH_HMAC_MD5_96),
                Transform::new(TRANSFORM_DH, DH_2048_BIT_MODP),
            ],
        );
        let (number, chosen) = select_ike_proposal(&[unsupported, supported]).unwrap();
        assert_eq!(number, 2);
        assert_eq!(chosen.encryption, EncryptionAlgorithm::AesCbc { key_len: 32 });
        assert_eq!(chosen.prf, PrfAlgorithm::HmacMd5);
        assert_eq!(chosen.dh_group, DhGroup::Modp2048);
    }

    #[test]
    fn test_select_ike_proposal_rejects_esn_yes() {
        let proposal = ike_proposal(
            1,
            &[
                Transform::new(TRANSFORM_ENCR, ENCR_NULL),
                Transform::new(TRANSFORM_PRF, PRF_HMAC_SHA1),
                Transform::new(TRANSFORM_INTEG, AUTH_HMAC_SHA1_96),
                Transform::new(TRANSFORM_DH, DH_1024_BIT_MODP),
                Transform::new(TRANSFORM_ESN, ESN_YES),
            ],
        );
        assert!(select_ike_proposal(&[proposal]).is_none());
    }

    #[test]
    fn test_child_proposal_rules() {
        let mut good = Proposal::new(1, PROTOCOL_ESP, Bytes::from_static(&[0, 0, 1, 0]));
        good.push(Transform::new(TRANSFORM_ENCR, ENCR_AES_CBC).with_key_length(128))
            .push(Transform::new(TRANSFORM_INTEG, AUTH_HMAC_SHA1_96))
            .push(Transform::new(TRANSFORM_ESN, ESN_NO));
        let chosen = ChildTransforms::from_proposal(&good).unwrap();
        assert_eq!(chosen.encryption_key_len(), 16);
        assert_eq!(chosen.integrity_key_len(), 20);
        assert!(!chosen.esn);

        let mut with_prf = good.clone();
        with_prf.push(Transform::new(TRANSFORM_PRF, PRF_HMAC_SHA1));
        assert!(ChildTransforms::from_proposal(&with_prf).is_none());

        let mut short_spi = good.clone();
        short_spi.spi = Bytes::from_static(&[1, 2, 3]);
        assert!(ChildTransforms::from_proposal(&short_spi).is_none());
    }

    #[test]
    fn test_pdu_session_transforms() {
        let offered = ChildTransforms::for_pdu_session(true);
        let proposal = offered.to_proposal(1, 0x1234_5678);
        assert_eq!(&proposal.spi[..], &[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(ChildTransforms::from_proposal(&proposal), Some(offered));
        assert_eq!(ChildTransforms::for_pdu_session(false).integrity_key_len(), 0);
    }

    #[test]
    fn test_child_keys_split() {
        let transforms = ChildTransforms::for_pdu_session(true);
        let keys = ChildKeys::derive(PrfAlgorithm::HmacSha1, &[7; 20], b"ni", b"nr", &transforms).unwrap();
        assert!(keys.initiator_to_responder_encryption.is_empty());
        assert_eq!(keys.initiator_to_responder_integrity.len(), 20);
        assert_eq!(keys.responder_to_initiator_integrity.len(), 20);
        assert_ne!(keys.initiator_to_responder_integrity, keys.responder_to_initiator_integrity);
    }

    #[test]
    fn test_ike_keys_lengths() {
        let t = transforms(EncryptionAlgorithm::AesCbc { key_len: 16 });
        let keys = IkeKeys::derive(&t, &[1; 32], &[2; 32], &[3; 128], 1, 2).unwrap();
        assert_eq!(keys.sk_d.len(), 20);
        assert_eq!(keys.sk_ai.len(), 20);
        assert_eq!(keys.sk_er.len(), 16);
        assert_eq!(keys.sk_pr.len(), 20);
    }

    #[test]
    fn test_dh_agreement() {
        let a = DhKeyPair::generate(DhGroup::Modp1024);
        let b = DhKeyPair::generate(DhGroup::Modp1024);
        assert_eq!(a.public_value().len(), 128);
        let ab = a.shared_secret(b.public_value()).unwrap();
        let ba = b.shared_secret(a.public_value()).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 128);
    }

    #[test]
    fn test_dh_rejects_trivial_peer() {
        let a = DhKeyPair::generate(DhGroup::Modp1024);
        assert!(a.shared_secret(&[1]).is_err());
    }

    #[test]
    fn test_encrypt_decrypt_aes() {
        let t = transforms(EncryptionAlgorithm::AesCbc { key_len: 16 });
        let keys = symmetric_keys(16);
        let header = IkeHeader::new(1, 2, ExchangeType::IkeAuth as u8, IKE_FLAG_RESPONSE, 1);
        let payloads = vec![
            Payload::IdResponder(Identification {
                id_type: ID_FQDN,
                data: Bytes::from_static(b"tngf.free5gc.org"),
            }),
            Payload::Notify(Notification::nas_tcp_port(20000)),
        ];

        let encoded = encrypt_message(&t, &keys, header, &payloads).unwrap();
        let message = IkeMessage::decode(&encoded).unwrap();
        let decrypted = decrypt_message(&t, &keys, &encoded, &message).unwrap();
        assert_eq!(decrypted, payloads);
    }

    #[test]
    fn test_encrypt_null_and_tamper() {
        let t = transforms(EncryptionAlgorithm::Null);
        let keys = symmetric_keys(0);
        let header = IkeHeader::new(1, 2, ExchangeType::Informational as u8, IKE_FLAG_RESPONSE, 3);
        let payloads = vec![Payload::Notify(Notification::new(NOTIFY_NAS_TCP_PORT, vec![0x4e, 0x20]))];

        let mut encoded = encrypt_message(&t, &keys, header, &payloads).unwrap();
        let message = IkeMessage::decode(&encoded).unwrap();
        assert_eq!(decrypt_message(&t, &keys, &encoded, &message).unwrap(), payloads);

        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        let message = IkeMessage::decode(&encoded).unwrap();
        assert!(matches!(
            decrypt_message(&t, &keys, &encoded, &message),
            Err(TngfError::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_nat_detection_depends_on_port() {
        let addr = std::net::Ipv4Addr::new(10, 0, 0, 1);
        assert_ne!(nat_detection_hash(1, 2, addr, 500), nat_detection_hash(1, 2, addr, 4500));
    }

    #[test]
    fn test_identification_body() {
        let id = Identification {
            id_type: ID_FQDN,
            data: Bytes::from_static(b"ab"),
        };
        assert_eq!(identification_body(&id), vec![ID_FQDN, 0, 0, 0, b'a', b'b']);
    }
}
