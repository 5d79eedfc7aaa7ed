//! IKEv2 protocol constants (RFC 7296, TS 24.502 9.3)

use crate::error::IkeError;

/// IKE header length
pub const IKE_HEADER_LEN: usize = 28;
/// Generic payload header length
pub const IKE_PAYLOAD_HEADER_LEN: usize = 4;

/// IKEv2 major version
pub const IKE_MAJOR_VERSION: u8 = 2;
/// IKEv2 minor version
pub const IKE_MINOR_VERSION: u8 = 0;

/// Header flags
pub const IKE_FLAG_INITIATOR: u8 = 0x08;
pub const IKE_FLAG_VERSION: u8 = 0x10;
pub const IKE_FLAG_RESPONSE: u8 = 0x20;

/// Exchange types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExchangeType {
    IkeSaInit = 34,
    IkeAuth = 35,
    CreateChildSa = 36,
    Informational = 37,
}

impl TryFrom<u8> for ExchangeType {
    type Error = IkeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            34 => Ok(ExchangeType::IkeSaInit),
            35 => Ok(ExchangeType::IkeAuth),
            36 => Ok(ExchangeType::CreateChildSa),
            37 => Ok(ExchangeType::Informational),
            _ => Err(IkeError::InvalidPayload {
                payload_type: 0,
                reason: format!("unknown exchange type {value}"),
            }),
        }
    }
}

/// Payload types
pub const PAYLOAD_NONE: u8 = 0;
pub const PAYLOAD_SA: u8 = 33;
pub const PAYLOAD_KE: u8 = 34;
pub const PAYLOAD_IDI: u8 = 35;
pub const PAYLOAD_IDR: u8 = 36;
pub const PAYLOAD_CERT: u8 = 37;
pub const PAYLOAD_CERTREQ: u8 = 38;
pub const PAYLOAD_AUTH: u8 = 39;
pub const PAYLOAD_NONCE: u8 = 40;
pub const PAYLOAD_NOTIFY: u8 = 41;
pub const PAYLOAD_DELETE: u8 = 42;
pub const PAYLOAD_VENDOR: u8 = 43;
pub const PAYLOAD_TSI: u8 = 44;
pub const PAYLOAD_TSR: u8 = 45;
pub const PAYLOAD_SK: u8 = 46;
pub const PAYLOAD_CP: u8 = 47;
pub const PAYLOAD_EAP: u8 = 48;

/// Notify message types: errors
pub const NOTIFY_UNSUPPORTED_CRITICAL_PAYLOAD: u16 = 1;
pub const NOTIFY_INVALID_IKE_SPI: u16 = 4;
pub const NOTIFY_INVALID_MAJOR_VERSION: u16 = 5;
pub const NOTIFY_INVALID_SYNTAX: u16 = 7;
pub const NOTIFY_INVALID_MESSAGE_ID: u16 = 9;
pub const NOTIFY_INVALID_SPI: u16 = 11;
pub const NOTIFY_NO_PROPOSAL_CHOSEN: u16 = 14;
pub const NOTIFY_INVALID_KE_PAYLOAD: u16 = 17;
pub const NOTIFY_AUTHENTICATION_FAILED: u16 = 24;
pub const NOTIFY_SINGLE_PAIR_REQUIRED: u16 = 34;
pub const NOTIFY_NO_ADDITIONAL_SAS: u16 = 35;
pub const NOTIFY_INTERNAL_ADDRESS_FAILURE: u16 = 36;
pub const NOTIFY_FAILED_CP_REQUIRED: u16 = 37;
pub const NOTIFY_TS_UNACCEPTABLE: u16 = 38;

/// Notify message types: status
pub const NOTIFY_INITIAL_CONTACT: u16 = 16384;
pub const NOTIFY_NAT_DETECTION_SOURCE_IP: u16 = 16388;
pub const NOTIFY_NAT_DETECTION_DESTINATION_IP: u16 = 16389;
pub const NOTIFY_USE_TRANSPORT_MODE: u16 = 16391;

/// 3GPP private notify types (TS 24.502 9.3.1)
pub const NOTIFY_5G_QOS_INFO: u16 = 55501;
pub const NOTIFY_NAS_IP4_ADDRESS: u16 = 55502;
pub const NOTIFY_NAS_IP6_ADDRESS: u16 = 55503;
pub const NOTIFY_UP_IP4_ADDRESS: u16 = 55504;
pub const NOTIFY_UP_IP6_ADDRESS: u16 = 55505;
pub const NOTIFY_NAS_TCP_PORT: u16 = 55506;

/// 5G_QOS_INFO flag bits
pub const QOS_INFO_FLAG_DCSI: u8 = 0x01;
pub const QOS_INFO_FLAG_DSCPI: u8 = 0x02;

/// Protocol identifiers
pub const PROTOCOL_NONE: u8 = 0;
pub const PROTOCOL_IKE: u8 = 1;
pub const PROTOCOL_AH: u8 = 2;
pub const PROTOCOL_ESP: u8 = 3;

/// Transform types
pub const TRANSFORM_ENCR: u8 = 1;
pub const TRANSFORM_PRF: u8 = 2;
pub const TRANSFORM_INTEG: u8 = 3;
pub const TRANSFORM_DH: u8 = 4;
pub const TRANSFORM_ESN: u8 = 5;

/// Encryption algorithm transform IDs
pub const ENCR_DES: u16 = 2;
pub const ENCR_3DES: u16 = 3;
pub const ENCR_CAST: u16 = 6;
pub const ENCR_BLOWFISH: u16 = 7;
pub const ENCR_NULL: u16 = 11;
pub const ENCR_AES_CBC: u16 = 12;
pub const ENCR_AES_CTR: u16 = 13;

/// Pseudorandom function transform IDs
pub const PRF_HMAC_MD5: u16 = 1;
pub const PRF_HMAC_SHA1: u16 = 2;

/// Integrity algorithm transform IDs
pub const AUTH_NONE: u16 = 0;
pub const AUTH_HMAC_MD5_96: u16 = 1;
pub const AUTH_HMAC_SHA1_96: u16 = 2;
pub const AUTH_AES_XCBC_96: u16 = 5;

/// Diffie-Hellman group transform IDs
pub const DH_1024_BIT_MODP: u16 = 2;
pub const DH_2048_BIT_MODP: u16 = 14;

/// Extended sequence number transform IDs
pub const ESN_NO: u16 = 0;
pub const ESN_YES: u16 = 1;

/// Transform attribute: key length (TV format)
pub const ATTRIBUTE_KEY_LENGTH: u16 = 14;
/// Attribute format bit: TV when set
pub const ATTRIBUTE_FORMAT_TV: u16 = 0x8000;

/// Identification types
pub const ID_IPV4_ADDR: u8 = 1;
pub const ID_FQDN: u8 = 2;
pub const ID_RFC822_ADDR: u8 = 3;
pub const ID_IPV6_ADDR: u8 = 5;
pub const ID_DER_ASN1_DN: u8 = 9;
pub const ID_KEY_ID: u8 = 11;

/// Authentication methods
pub const AUTH_METHOD_RSA_DIGITAL_SIGNATURE: u8 = 1;
pub const AUTH_METHOD_SHARED_KEY_MIC: u8 = 2;

/// Certificate encoding: X.509 signature
pub const CERT_X509_SIGNATURE: u8 = 4;

/// Configuration payload types
pub const CFG_REQUEST: u8 = 1;
pub const CFG_REPLY: u8 = 2;
pub const CFG_SET: u8 = 3;
pub const CFG_ACK: u8 = 4;

/// Configuration attribute types
pub const INTERNAL_IP4_ADDRESS: u16 = 1;
pub const INTERNAL_IP4_NETMASK: u16 = 2;
pub const INTERNAL_IP4_DNS: u16 = 3;

/// Traffic selector types
pub const TS_IPV4_ADDR_RANGE: u8 = 7;
pub const TS_IPV6_ADDR_RANGE: u8 = 8;

/// IP protocol id meaning "any"
pub const IP_PROTOCOL_ALL: u8 = 0;
