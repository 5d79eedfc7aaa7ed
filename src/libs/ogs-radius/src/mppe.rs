//! Microsoft MPPE key attributes (RFC 2548 2.4.2, 2.4.3)
//!
//! Vendor-Specific value: `vendor-id(4) | vendor-type(1) | vendor-length(1) |
//! salt(2) | ciphertext`. The plaintext is `key-length | key | zero pad` to
//! a multiple of 16, hidden with an MD5 stream keyed by the shared secret
//! and the request authenticator.

use bytes::Bytes;
use md5::{Digest, Md5};

use crate::error::{need, RadiusError, RadiusResult};
use crate::message::{RadiusAttribute, ATTR_VENDOR_SPECIFIC, RADIUS_AUTHENTICATOR_LEN};

/// Microsoft vendor id
pub const VENDOR_ID_MICROSOFT: u32 = 311;
/// MS-MPPE-Send-Key
pub const MS_MPPE_SEND_KEY: u8 = 16;
/// MS-MPPE-Recv-Key
pub const MS_MPPE_RECV_KEY: u8 = 17;

const BLOCK: usize = 16;

/// Random salt with the most significant bit set
pub fn generate_salt() -> u16 {
    rand::random::<u16>() | 0x8000
}

fn keystream_block(secret: &[u8], parts: &[&[u8]]) -> [u8; BLOCK] {
    let mut md5 = Md5::new();
    md5.update(secret);
    for part in parts {
        md5.update(part);
    }
    md5.finalize().into()
}

/// Hide a key. `b1 = MD5(secret | request-auth | salt)`,
/// `bi = MD5(secret | c(i-1))`.
pub fn encrypt_mppe_key(
    key: &[u8],
    secret: &[u8],
    request_authenticator: &[u8; RADIUS_AUTHENTICATOR_LEN],
    salt: u16,
) -> RadiusResult<Vec<u8>> {
    let key_len = u8::try_from(key.len()).map_err(|_| RadiusError::TooLong {
        what: "MPPE key",
        length: key.len(),
    })?;
    let mut plain = Vec::with_capacity(key.len() + BLOCK);
    plain.push(key_len);
    plain.extend_from_slice(key);
    let padded = plain.len().div_ceil(BLOCK) * BLOCK;
    plain.resize(padded, 0);

    let salt = salt.to_be_bytes();
    let mut cipher: Vec<u8> = Vec::with_capacity(plain.len());
    for (i, chunk) in plain.chunks(BLOCK).enumerate() {
        let b = if i == 0 {
            keystream_block(secret, &[&request_authenticator[..], &salt[..]])
        } else {
            keystream_block(secret, &[&cipher[(i - 1) * BLOCK..i * BLOCK]])
        };
        cipher.extend(chunk.iter().zip(b.iter()).map(|(p, k)| p ^ k));
    }
    Ok(cipher)
}

/// Recover a hidden key
pub fn decrypt_mppe_key(
    cipher: &[u8],
    secret: &[u8],
    request_authenticator: &[u8; RADIUS_AUTHENTICATOR_LEN],
    salt: u16,
) -> RadiusResult<Vec<u8>> {
    if cipher.is_empty() || cipher.len() % BLOCK != 0 {
        return Err(RadiusError::InvalidLength {
            what: "MPPE ciphertext",
            length: cipher.len(),
        });
    }
    let salt = salt.to_be_bytes();
    let mut plain = Vec::with_capacity(cipher.len());
    for (i, chunk) in cipher.chunks(BLOCK).enumerate() {
        let b = if i == 0 {
            keystream_block(secret, &[&request_authenticator[..], &salt[..]])
        } else {
            keystream_block(secret, &[&cipher[(i - 1) * BLOCK..i * BLOCK]])
        };
        plain.extend(chunk.iter().zip(b.iter()).map(|(c, k)| c ^ k));
    }
    let key_len = plain[0] as usize;
    need("MPPE key", key_len + 1, plain.len())?;
    Ok(plain[1..=key_len].to_vec())
}

/// Build a Microsoft Vendor-Specific attribute carrying a hidden key
pub fn ms_mppe_key_attribute(
    vendor_type: u8,
    key: &[u8],
    secret: &[u8],
    request_authenticator: &[u8; RADIUS_AUTHENTICATOR_LEN],
    salt: u16,
) -> RadiusResult<RadiusAttribute> {
    let cipher = encrypt_mppe_key(key, secret, request_authenticator, salt)?;
    let vendor_len = 2 + 2 + cipher.len();
    let vendor_len = u8::try_from(vendor_len).map_err(|_| RadiusError::TooLong {
        what: "MPPE attribute",
        length: vendor_len,
    })?;

    let mut value = Vec::with_capacity(6 + 2 + cipher.len());
    value.extend_from_slice(&VENDOR_ID_MICROSOFT.to_be_bytes());
    value.push(vendor_type);
    value.push(vendor_len);
    value.extend_from_slice(&salt.to_be_bytes());
    value.extend_from_slice(&cipher);
    Ok(RadiusAttribute::new(ATTR_VENDOR_SPECIFIC, Bytes::from(value)))
}

/// Split a Microsoft MPPE Vendor-Specific value into vendor type, salt and
/// ciphertext
pub fn parse_ms_mppe_key_attribute(value: &[u8]) -> RadiusResult<(u8, u16, &[u8])> {
    need("MPPE attribute", 8, value.len())?;
    let vendor_id = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
    if vendor_id != VENDOR_ID_MICROSOFT {
        return Err(RadiusError::InvalidLength {
            what: "Microsoft vendor id",
            length: vendor_id as usize,
        });
    }
    let vendor_len = value[5] as usize;
    if vendor_len + 4 != value.len() {
        return Err(RadiusError::InvalidLength {
            what: "MPPE attribute",
            length: vendor_len,
        });
    }
    let salt = u16::from_be_bytes([value[6], value[7]]);
    Ok((value[4], salt, &value[8..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"free5GC";
    const AUTH: [u8; 16] = [0x5A; 16];

    #[test]
    fn test_salt_high_bit() {
        for _ in 0..32 {
            assert!(generate_salt() & 0x8000 != 0);
        }
    }

    #[test]
    fn test_padding_and_recovery() {
        let key = [0x33u8; 16];
        let cipher = encrypt_mppe_key(&key, SECRET, &AUTH, 0x8001).unwrap();
        // 1 + 16 rounds up to 32
        assert_eq!(cipher.len(), 32);
        assert_eq!(decrypt_mppe_key(&cipher, SECRET, &AUTH, 0x8001).unwrap(), key);
    }

    #[test]
    fn test_first_block_keystream() {
        let cipher = encrypt_mppe_key(&[], SECRET, &AUTH, 0x8123).unwrap();
        let mut md5 = Md5::new();
        md5.update(SECRET);
        md5.update(AUTH);
        md5.update([0x81, 0x23]);
        let b1: [u8; 16] = md5.finalize().into();
        // plaintext is all zero, so the ciphertext is b1
        assert_eq!(cipher, b1.to_vec());
    }

    #[test]
    fn test_attribute_layout() {
        let attr = ms_mppe_key_attribute(MS_MPPE_RECV_KEY, &[1; 16], SECRET, &AUTH, 0x8002).unwrap();
        assert_eq!(attr.attr_type, ATTR_VENDOR_SPECIFIC);
        assert_eq!(&attr.value[..6], &[0, 0, 0x01, 0x37, 17, 36]);
        let (vendor_type, salt, cipher) = parse_ms_mppe_key_attribute(&attr.value).unwrap();
        assert_eq!(vendor_type, MS_MPPE_RECV_KEY);
        assert_eq!(salt, 0x8002);
        assert_eq!(decrypt_mppe_key(cipher, SECRET, &AUTH, salt).unwrap(), vec![1; 16]);
    }
}
