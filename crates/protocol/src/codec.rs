//! Datagram layouts for the mux exchange.
//!
//! Request: `ident_len (1) | ident | salt (16) | mac (64)`
//! Response: `payload_len (1, always 4) | ssh_port (2, BE) | tun_port (2, BE)
//! | salt (16) | mac (64)`
//!
//! Both tags are keyed-BLAKE2b over the message with the shared secret as
//! key and the datagram's salt as the BLAKE2b salt parameter. The response
//! tag covers `ident || payload`, so a response issued for one identity
//! never authenticates for another. The salt is drawn fresh per build;
//! identical logical messages differ on the wire.

use blake2::digest::consts::U64;
use blake2::digest::Mac;
use blake2::Blake2bMac;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::{
    CodecError, MAC_LEN, MAX_IDENT_LEN, MAX_SECRET_LEN, RESPONSE_LEN, RESPONSE_PAYLOAD_LEN,
    SALT_LEN,
};

type WireMac = Blake2bMac<U64>;

fn keyed_mac(secret: &[u8], salt: &[u8; SALT_LEN]) -> Result<WireMac, CodecError> {
    if secret.is_empty() || secret.len() > MAX_SECRET_LEN {
        return Err(CodecError::SecretLength);
    }
    WireMac::new_with_salt_and_personal(secret, salt, &[]).map_err(|_| CodecError::SecretLength)
}

fn fresh_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Build an authenticated request for `ident`.
pub fn build_request(secret: &[u8], ident: &[u8]) -> Result<Vec<u8>, CodecError> {
    if ident.is_empty() || ident.len() > MAX_IDENT_LEN {
        return Err(CodecError::IdentLength(ident.len()));
    }

    let salt = fresh_salt();
    let mut mac = keyed_mac(secret, &salt)?;
    mac.update(ident);
    let tag = mac.finalize().into_bytes();

    let mut datagram = Vec::with_capacity(1 + ident.len() + SALT_LEN + MAC_LEN);
    datagram.push(ident.len() as u8);
    datagram.extend_from_slice(ident);
    datagram.extend_from_slice(&salt);
    datagram.extend_from_slice(&tag);
    Ok(datagram)
}

/// Authenticate and extract the identity from a request datagram.
///
/// Returns `None` on any structural or MAC failure; callers drop the
/// datagram silently in that case.
pub fn parse_request(secret: &[u8], datagram: &[u8]) -> Option<Vec<u8>> {
    let (&ident_len, rest) = datagram.split_first()?;
    let ident_len = ident_len as usize;
    if ident_len == 0 || rest.len() != ident_len + SALT_LEN + MAC_LEN {
        return None;
    }

    let (ident, rest) = rest.split_at(ident_len);
    let (salt, tag) = rest.split_at(SALT_LEN);
    let salt: [u8; SALT_LEN] = salt.try_into().ok()?;

    let mut mac = keyed_mac(secret, &salt).ok()?;
    mac.update(ident);
    mac.verify_slice(tag).ok()?;
    Some(ident.to_vec())
}

/// Build an authenticated response binding `(ssh_port, tun_port)` to `ident`.
pub fn build_response(
    secret: &[u8],
    ident: &[u8],
    tun_port: u16,
    ssh_port: u16,
) -> Result<Vec<u8>, CodecError> {
    if ident.is_empty() || ident.len() > MAX_IDENT_LEN {
        return Err(CodecError::IdentLength(ident.len()));
    }

    let mut payload = [0u8; RESPONSE_PAYLOAD_LEN];
    payload[..2].copy_from_slice(&ssh_port.to_be_bytes());
    payload[2..].copy_from_slice(&tun_port.to_be_bytes());

    let salt = fresh_salt();
    let mut mac = keyed_mac(secret, &salt)?;
    mac.update(ident);
    mac.update(&payload);
    let tag = mac.finalize().into_bytes();

    let mut datagram = Vec::with_capacity(RESPONSE_LEN);
    datagram.push(RESPONSE_PAYLOAD_LEN as u8);
    datagram.extend_from_slice(&payload);
    datagram.extend_from_slice(&salt);
    datagram.extend_from_slice(&tag);
    Ok(datagram)
}

/// Authenticate a response against the requester's own identity.
///
/// Returns `(ssh_port, tun_port)`, or `None` when the datagram is malformed
/// or was not issued for `ident` under `secret`.
pub fn parse_response(secret: &[u8], ident: &[u8], datagram: &[u8]) -> Option<(u16, u16)> {
    if datagram.len() != RESPONSE_LEN || datagram[0] as usize != RESPONSE_PAYLOAD_LEN {
        return None;
    }

    let payload = &datagram[1..1 + RESPONSE_PAYLOAD_LEN];
    let rest = &datagram[1 + RESPONSE_PAYLOAD_LEN..];
    let (salt, tag) = rest.split_at(SALT_LEN);
    let salt: [u8; SALT_LEN] = salt.try_into().ok()?;

    let mut mac = keyed_mac(secret, &salt).ok()?;
    mac.update(ident);
    mac.update(payload);
    mac.verify_slice(tag).ok()?;

    let ssh_port = u16::from_be_bytes([payload[0], payload[1]]);
    let tun_port = u16::from_be_bytes([payload[2], payload[3]]);
    Some((ssh_port, tun_port))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn request_roundtrip() {
        let datagram = build_request(SECRET, b"node-a").expect("build failed");
        assert_eq!(parse_request(SECRET, &datagram), Some(b"node-a".to_vec()));
    }

    #[test]
    fn request_roundtrip_max_ident() {
        let ident = vec![0xA5u8; MAX_IDENT_LEN];
        let datagram = build_request(SECRET, &ident).expect("build failed");
        assert_eq!(parse_request(SECRET, &datagram), Some(ident));
    }

    #[test]
    fn request_rejects_empty_ident() {
        assert!(matches!(
            build_request(SECRET, b""),
            Err(CodecError::IdentLength(0))
        ));
    }

    #[test]
    fn request_rejects_oversize_ident() {
        let ident = vec![0u8; MAX_IDENT_LEN + 1];
        assert!(matches!(
            build_request(SECRET, &ident),
            Err(CodecError::IdentLength(_))
        ));
    }

    #[test]
    fn build_rejects_bad_secret_lengths() {
        assert!(matches!(
            build_request(b"", b"node-a"),
            Err(CodecError::SecretLength)
        ));
        let oversize = vec![0u8; crate::MAX_SECRET_LEN + 1];
        assert!(matches!(
            build_request(&oversize, b"node-a"),
            Err(CodecError::SecretLength)
        ));
    }

    #[test]
    fn request_salt_is_fresh_per_build() {
        let a = build_request(SECRET, b"node-a").expect("build failed");
        let b = build_request(SECRET, b"node-a").expect("build failed");
        assert_ne!(a, b, "two builds of the same request must differ");
        // Both still authenticate.
        assert!(parse_request(SECRET, &a).is_some());
        assert!(parse_request(SECRET, &b).is_some());
    }

    #[test]
    fn request_any_bit_flip_fails_auth() {
        let datagram = build_request(SECRET, b"node-a").expect("build failed");
        for byte in 0..datagram.len() {
            for bit in 0..8 {
                let mut tampered = datagram.clone();
                tampered[byte] ^= 1 << bit;
                assert_eq!(
                    parse_request(SECRET, &tampered),
                    None,
                    "flip of byte {byte} bit {bit} was accepted"
                );
            }
        }
    }

    #[test]
    fn request_wrong_secret_fails_auth() {
        let datagram = build_request(SECRET, b"node-a").expect("build failed");
        assert_eq!(parse_request(b"other-secret", &datagram), None);
    }

    #[test]
    fn request_truncated_or_padded_fails() {
        let datagram = build_request(SECRET, b"node-a").expect("build failed");
        assert_eq!(parse_request(SECRET, &datagram[..datagram.len() - 1]), None);
        let mut padded = datagram.clone();
        padded.push(0);
        assert_eq!(parse_request(SECRET, &padded), None);
        assert_eq!(parse_request(SECRET, &[]), None);
        // A zero length byte is structurally invalid regardless of the MAC.
        assert_eq!(parse_request(SECRET, &[0u8; 81]), None);
    }

    #[test]
    fn response_roundtrip() {
        let datagram =
            build_response(SECRET, b"node-a", 22001, 22).expect("build failed");
        assert_eq!(datagram.len(), RESPONSE_LEN);
        assert_eq!(
            parse_response(SECRET, b"node-a", &datagram),
            Some((22, 22001))
        );
    }

    #[test]
    fn response_binds_to_identity() {
        let datagram =
            build_response(SECRET, b"node-a", 22001, 22).expect("build failed");
        assert_eq!(parse_response(SECRET, b"node-b", &datagram), None);
    }

    #[test]
    fn response_any_bit_flip_fails_auth() {
        let datagram =
            build_response(SECRET, b"node-a", 22001, 22).expect("build failed");
        for byte in 0..datagram.len() {
            for bit in 0..8 {
                let mut tampered = datagram.clone();
                tampered[byte] ^= 1 << bit;
                assert_eq!(
                    parse_response(SECRET, b"node-a", &tampered),
                    None,
                    "flip of byte {byte} bit {bit} was accepted"
                );
            }
        }
    }

    #[test]
    fn response_salt_is_fresh_per_build() {
        let a = build_response(SECRET, b"node-a", 22001, 22).expect("build failed");
        let b = build_response(SECRET, b"node-a", 22001, 22).expect("build failed");
        assert_ne!(a, b);
    }

    #[test]
    fn response_rejects_wrong_length() {
        let datagram =
            build_response(SECRET, b"node-a", 22001, 22).expect("build failed");
        assert_eq!(
            parse_response(SECRET, b"node-a", &datagram[..RESPONSE_LEN - 1]),
            None
        );
        let mut padded = datagram.clone();
        padded.push(0);
        assert_eq!(parse_response(SECRET, b"node-a", &padded), None);
    }

    #[test]
    fn response_port_extremes_roundtrip() {
        let datagram = build_response(SECRET, b"node-a", 65534, 1).expect("build failed");
        assert_eq!(
            parse_response(SECRET, b"node-a", &datagram),
            Some((1, 65534))
        );
    }
}
