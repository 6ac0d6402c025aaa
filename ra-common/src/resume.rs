//! Shared pieces of the session-resume exchange: RPC tag values, the
//! finish-tag construction and the per-session rekeying. The client's nonce
//! always precedes the server's in the rekey salt.

use sgx_crypto::digest::Sha256Digest;
use sgx_crypto::kdf::{hkdf_sha256_key128, prf_sha256};
use sgx_crypto::key::Key128;

pub const NO_TICKET: u8 = 0;
pub const HAS_TICKET: u8 = 1;
pub const NOT_ACCEPTED: u8 = 0;
pub const ACCEPTED: u8 = 1;

pub const FINISH_TAG_LEN: usize = 12;
const FINISH_LABEL: &[u8] = b"finished";
const KEY_DERIVE_LABEL: &[u8] = b"new_session_keys";

/// The 12-byte verification tag over a resume RPC transcript hash.
pub fn finish_tag(secret_key: &Key128, transcript_hash: &Sha256Digest) -> [u8; FINISH_TAG_LEN] {
    let mut tag = [0u8; FINISH_TAG_LEN];
    prf_sha256(
        secret_key.as_bytes(),
        FINISH_LABEL,
        transcript_hash,
        &mut tag,
    );
    tag
}

/// Derives a fresh per-session key from a saved one and both nonces.
pub fn rekey(saved: &Key128, client_nonce: u64, server_nonce: u64) -> crate::Result<Key128> {
    let mut salt = [0u8; 16];
    salt[..8].copy_from_slice(&client_nonce.to_le_bytes());
    salt[8..].copy_from_slice(&server_nonce.to_le_bytes());
    hkdf_sha256_key128(saved.as_bytes(), &salt, KEY_DERIVE_LABEL).map_err(crate::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rekey_differs_from_saved_key() {
        let saved = Key128::new([0xa0; 16]);
        let fresh = rekey(&saved, 1, 2).unwrap();
        assert_ne!(fresh, saved);
    }

    #[test]
    fn rekey_depends_on_each_nonce() {
        let saved = Key128::new([0xa0; 16]);
        let base = rekey(&saved, 1, 2).unwrap();
        assert_ne!(base, rekey(&saved, 3, 2).unwrap());
        assert_ne!(base, rekey(&saved, 1, 4).unwrap());
        // Nonce order is part of the derivation.
        assert_ne!(base, rekey(&saved, 2, 1).unwrap());
    }

    #[test]
    fn finish_tag_is_deterministic() {
        let key = Key128::new([0x01; 16]);
        let hash = sgx_crypto::digest::sha256(b"rpc bytes");
        assert_eq!(finish_tag(&key, &hash), finish_tag(&key, &hash));
        let other = sgx_crypto::digest::sha256(b"other rpc bytes");
        assert_ne!(finish_tag(&key, &hash), finish_tag(&key, &other));
    }
}
