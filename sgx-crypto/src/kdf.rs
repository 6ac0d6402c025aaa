use crypto_mac::Mac as _;
use hkdf::Hkdf;
use hmac::Hmac;
use sha2::Sha256;

use crate::error::CryptoError;
use crate::key::{Key128, KEY128_LEN};

type HmacSha256 = Hmac<Sha256>;

/// HKDF-SHA256 producing a 128-bit key.
pub fn hkdf_sha256_key128(ikm: &[u8], salt: &[u8], info: &[u8]) -> super::Result<Key128> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; KEY128_LEN];
    hk.expand(info, &mut okm)
        .map_err(|_| CryptoError::InvalidKey)?;
    Ok(Key128::new(okm))
}

fn hmac_sha256(key: &[u8], data: &[&[u8]]) -> [u8; 32] {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_varkey(key).unwrap();
    for part in data {
        mac.input(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(mac.result().code().as_slice());
    out
}

/// The TLS 1.2 pseudo-random function, P_SHA256(secret, label || seed),
/// filling `out` completely. Used for the 12-byte resume finish tags.
pub fn prf_sha256(secret: &[u8], label: &[u8], seed: &[u8], out: &mut [u8]) {
    let mut a = hmac_sha256(secret, &[label, seed]);
    let mut written = 0;
    while written < out.len() {
        let block = hmac_sha256(secret, &[&a, label, seed]);
        let take = usize::min(block.len(), out.len() - written);
        out[written..written + take].copy_from_slice(&block[..take]);
        written += take;
        a = hmac_sha256(secret, &[&a]);
    }
}
