use sgx_crypto::cmac::AesCmac;
use sgx_crypto::key::Key128;

use crate::error::Error;

/// The four handshake subkeys derived from the ECDH shared secret.
#[derive(Debug)]
pub struct HandshakeKeys {
    /// MACs msg2 and msg3.
    pub smk: Key128,
    /// Masking key for the session envelope AAD.
    pub mk: Key128,
    /// Session encryption key.
    pub sk: Key128,
    /// Bound into the quote's report data.
    pub vk: Key128,
}

// Derivation message for one subkey: 0x01 || label || 0x00 || key length in
// bits (0x0080, little-endian).
fn derive_one(kdk: &AesCmac, label: &[u8]) -> Key128 {
    let tag = kdk.sign_multi(&[&[0x01], label, &[0x00, 0x80, 0x00]]);
    Key128::new(tag)
}

/// Derives SMK, MK, SK and VK from the ECDH shared secret using the
/// AES-128-CMAC construction: the key-derivation key is the CMAC of the
/// shared secret under an all-zero key, and each subkey is the CMAC of its
/// label message under the KDK. An all-zero shared secret marks an invalid
/// peer key and is refused.
pub fn derive_secret_keys(shared: &[u8; 32]) -> crate::Result<HandshakeKeys> {
    if shared.iter().all(|&b| b == 0) {
        return Err(Error::CryptoFailure(
            sgx_crypto::error::CryptoError::InvalidKey,
        ));
    }
    let kdk = AesCmac::new(Key128::default()).sign(shared);
    let kdk = AesCmac::new(Key128::new(kdk));
    Ok(HandshakeKeys {
        smk: derive_one(&kdk, b"SMK"),
        mk: derive_one(&kdk, b"MK"),
        sk: derive_one(&kdk, b"SK"),
        vk: derive_one(&kdk, b"VK"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_answer() {
        let mut shared = [0u8; 32];
        for (i, b) in shared.iter_mut().enumerate() {
            *b = i as u8;
        }
        let keys = derive_secret_keys(&shared).unwrap();
        assert_eq!(
            keys.smk.as_bytes(),
            &[
                0x39, 0x99, 0xa1, 0x76, 0xf6, 0x16, 0x79, 0x10, 0x4b, 0x0b, 0x22, 0x61, 0x87,
                0x12, 0x5f, 0x95
            ]
        );
        assert_eq!(
            keys.mk.as_bytes(),
            &[
                0x06, 0xd7, 0x1c, 0x1b, 0xa8, 0xd1, 0xe3, 0x4a, 0xe4, 0x05, 0xf2, 0x50, 0x5f,
                0xff, 0x7a, 0x79
            ]
        );
        assert_eq!(
            keys.sk.as_bytes(),
            &[
                0x71, 0x66, 0x75, 0xba, 0x42, 0xc8, 0xe9, 0x07, 0x01, 0x66, 0xea, 0x4c, 0x68,
                0x40, 0xa3, 0x3f
            ]
        );
        assert_eq!(
            keys.vk.as_bytes(),
            &[
                0xf4, 0xc7, 0xae, 0x2f, 0xe8, 0x74, 0xc6, 0xb8, 0x26, 0x93, 0xda, 0xb1, 0x3e,
                0xba, 0xe8, 0xde
            ]
        );
    }

    #[test]
    fn subkeys_are_pairwise_distinct() {
        let shared = [0x5au8; 32];
        let keys = derive_secret_keys(&shared).unwrap();
        assert_ne!(keys.smk, keys.mk);
        assert_ne!(keys.smk, keys.sk);
        assert_ne!(keys.smk, keys.vk);
        assert_ne!(keys.mk, keys.sk);
        assert_ne!(keys.mk, keys.vk);
        assert_ne!(keys.sk, keys.vk);
    }

    #[test]
    fn deterministic() {
        let shared = [0x17u8; 32];
        let a = derive_secret_keys(&shared).unwrap();
        let b = derive_secret_keys(&shared).unwrap();
        assert_eq!(a.sk, b.sk);
        assert_eq!(a.mk, b.mk);
    }

    #[test]
    fn refuses_zero_secret() {
        assert!(derive_secret_keys(&[0u8; 32]).is_err());
    }
}
