use ring::agreement;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::random::RandomState;

pub const EC256_COORD_LEN: usize = 32;
pub const EC256_PUB_LEN: usize = 2 * EC256_COORD_LEN;
pub const SHARED_SECRET_LEN: usize = 32;

static KE_ALG: &agreement::Algorithm = &agreement::ECDH_P256;

/// NIST P-256 public key in the 64-byte wire form used by the RA messages:
/// the two raw curve coordinates, x then y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ec256PublicKey {
    pub x: [u8; EC256_COORD_LEN],
    pub y: [u8; EC256_COORD_LEN],
}

impl Ec256PublicKey {
    pub fn to_bytes(&self) -> [u8; EC256_PUB_LEN] {
        let mut out = [0u8; EC256_PUB_LEN];
        out[..EC256_COORD_LEN].copy_from_slice(&self.x);
        out[EC256_COORD_LEN..].copy_from_slice(&self.y);
        out
    }

    pub fn from_bytes(bytes: &[u8; EC256_PUB_LEN]) -> Self {
        let mut key = Self::default();
        key.x.copy_from_slice(&bytes[..EC256_COORD_LEN]);
        key.y.copy_from_slice(&bytes[EC256_COORD_LEN..]);
        key
    }

    /// The X9.62 uncompressed point, `0x04 || x || y`.
    pub fn to_uncompressed_point(&self) -> [u8; 1 + EC256_PUB_LEN] {
        let mut out = [0u8; 1 + EC256_PUB_LEN];
        out[0] = 4;
        out[1..=EC256_COORD_LEN].copy_from_slice(&self.x);
        out[1 + EC256_COORD_LEN..].copy_from_slice(&self.y);
        out
    }

    pub fn from_uncompressed_point(point: &[u8]) -> super::Result<Self> {
        if point.len() != 1 + EC256_PUB_LEN || point[0] != 4 {
            return Err(CryptoError::InvalidKey);
        }
        let mut key = Self::default();
        key.x.copy_from_slice(&point[1..=EC256_COORD_LEN]);
        key.y.copy_from_slice(&point[1 + EC256_COORD_LEN..]);
        Ok(key)
    }

    pub fn ct_eq_key(&self, other: &Self) -> bool {
        let a = self.to_bytes();
        let b = other.to_bytes();
        bool::from(a[..].ct_eq(&b[..]))
    }
}

/// 32-byte ECDH shared secret (x-coordinate). Zeroised on drop.
pub struct SharedSecret([u8; SHARED_SECRET_LEN]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        bool::from(self.0[..].ct_eq(&[0u8; SHARED_SECRET_LEN][..]))
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

pub struct DHKE {
    private_key: agreement::EphemeralPrivateKey,
    public_key: Ec256PublicKey,
}

impl DHKE {
    pub fn generate_keypair(rng: &RandomState) -> super::Result<Self> {
        let private_key = agreement::EphemeralPrivateKey::generate(KE_ALG, rng.inner())
            .map_err(|_| CryptoError::Agreement)?;
        let point = private_key
            .compute_public_key()
            .map_err(|_| CryptoError::Agreement)?;
        let public_key = Ec256PublicKey::from_uncompressed_point(point.as_ref())?;
        Ok(Self {
            private_key,
            public_key,
        })
    }

    pub fn public_key(&self) -> &Ec256PublicKey {
        &self.public_key
    }

    /// Consumes the ephemeral key and returns the shared x-coordinate.
    /// An all-zero result means the peer key was invalid.
    pub fn derive_key(self, peer: &Ec256PublicKey) -> super::Result<SharedSecret> {
        let peer_point = peer.to_uncompressed_point();
        let secret = agreement::agree_ephemeral(
            self.private_key,
            KE_ALG,
            untrusted::Input::from(&peer_point),
            CryptoError::Agreement,
            |ikm| {
                if ikm.len() != SHARED_SECRET_LEN {
                    return Err(CryptoError::Agreement);
                }
                let mut out = [0u8; SHARED_SECRET_LEN];
                out.copy_from_slice(ikm);
                Ok(SharedSecret(out))
            },
        )?;
        if secret.is_zero() {
            return Err(CryptoError::Agreement);
        }
        Ok(secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_is_commutative() {
        let rng = RandomState::new();
        let a = DHKE::generate_keypair(&rng).unwrap();
        let b = DHKE::generate_keypair(&rng).unwrap();
        let pub_a = *a.public_key();
        let pub_b = *b.public_key();
        let s1 = a.derive_key(&pub_b).unwrap();
        let s2 = b.derive_key(&pub_a).unwrap();
        assert_eq!(s1.as_bytes(), s2.as_bytes());
        assert!(!s1.is_zero());
    }

    #[test]
    fn public_key_round_trip() {
        let rng = RandomState::new();
        let kp = DHKE::generate_keypair(&rng).unwrap();
        let key = *kp.public_key();
        assert_eq!(key, Ec256PublicKey::from_bytes(&key.to_bytes()));
        assert_eq!(
            key,
            Ec256PublicKey::from_uncompressed_point(&key.to_uncompressed_point()).unwrap()
        );
    }

    #[test]
    fn rejects_compressed_points() {
        let mut point = [0u8; 65];
        point[0] = 2;
        assert!(Ec256PublicKey::from_uncompressed_point(&point).is_err());
    }
}
