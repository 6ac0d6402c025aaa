use std::fs::File;
use std::io::Read;
use std::path::Path;

use ring::signature::{self, KeyPair as _};

use crate::error::CryptoError;
use crate::key_exchange::{Ec256PublicKey, EC256_COORD_LEN};
use crate::random::RandomState;

static ECDSA_SIGN_ALG: &signature::EcdsaSigningAlgorithm =
    &signature::ECDSA_P256_SHA256_FIXED_SIGNING;
static ECDSA_VERIFY_ALG: &signature::EcdsaVerificationAlgorithm = &signature::ECDSA_P256_SHA256_FIXED;
static RSA_VERIFY_ALG: &signature::RsaParameters = &signature::RSA_PKCS1_2048_8192_SHA256;

pub const EC256_SIG_LEN: usize = 2 * EC256_COORD_LEN;

/// ECDSA P-256 signature in the 64-byte wire form, r then s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ec256Signature {
    pub r: [u8; EC256_COORD_LEN],
    pub s: [u8; EC256_COORD_LEN],
}

impl Ec256Signature {
    pub fn to_bytes(&self) -> [u8; EC256_SIG_LEN] {
        let mut out = [0u8; EC256_SIG_LEN];
        out[..EC256_COORD_LEN].copy_from_slice(&self.r);
        out[EC256_COORD_LEN..].copy_from_slice(&self.s);
        out
    }

    pub fn from_bytes(bytes: &[u8; EC256_SIG_LEN]) -> Self {
        let mut sig = Self {
            r: [0u8; EC256_COORD_LEN],
            s: [0u8; EC256_COORD_LEN],
        };
        sig.r.copy_from_slice(&bytes[..EC256_COORD_LEN]);
        sig.s.copy_from_slice(&bytes[EC256_COORD_LEN..]);
        sig
    }
}

/// The service provider's long-term ECDSA P-256 signing key.
pub struct SigningKey {
    key_pair: signature::EcdsaKeyPair,
    public_key: Ec256PublicKey,
}

impl SigningKey {
    pub fn from_pkcs8(pkcs8: &[u8]) -> super::Result<Self> {
        let key_pair =
            signature::EcdsaKeyPair::from_pkcs8(ECDSA_SIGN_ALG, untrusted::Input::from(pkcs8))
                .map_err(|_| CryptoError::InvalidKey)?;
        let public_key = Ec256PublicKey::from_uncompressed_point(key_pair.public_key().as_ref())?;
        Ok(Self {
            key_pair,
            public_key,
        })
    }

    pub fn from_pkcs8_file(path: &Path) -> super::Result<Self> {
        let mut buf = Vec::new();
        File::open(path)?.read_to_end(&mut buf)?;
        Self::from_pkcs8(&buf)
    }

    pub fn public_key(&self) -> &Ec256PublicKey {
        &self.public_key
    }

    pub fn sign(&self, message: &[u8], rng: &RandomState) -> super::Result<Ec256Signature> {
        let sig = self
            .key_pair
            .sign(rng.inner(), untrusted::Input::from(message))
            .map_err(|_| CryptoError::SignFailure)?;
        let bytes = sig.as_ref();
        if bytes.len() != EC256_SIG_LEN {
            return Err(CryptoError::SignFailure);
        }
        let mut fixed = [0u8; EC256_SIG_LEN];
        fixed.copy_from_slice(bytes);
        Ok(Ec256Signature::from_bytes(&fixed))
    }
}

pub fn verify_p256(
    public_key: &Ec256PublicKey,
    message: &[u8],
    sig: &Ec256Signature,
) -> super::Result<()> {
    let point = public_key.to_uncompressed_point();
    let sig_bytes = sig.to_bytes();
    signature::verify(
        ECDSA_VERIFY_ALG,
        untrusted::Input::from(&point),
        untrusted::Input::from(message),
        untrusted::Input::from(&sig_bytes),
    )
    .map_err(|_| CryptoError::BadSignature)
}

/// RSA public key for verifying the attestation report signature,
/// as the DER `RSAPublicKey` taken from the report-signing certificate.
pub struct ReportVerificationKey {
    key: Vec<u8>,
}

impl ReportVerificationKey {
    pub fn new_from_der(public_key_der: &[u8]) -> Self {
        Self {
            key: public_key_der.to_owned(),
        }
    }

    pub fn verify(&self, message: &[u8], sig: &[u8]) -> super::Result<()> {
        signature::verify(
            RSA_VERIFY_ALG,
            untrusted::Input::from(&self.key),
            untrusted::Input::from(message),
            untrusted::Input::from(sig),
        )
        .map_err(|_| CryptoError::BadSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // P-256 key generated for tests only.
    const TEST_PKCS8: &[u8] = include_bytes!("../../ra-sp/tests/fixtures/sp_signing_key.pk8");

    #[test]
    fn sign_and_verify() {
        let rng = RandomState::new();
        let key = SigningKey::from_pkcs8(TEST_PKCS8).unwrap();
        let sig = key.sign(b"handshake transcript", &rng).unwrap();
        assert!(verify_p256(key.public_key(), b"handshake transcript", &sig).is_ok());
        assert!(verify_p256(key.public_key(), b"other message", &sig).is_err());
    }

    #[test]
    fn signature_round_trip() {
        let rng = RandomState::new();
        let key = SigningKey::from_pkcs8(TEST_PKCS8).unwrap();
        let sig = key.sign(b"msg", &rng).unwrap();
        assert_eq!(sig, Ec256Signature::from_bytes(&sig.to_bytes()));
    }
}
