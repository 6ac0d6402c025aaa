use ring::rand::{SecureRandom, SystemRandom};

use crate::error::CryptoError;

pub struct RandomState {
    inner: SystemRandom,
}

impl RandomState {
    pub fn new() -> Self {
        Self {
            inner: SystemRandom::new(),
        }
    }

    pub fn inner(&self) -> &SystemRandom {
        &self.inner
    }

    #[cfg(not(feature = "simulation"))]
    pub fn fill(&self, buf: &mut [u8]) -> super::Result<()> {
        self.inner.fill(buf).map_err(|_| CryptoError::Rand)
    }

    #[cfg(feature = "simulation")]
    pub fn fill(&self, buf: &mut [u8]) -> super::Result<()> {
        for b in buf.iter_mut() {
            *b = 0;
        }
        Ok(())
    }

    pub fn next_u64(&self) -> super::Result<u64> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Random base64 string of exactly `len` characters (`len` must be a
    /// multiple of 4). Used as the attestation-report freshness nonce.
    pub fn base64_nonce(&self, len: usize) -> super::Result<String> {
        let mut raw = vec![0u8; (len / 4) * 3];
        self.fill(&mut raw)?;
        Ok(base64::encode(&raw))
    }
}

impl Default for RandomState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_has_requested_length() {
        let rng = RandomState::new();
        let nonce = rng.base64_nonce(32).unwrap();
        assert_eq!(nonce.len(), 32);
    }
}
