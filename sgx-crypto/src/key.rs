use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

pub const KEY128_LEN: usize = 16;

/// A 128-bit symmetric key. Zeroised on drop; equality is constant-time.
#[derive(Clone, Default)]
pub struct Key128([u8; KEY128_LEN]);

impl Key128 {
    pub fn new(bytes: [u8; KEY128_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> super::Result<Self> {
        if bytes.len() != KEY128_LEN {
            return Err(super::error::CryptoError::InvalidKey);
        }
        let mut key = [0u8; KEY128_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY128_LEN] {
        &self.0
    }
}

impl Drop for Key128 {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl PartialEq for Key128 {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0[..].ct_eq(&other.0[..]))
    }
}

impl Eq for Key128 {}

impl fmt::Debug for Key128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        write!(f, "Key128(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_length() {
        assert!(Key128::from_slice(&[0u8; 15]).is_err());
        assert!(Key128::from_slice(&[0u8; 16]).is_ok());
    }

    #[test]
    fn equality() {
        let a = Key128::new([7u8; 16]);
        let b = Key128::new([7u8; 16]);
        let c = Key128::new([8u8; 16]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn debug_redacts_contents() {
        let key = Key128::new([0x41u8; 16]);
        assert_eq!(format!("{:?}", key), "Key128(..)");
    }
}
