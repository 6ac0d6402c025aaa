use byteorder::{ByteOrder, LittleEndian};
use ring::aead::{seal_in_place, Aad, Nonce, SealingKey, AES_128_GCM};

use super::{FRAME_HEADER_LEN, IV_LEN, TAG_LEN};
use crate::cmac::AesCmac;
use crate::error::CryptoError;
use crate::key::Key128;
use crate::random::RandomState;

pub struct FrameSealer {
    key: SealingKey,
    mask: AesCmac,
    rng: RandomState,
    counter: u64,
}

impl FrameSealer {
    pub fn with_counter(
        secret_key: &Key128,
        masking_key: &Key128,
        counter: u64,
    ) -> crate::Result<Self> {
        let key = SealingKey::new(&AES_128_GCM, secret_key.as_bytes())
            .map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self {
            key,
            mask: AesCmac::new(masking_key.clone()),
            rng: RandomState::new(),
            counter,
        })
    }

    /// Seals one frame: `iv || tag || ct_len || ct`, advancing the outbound
    /// counter that the AAD is derived from.
    pub fn seal(&mut self, plaintext: &[u8]) -> crate::Result<Vec<u8>> {
        let aad = self.mask.sign(&self.counter.to_le_bytes());

        let mut iv = [0u8; IV_LEN];
        self.rng.fill(&mut iv)?;
        let nonce = Nonce::assume_unique_for_key(iv);

        let mut in_out = plaintext.to_vec();
        in_out.resize(plaintext.len() + TAG_LEN, 0);
        let sealed_len = seal_in_place(&self.key, nonce, Aad::from(&aad), &mut in_out, TAG_LEN)
            .map_err(|_| CryptoError::BadTag)?;
        debug_assert_eq!(sealed_len, plaintext.len() + TAG_LEN);

        let ct_len = plaintext.len();
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + ct_len);
        frame.extend_from_slice(&iv);
        frame.extend_from_slice(&in_out[ct_len..sealed_len]);
        let mut len_bytes = [0u8; 4];
        LittleEndian::write_u32(&mut len_bytes, ct_len as u32);
        frame.extend_from_slice(&len_bytes);
        frame.extend_from_slice(&in_out[..ct_len]);

        self.counter += 1;
        Ok(frame)
    }
}
