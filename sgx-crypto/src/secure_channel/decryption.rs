use ring::aead::{open_in_place, Aad, Nonce, OpeningKey, AES_128_GCM};

use super::{ciphertext_len, FRAME_HEADER_LEN, IV_LEN, TAG_LEN};
use crate::cmac::AesCmac;
use crate::error::CryptoError;
use crate::key::Key128;

pub struct FrameOpener {
    key: OpeningKey,
    mask: AesCmac,
    counter: u64,
}

impl FrameOpener {
    pub fn with_counter(
        secret_key: &Key128,
        masking_key: &Key128,
        counter: u64,
    ) -> crate::Result<Self> {
        let key = OpeningKey::new(&AES_128_GCM, secret_key.as_bytes())
            .map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self {
            key,
            mask: AesCmac::new(masking_key.clone()),
            counter,
        })
    }

    /// Opens one frame at the expected inbound counter. A frame that only
    /// opens at the previous counter is a duplicate delivery and reported
    /// as a replay; any other failure is a tag failure. Both are fatal to
    /// the channel.
    pub fn open(&mut self, frame: &[u8]) -> crate::Result<Vec<u8>> {
        if frame.len() < FRAME_HEADER_LEN {
            return Err(CryptoError::BadFrame);
        }
        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&frame[..FRAME_HEADER_LEN]);
        let ct_len = ciphertext_len(&header);
        if frame.len() != FRAME_HEADER_LEN + ct_len {
            return Err(CryptoError::BadFrame);
        }

        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&frame[..IV_LEN]);
        let tag = &frame[IV_LEN..IV_LEN + TAG_LEN];
        let ct = &frame[FRAME_HEADER_LEN..];

        match self.try_open(&iv, tag, ct, self.counter) {
            Ok(plaintext) => {
                self.counter += 1;
                Ok(plaintext)
            }
            Err(_) => {
                if self.counter > 0 && self.try_open(&iv, tag, ct, self.counter - 1).is_ok() {
                    Err(CryptoError::Replay)
                } else {
                    Err(CryptoError::BadTag)
                }
            }
        }
    }

    fn try_open(&self, iv: &[u8; IV_LEN], tag: &[u8], ct: &[u8], counter: u64) -> crate::Result<Vec<u8>> {
        let aad = self.mask.sign(&counter.to_le_bytes());
        let nonce = Nonce::assume_unique_for_key(*iv);

        let mut in_out = Vec::with_capacity(ct.len() + TAG_LEN);
        in_out.extend_from_slice(ct);
        in_out.extend_from_slice(tag);
        let plaintext = open_in_place(&self.key, nonce, Aad::from(&aad), 0, &mut in_out)
            .map_err(|_| CryptoError::BadTag)?;
        Ok(plaintext.to_vec())
    }
}
