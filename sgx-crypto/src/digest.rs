use ring::digest;

pub const SHA256_LEN: usize = 32;
pub type Sha256Digest = [u8; SHA256_LEN];

pub fn sha256(data: &[u8]) -> Sha256Digest {
    let digest = digest::digest(&digest::SHA256, data);
    let mut out = [0u8; SHA256_LEN];
    out.copy_from_slice(digest.as_ref());
    out
}

/// SHA-256 over the concatenation of `parts` without an intermediate copy.
pub fn sha256_multi(parts: &[&[u8]]) -> Sha256Digest {
    let mut ctx = digest::Context::new(&digest::SHA256);
    for part in parts {
        ctx.update(part);
    }
    let digest = ctx.finish();
    let mut out = [0u8; SHA256_LEN];
    out.copy_from_slice(digest.as_ref());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_matches_single() {
        let data = b"abcdefgh";
        assert_eq!(sha256(data), sha256_multi(&[&data[..4], &data[4..]]));
    }

    #[test]
    fn empty_input() {
        // SHA-256 of the empty string.
        let expected = [
            0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f,
            0xb9, 0x24, 0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b,
            0x78, 0x52, 0xb8, 0x55,
        ];
        assert_eq!(sha256(b""), expected);
    }
}
