use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("random generator failure")]
    Rand,
    #[error("invalid key material")]
    InvalidKey,
    #[error("key agreement failed")]
    Agreement,
    #[error("signature verification failed")]
    BadSignature,
    #[error("signing failed")]
    SignFailure,
    #[error("MAC verification failed")]
    BadMac,
    #[error("AEAD open failed")]
    BadTag,
    #[error("replayed frame")]
    Replay,
    #[error("malformed frame")]
    BadFrame,
    #[error("certificate error: {0}")]
    Certificate(&'static str),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
