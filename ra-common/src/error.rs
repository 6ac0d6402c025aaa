use sgx_crypto::error::CryptoError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Unexpected message, wrong state or malformed layout.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
    /// A signature, MAC, AEAD tag or certificate chain failed to verify.
    #[error("cryptographic failure: {0}")]
    CryptoFailure(#[source] CryptoError),
    /// The attestation evidence itself was not acceptable.
    #[error("attestation rejected: {0}")]
    AttestationRejected(&'static str),
    /// Failure reaching or using the attestation reporting service.
    #[error("attestation reporting service error: {0}")]
    ReportingService(String),
    /// Short read, EOF or framing error on the transport.
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),
    #[error("operation timed out")]
    Timeout,
    /// Peer parameters disallowed by local policy.
    #[error("local policy violation: {0}")]
    PolicyViolation(&'static str),
    /// Non-fatal: the caller falls back to full attestation.
    #[error("session resume failed")]
    ResumeFailed,
    /// Duplicate or backwards counter in the session envelope. Fatal.
    #[error("replayed frame in session envelope")]
    ReplayDetected,
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Replay => Error::ReplayDetected,
            CryptoError::Io(io) => io.into(),
            other => Error::CryptoFailure(other),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Error::Timeout,
            _ => Error::Transport(e),
        }
    }
}
