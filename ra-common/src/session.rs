use sgx_crypto::key::Key128;

use crate::error::Error;
use crate::report::IasReport;

/// An established attestation session: the keys the envelope runs on plus
/// the report that vouches for the peer. Outlives the handshake state.
#[derive(Debug, Clone, PartialEq)]
pub struct RaSession {
    pub secret_key: Key128,
    pub masking_key: Key128,
    pub ias_report: IasReport,
}

impl RaSession {
    /// Deterministic binary form, used inside sealed resume tickets.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.secret_key.as_bytes());
        out.extend_from_slice(self.masking_key.as_bytes());
        self.ias_report.encode_into(&mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() < 32 {
            return Err(Error::Protocol("truncated session"));
        }
        let secret_key = Key128::from_slice(&bytes[..16]).map_err(Error::from)?;
        let masking_key = Key128::from_slice(&bytes[16..32]).map_err(Error::from)?;
        let mut rest = &bytes[32..];
        let ias_report = IasReport::decode(&mut rest)?;
        if !rest.is_empty() {
            return Err(Error::Protocol("trailing bytes in session"));
        }
        Ok(Self {
            secret_key,
            masking_key,
            ias_report,
        })
    }
}

/// What the client stores between connections: the server-issued opaque
/// ticket and the session it resumes.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSession {
    pub ticket: Vec<u8>,
    pub session: RaSession,
}
