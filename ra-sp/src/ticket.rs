use ring::aead::{
    open_in_place, seal_in_place, Aad, Nonce, OpeningKey, SealingKey, AES_128_GCM,
};

use ra_common::error::Error;
use ra_common::session::RaSession;
use sgx_crypto::random::RandomState;

const TICKET_IV_LEN: usize = 12;
const TICKET_TAG_LEN: usize = 16;

/// Seals server sessions into opaque resume tickets. The ticket key never
/// leaves the server; a restarted server with a fresh key simply rejects
/// old tickets and peers fall back to full attestation.
pub struct TicketSealer {
    sealing: SealingKey,
    opening: OpeningKey,
    rng: RandomState,
}

impl TicketSealer {
    pub fn new(rng: RandomState) -> ra_common::Result<Self> {
        let mut key = [0u8; 16];
        rng.fill(&mut key).map_err(Error::from)?;
        Self::from_key(&key, rng)
    }

    pub fn from_key(key: &[u8; 16], rng: RandomState) -> ra_common::Result<Self> {
        let sealing = SealingKey::new(&AES_128_GCM, key)
            .map_err(|_| Error::CryptoFailure(sgx_crypto::error::CryptoError::InvalidKey))?;
        let opening = OpeningKey::new(&AES_128_GCM, key)
            .map_err(|_| Error::CryptoFailure(sgx_crypto::error::CryptoError::InvalidKey))?;
        Ok(Self {
            sealing,
            opening,
            rng,
        })
    }

    pub fn issue(&self, session: &RaSession) -> ra_common::Result<Vec<u8>> {
        let mut iv = [0u8; TICKET_IV_LEN];
        self.rng.fill(&mut iv).map_err(Error::from)?;
        let nonce = Nonce::assume_unique_for_key(iv);

        let plaintext = session.encode();
        let mut in_out = plaintext;
        let pt_len = in_out.len();
        in_out.resize(pt_len + TICKET_TAG_LEN, 0);
        seal_in_place(&self.sealing, nonce, Aad::empty(), &mut in_out, TICKET_TAG_LEN)
            .map_err(|_| Error::CryptoFailure(sgx_crypto::error::CryptoError::BadTag))?;

        let mut ticket = Vec::with_capacity(TICKET_IV_LEN + in_out.len());
        ticket.extend_from_slice(&iv);
        ticket.extend_from_slice(&in_out);
        Ok(ticket)
    }

    /// Unseals a presented ticket. Any failure means the ticket is not ours
    /// or has been tampered with; the caller treats that as a resume refusal.
    pub fn open(&self, ticket: &[u8]) -> ra_common::Result<RaSession> {
        if ticket.len() < TICKET_IV_LEN + TICKET_TAG_LEN {
            return Err(Error::ResumeFailed);
        }
        let mut iv = [0u8; TICKET_IV_LEN];
        iv.copy_from_slice(&ticket[..TICKET_IV_LEN]);
        let nonce = Nonce::assume_unique_for_key(iv);

        let mut in_out = ticket[TICKET_IV_LEN..].to_vec();
        let plaintext = open_in_place(&self.opening, nonce, Aad::empty(), 0, &mut in_out)
            .map_err(|_| Error::ResumeFailed)?;
        RaSession::decode(plaintext).map_err(|_| Error::ResumeFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ra_common::quote::QuoteBody;
    use ra_common::report::{EnclaveQuoteStatus, IasReport};
    use sgx_crypto::key::Key128;

    fn sample_session() -> RaSession {
        let quote_raw = {
            let mut bytes = vec![0u8; 432];
            bytes[0] = 2;
            bytes
        };
        RaSession {
            secret_key: Key128::new([0x10; 16]),
            masking_key: Key128::new([0x20; 16]),
            ias_report: IasReport {
                report_id: "1".to_string(),
                timestamp: "2020-03-20T10:07:26.711023".to_string(),
                version: 4,
                isv_status: EnclaveQuoteStatus::Ok,
                pse_status: None,
                revocation_reason: None,
                pse_hash: None,
                advisory_ids: vec![],
                epid_pseudonym: None,
                quote: QuoteBody::try_copy_from(&quote_raw).unwrap(),
                quote_raw,
            },
        }
    }

    #[test]
    fn issue_and_open() {
        let sealer = TicketSealer::new(RandomState::new()).unwrap();
        let session = sample_session();
        let ticket = sealer.issue(&session).unwrap();
        assert_eq!(sealer.open(&ticket).unwrap(), session);
    }

    #[test]
    fn tampered_ticket_is_refused() {
        let sealer = TicketSealer::new(RandomState::new()).unwrap();
        let mut ticket = sealer.issue(&sample_session()).unwrap();
        let last = ticket.len() - 1;
        ticket[last] ^= 1;
        match sealer.open(&ticket) {
            Err(Error::ResumeFailed) => {}
            other => panic!("expected resume refusal, got {:?}", other),
        }
    }

    #[test]
    fn foreign_ticket_is_refused() {
        let issuer = TicketSealer::new(RandomState::new()).unwrap();
        let other = TicketSealer::from_key(&[9u8; 16], RandomState::new()).unwrap();
        let ticket = issuer.issue(&sample_session()).unwrap();
        assert!(other.open(&ticket).is_err());
    }
}
