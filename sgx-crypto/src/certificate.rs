use std::convert::TryFrom;

use regex::Regex;

use crate::error::CryptoError;

static CHAIN_SIG_ALGS: &[&webpki::SignatureAlgorithm] = &[
    &webpki::RSA_PKCS1_2048_8192_SHA256,
    &webpki::RSA_PKCS1_2048_8192_SHA384,
    &webpki::RSA_PKCS1_2048_8192_SHA512,
    &webpki::RSA_PKCS1_3072_8192_SHA384,
    &webpki::ECDSA_P256_SHA256,
];

const PEM_BLOCK_RE: &str = "(-----BEGIN CERTIFICATE-----)\
                            ([A-Za-z0-9+/=\\r\\n]+)\
                            (-----END CERTIFICATE-----)";

/// Decodes a single PEM certificate block to DER.
pub fn pem_to_der(pem: &str) -> super::Result<Vec<u8>> {
    let mut ders = pem_chain_to_ders(pem)?;
    if ders.len() != 1 {
        return Err(CryptoError::Certificate("expected exactly one certificate"));
    }
    Ok(ders.remove(0))
}

fn pem_chain_to_ders(pem: &str) -> super::Result<Vec<Vec<u8>>> {
    let re = Regex::new(PEM_BLOCK_RE).unwrap();
    let mut ders = Vec::new();
    for found in re.captures_iter(pem) {
        let body: String = found[2].chars().filter(|c| !c.is_whitespace()).collect();
        let der = base64::decode(&body)
            .map_err(|_| CryptoError::Certificate("invalid base64 in PEM body"))?;
        ders.push(der);
    }
    if ders.is_empty() {
        return Err(CryptoError::Certificate("no certificate found"));
    }
    Ok(ders)
}

/// An X.509 certificate chain, leaf first, as presented by the attestation
/// reporting service.
pub struct CertChain {
    ders: Vec<Vec<u8>>,
}

impl CertChain {
    pub fn from_pem(pem: &str) -> super::Result<Self> {
        let ders = pem_chain_to_ders(pem)?;
        // Every member must at least parse.
        for der in &ders {
            x509_parser::parse_x509_der(der)
                .map_err(|_| CryptoError::Certificate("unparseable certificate in chain"))?;
        }
        Ok(Self { ders })
    }

    pub fn len(&self) -> usize {
        self.ders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ders.is_empty()
    }

    /// Truncates the chain so that it ends just before the pinned root,
    /// which the reporting service usually appends. The root itself is
    /// supplied separately as the trust anchor.
    pub fn shrink_to_root(&mut self, root_der: &[u8]) {
        if let Some(pos) = self.ders.iter().position(|der| der[..] == root_der[..]) {
            self.ders.truncate(pos);
            if self.ders.is_empty() {
                // The chain consisted of the root alone; keep it so the
                // caller gets a proper verification failure instead of an
                // empty chain.
                self.ders.push(root_der.to_owned());
            }
        }
    }

    /// Verifies the leaf against the pinned root with any intermediates in
    /// between, at `now_unix` seconds since the epoch.
    pub fn verify(&self, root_der: &[u8], now_unix: u64) -> super::Result<()> {
        let anchor = webpki::TrustAnchor::try_from_cert_der(root_der)
            .map_err(|_| CryptoError::Certificate("bad trust anchor"))?;
        let anchors = [anchor];
        let anchors = webpki::TlsServerTrustAnchors(&anchors);

        let leaf = self
            .ders
            .first()
            .ok_or(CryptoError::Certificate("empty chain"))?;
        let cert = webpki::EndEntityCert::try_from(leaf.as_slice())
            .map_err(|_| CryptoError::Certificate("unparseable leaf"))?;

        let intermediates: Vec<&[u8]> = self.ders[1..].iter().map(|der| der.as_slice()).collect();

        let time = webpki::Time::from_seconds_since_unix_epoch(now_unix);
        cert.verify_is_valid_tls_server_cert(CHAIN_SIG_ALGS, &anchors, &intermediates, time)
            .map_err(|_| CryptoError::Certificate("chain verification failed"))
    }

    /// The leaf certificate's public key, as the DER bit-string contents of
    /// its SubjectPublicKeyInfo.
    pub fn leaf_public_key(&self) -> super::Result<Vec<u8>> {
        let leaf = self
            .ders
            .first()
            .ok_or(CryptoError::Certificate("empty chain"))?;
        let (_, cert) = x509_parser::parse_x509_der(leaf)
            .map_err(|_| CryptoError::Certificate("unparseable leaf"))?;
        Ok(cert
            .tbs_certificate
            .subject_pki
            .subject_public_key
            .data
            .to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CA_PEM: &str = include_str!("../../ra-sp/tests/fixtures/test_report_ca.pem");
    const LEAF_PEM: &str = include_str!("../../ra-sp/tests/fixtures/test_report_signing.pem");
    const TEST_NOW: u64 = 1_700_000_000;

    fn full_chain_pem() -> String {
        format!("{}\n{}", LEAF_PEM, CA_PEM)
    }

    #[test]
    fn parses_multi_cert_pem() {
        let chain = CertChain::from_pem(&full_chain_pem()).unwrap();
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn shrink_drops_trailing_root() {
        let root = pem_to_der(CA_PEM).unwrap();
        let mut chain = CertChain::from_pem(&full_chain_pem()).unwrap();
        chain.shrink_to_root(&root);
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn verifies_leaf_against_root() {
        let root = pem_to_der(CA_PEM).unwrap();
        let mut chain = CertChain::from_pem(&full_chain_pem()).unwrap();
        chain.shrink_to_root(&root);
        assert!(chain.verify(&root, TEST_NOW).is_ok());
    }

    #[test]
    fn rejects_wrong_root() {
        let leaf_as_root = pem_to_der(LEAF_PEM).unwrap();
        let chain = CertChain::from_pem(LEAF_PEM).unwrap();
        assert!(chain.verify(&leaf_as_root, TEST_NOW).is_err());
    }

    #[test]
    fn rejects_garbage_pem() {
        assert!(CertChain::from_pem("not a pem at all").is_err());
    }
}
