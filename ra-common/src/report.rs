//! Attestation report model and validation.
//!
//! The reporting service returns the report as signed JSON text plus a
//! certificate chain. `verify_report` runs the full acceptance pipeline in
//! order, failing fast: certificate chain against the pinned root, RSA
//! signature over the exact JSON bytes, schema version, freshness nonce,
//! embedded quote body, the caller's quote predicate, and finally the
//! status classification against the session's acceptance policy.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use sgx_crypto::certificate::CertChain;
use sgx_crypto::signature::ReportVerificationKey;

use crate::error::Error;
use crate::msg::RaConfig;
use crate::quote::{QuoteBody, QUOTE_BODY_LEN};

/// The pinned attestation report signing CA, in PEM form.
pub const IAS_REPORT_SIGNING_CA_PEM: &str =
    include_str!("../data/AttestationReportSigningCACert.pem");

/// Report body exactly as returned by the reporting service.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationReportBody {
    pub id: String,
    pub timestamp: String,
    pub version: u16,
    pub isv_enclave_quote_status: String,
    pub isv_enclave_quote_body: String,
    #[serde(default)]
    pub revocation_reason: Option<u64>,
    #[serde(default)]
    pub pse_manifest_status: Option<String>,
    #[serde(default)]
    pub pse_manifest_hash: Option<String>,
    #[serde(default)]
    pub platform_info_blob: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub epid_pseudonym: Option<String>,
    #[serde(default, rename = "advisoryURL")]
    pub advisory_url: Option<String>,
    #[serde(default, rename = "advisoryIDs")]
    pub advisory_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnclaveQuoteStatus {
    Ok,
    SignatureInvalid,
    GroupRevoked,
    SignatureRevoked,
    KeyRevoked,
    SigrlVersionMismatch,
    GroupOutOfDate,
    ConfigurationNeeded,
    SwHardeningNeeded,
    ConfigurationAndSwHardeningNeeded,
}

impl EnclaveQuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::GroupRevoked => "GROUP_REVOKED",
            Self::SignatureRevoked => "SIGNATURE_REVOKED",
            Self::KeyRevoked => "KEY_REVOKED",
            Self::SigrlVersionMismatch => "SIGRL_VERSION_MISMATCH",
            Self::GroupOutOfDate => "GROUP_OUT_OF_DATE",
            Self::ConfigurationNeeded => "CONFIGURATION_NEEDED",
            Self::SwHardeningNeeded => "SW_HARDENING_NEEDED",
            Self::ConfigurationAndSwHardeningNeeded => "CONFIGURATION_AND_SW_HARDENING_NEEDED",
        }
    }
}

impl FromStr for EnclaveQuoteStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(Self::Ok),
            "SIGNATURE_INVALID" => Ok(Self::SignatureInvalid),
            "GROUP_REVOKED" => Ok(Self::GroupRevoked),
            "SIGNATURE_REVOKED" => Ok(Self::SignatureRevoked),
            "KEY_REVOKED" => Ok(Self::KeyRevoked),
            "SIGRL_VERSION_MISMATCH" => Ok(Self::SigrlVersionMismatch),
            "GROUP_OUT_OF_DATE" => Ok(Self::GroupOutOfDate),
            "CONFIGURATION_NEEDED" => Ok(Self::ConfigurationNeeded),
            "SW_HARDENING_NEEDED" => Ok(Self::SwHardeningNeeded),
            "CONFIGURATION_AND_SW_HARDENING_NEEDED" => Ok(Self::ConfigurationAndSwHardeningNeeded),
            _ => Err(Error::AttestationRejected("unknown enclave quote status")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PseManifestStatus {
    Ok,
    Unknown,
    Invalid,
    OutOfDate,
    Revoked,
    RlVersionMismatch,
}

impl PseManifestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Unknown => "UNKNOWN",
            Self::Invalid => "INVALID",
            Self::OutOfDate => "OUT_OF_DATE",
            Self::Revoked => "REVOKED",
            Self::RlVersionMismatch => "RL_VERSION_MISMATCH",
        }
    }
}

impl FromStr for PseManifestStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(Self::Ok),
            "UNKNOWN" => Ok(Self::Unknown),
            "INVALID" => Ok(Self::Invalid),
            "OUT_OF_DATE" => Ok(Self::OutOfDate),
            "REVOKED" => Ok(Self::Revoked),
            "RL_VERSION_MISMATCH" => Ok(Self::RlVersionMismatch),
            _ => Err(Error::AttestationRejected("unknown PSE manifest status")),
        }
    }
}

/// A validated attestation report. Produced only by `verify_report`; carried
/// inside msg4 and inside server-issued resume tickets.
#[derive(Debug, Clone, PartialEq)]
pub struct IasReport {
    pub report_id: String,
    pub timestamp: String,
    pub version: u16,
    pub isv_status: EnclaveQuoteStatus,
    pub pse_status: Option<PseManifestStatus>,
    pub revocation_reason: Option<u64>,
    pub pse_hash: Option<[u8; 32]>,
    pub advisory_ids: Vec<String>,
    pub epid_pseudonym: Option<String>,
    pub quote: QuoteBody,
    /// The 432-byte comparable region, kept for constant-time equality
    /// against the quote transmitted in msg3.
    pub quote_raw: Vec<u8>,
}

impl IasReport {
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        write_bytes(out, self.report_id.as_bytes());
        write_bytes(out, self.timestamp.as_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        write_bytes(out, self.isv_status.as_str().as_bytes());
        match self.pse_status {
            Some(status) => {
                out.push(1);
                write_bytes(out, status.as_str().as_bytes());
            }
            None => out.push(0),
        }
        match self.revocation_reason {
            Some(reason) => {
                out.push(1);
                out.extend_from_slice(&reason.to_le_bytes());
            }
            None => out.push(0),
        }
        match self.pse_hash {
            Some(hash) => {
                out.push(1);
                out.extend_from_slice(&hash);
            }
            None => out.push(0),
        }
        out.extend_from_slice(&(self.advisory_ids.len() as u32).to_le_bytes());
        for id in &self.advisory_ids {
            write_bytes(out, id.as_bytes());
        }
        match &self.epid_pseudonym {
            Some(p) => {
                out.push(1);
                write_bytes(out, p.as_bytes());
            }
            None => out.push(0),
        }
        write_bytes(out, &self.quote_raw);
    }

    pub fn decode(input: &mut &[u8]) -> crate::Result<Self> {
        let report_id = read_string(input)?;
        let timestamp = read_string(input)?;
        let version = u16::from_le_bytes(read_array::<2>(input)?);
        let isv_status = read_string(input)?.parse()?;
        let pse_status = match read_u8(input)? {
            0 => None,
            1 => Some(read_string(input)?.parse()?),
            _ => return Err(Error::Protocol("bad option flag")),
        };
        let revocation_reason = match read_u8(input)? {
            0 => None,
            1 => Some(u64::from_le_bytes(read_array::<8>(input)?)),
            _ => return Err(Error::Protocol("bad option flag")),
        };
        let pse_hash = match read_u8(input)? {
            0 => None,
            1 => Some(read_array::<32>(input)?),
            _ => return Err(Error::Protocol("bad option flag")),
        };
        let advisory_count = u32::from_le_bytes(read_array::<4>(input)?);
        let mut advisory_ids = Vec::new();
        for _ in 0..advisory_count {
            advisory_ids.push(read_string(input)?);
        }
        let epid_pseudonym = match read_u8(input)? {
            0 => None,
            1 => Some(read_string(input)?),
            _ => return Err(Error::Protocol("bad option flag")),
        };
        let quote_raw = read_bytes(input)?;
        let quote = QuoteBody::try_copy_from(&quote_raw)
            .ok_or(Error::Protocol("bad quote body in report"))?;
        Ok(Self {
            report_id,
            timestamp,
            version,
            isv_status,
            pse_status,
            revocation_reason,
            pse_hash,
            advisory_ids,
            epid_pseudonym,
            quote,
            quote_raw,
        })
    }
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn read_u8(input: &mut &[u8]) -> crate::Result<u8> {
    let byte = *input.first().ok_or(Error::Protocol("truncated report"))?;
    *input = &input[1..];
    Ok(byte)
}

fn read_array<const N: usize>(input: &mut &[u8]) -> crate::Result<[u8; N]> {
    if input.len() < N {
        return Err(Error::Protocol("truncated report"));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&input[..N]);
    *input = &input[N..];
    Ok(out)
}

fn read_bytes(input: &mut &[u8]) -> crate::Result<Vec<u8>> {
    let len = u64::from_le_bytes(read_array::<8>(input)?) as usize;
    if input.len() < len {
        return Err(Error::Protocol("truncated report"));
    }
    let out = input[..len].to_vec();
    *input = &input[len..];
    Ok(out)
}

fn read_string(input: &mut &[u8]) -> crate::Result<String> {
    String::from_utf8(read_bytes(input)?).map_err(|_| Error::Protocol("invalid utf-8 in report"))
}

/// Inputs to report validation, exactly as received from the reporting
/// service.
pub struct ReportInput<'a> {
    pub report_json: &'a str,
    pub cert_chain_pem: &'a str,
    pub signature: &'a [u8],
    /// The prover checks the freshness nonce it submitted; the verifier has
    /// no nonce to check.
    pub expected_nonce: Option<&'a str>,
    pub now_unix: u64,
}

/// Runs the full report acceptance pipeline. `quote_check` receives the
/// parsed report and returns whether the quote body is acceptable (the
/// prover binds the report data to the handshake transcript here).
pub fn verify_report<F>(
    input: &ReportInput<'_>,
    ra_config: &RaConfig,
    root_der: &[u8],
    quote_check: F,
) -> crate::Result<IasReport>
where
    F: FnOnce(&IasReport) -> bool,
{
    let mut chain = CertChain::from_pem(input.cert_chain_pem)?;
    chain.shrink_to_root(root_der);
    chain.verify(root_der, input.now_unix)?;

    let leaf_key = ReportVerificationKey::new_from_der(&chain.leaf_public_key()?);
    leaf_key.verify(input.report_json.as_bytes(), input.signature)?;

    let body: AttestationReportBody = serde_json::from_str(input.report_json)
        .map_err(|_| Error::Protocol("malformed attestation report"))?;
    if body.version != ra_config.report_version {
        return Err(Error::AttestationRejected("report version mismatch"));
    }

    if let Some(expected) = input.expected_nonce {
        let nonce = body
            .nonce
            .as_deref()
            .ok_or(Error::AttestationRejected("report nonce missing"))?;
        if nonce.len() != expected.len()
            || !bool::from(nonce.as_bytes().ct_eq(expected.as_bytes()))
        {
            return Err(Error::AttestationRejected("report nonce mismatch"));
        }
    }

    let quote_raw = base64::decode(&body.isv_enclave_quote_body)
        .map_err(|_| Error::AttestationRejected("undecodable quote body"))?;
    if quote_raw.len() != QUOTE_BODY_LEN {
        return Err(Error::AttestationRejected("bad quote body length"));
    }
    let quote = QuoteBody::try_copy_from(&quote_raw)
        .ok_or(Error::AttestationRejected("bad quote body length"))?;

    let isv_status: EnclaveQuoteStatus = body.isv_enclave_quote_status.parse()?;
    let pse_status = match body.pse_manifest_status.as_deref() {
        Some(s) => Some(s.parse::<PseManifestStatus>()?),
        None => None,
    };
    let pse_hash = match body.pse_manifest_hash.as_deref() {
        Some(h) => {
            let bytes =
                hex::decode(h).map_err(|_| Error::AttestationRejected("bad PSE manifest hash"))?;
            if bytes.len() != 32 {
                return Err(Error::AttestationRejected("bad PSE manifest hash"));
            }
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&bytes);
            Some(hash)
        }
        None => None,
    };

    let report = IasReport {
        report_id: body.id,
        timestamp: body.timestamp,
        version: body.version,
        isv_status,
        pse_status,
        revocation_reason: body.revocation_reason,
        pse_hash,
        advisory_ids: body.advisory_ids.unwrap_or_default(),
        epid_pseudonym: body.epid_pseudonym,
        quote,
        quote_raw,
    };

    if !quote_check(&report) {
        return Err(Error::AttestationRejected("quote body check failed"));
    }

    if !quote_status_allowed(report.isv_status, ra_config) {
        return Err(Error::AttestationRejected("enclave quote status not allowed"));
    }
    if ra_config.enable_pse {
        match report.pse_status {
            Some(PseManifestStatus::Ok) => {}
            Some(PseManifestStatus::OutOfDate) if ra_config.allow_out_of_date => {}
            _ => return Err(Error::AttestationRejected("PSE manifest status not allowed")),
        }
        if report.pse_hash.is_none() {
            return Err(Error::AttestationRejected("PSE manifest hash missing"));
        }
    }

    Ok(report)
}

/// Whether a quote status is acceptable under the session's policy flags.
pub fn quote_status_allowed(status: EnclaveQuoteStatus, ra_config: &RaConfig) -> bool {
    match status {
        EnclaveQuoteStatus::Ok => true,
        EnclaveQuoteStatus::GroupOutOfDate => ra_config.allow_out_of_date,
        EnclaveQuoteStatus::ConfigurationNeeded
        | EnclaveQuoteStatus::SwHardeningNeeded
        | EnclaveQuoteStatus::ConfigurationAndSwHardeningNeeded => {
            ra_config.allow_configuration_needed
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgx_crypto::certificate::pem_to_der;
    use sgx_crypto::random::RandomState;

    const CA_PEM: &str = include_str!("../../ra-sp/tests/fixtures/test_report_ca.pem");
    const LEAF_PEM: &str = include_str!("../../ra-sp/tests/fixtures/test_report_signing.pem");
    const LEAF_KEY_PK8: &[u8] =
        include_bytes!("../../ra-sp/tests/fixtures/test_report_signing_key.pk8");
    const TEST_NOW: u64 = 1_700_000_000;
    const NONCE: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

    fn sign_report(json: &str) -> Vec<u8> {
        let key_pair =
            ring::signature::RsaKeyPair::from_pkcs8(untrusted::Input::from(LEAF_KEY_PK8)).unwrap();
        let rng = RandomState::new();
        let mut sig = vec![0u8; key_pair.public_modulus_len()];
        key_pair
            .sign(
                &ring::signature::RSA_PKCS1_SHA256,
                rng.inner(),
                json.as_bytes(),
                &mut sig,
            )
            .unwrap();
        sig
    }

    fn quote_base64() -> String {
        let mut quote = vec![0u8; QUOTE_BODY_LEN];
        quote[0] = 2; // version
        base64::encode(&quote)
    }

    fn report_json(status: &str, nonce: &str) -> String {
        format!(
            "{{\"id\":\"142090828149453720542199954221331163524\",\
             \"timestamp\":\"2020-03-20T10:07:26.711023\",\
             \"version\":4,\
             \"isvEnclaveQuoteStatus\":\"{}\",\
             \"isvEnclaveQuoteBody\":\"{}\",\
             \"nonce\":\"{}\"}}",
            status,
            quote_base64(),
            nonce
        )
    }

    fn chain_pem() -> String {
        format!("{}\n{}", LEAF_PEM, CA_PEM)
    }

    fn run(json: &str, nonce: Option<&str>, config: &RaConfig) -> crate::Result<IasReport> {
        let chain = chain_pem();
        let sig = sign_report(json);
        let root = pem_to_der(CA_PEM).unwrap();
        let input = ReportInput {
            report_json: json,
            cert_chain_pem: &chain,
            signature: &sig,
            expected_nonce: nonce,
            now_unix: TEST_NOW,
        };
        verify_report(&input, config, &root, |_| true)
    }

    #[test]
    fn accepts_valid_report() {
        let json = report_json("OK", NONCE);
        let report = run(&json, Some(NONCE), &RaConfig::default()).unwrap();
        assert_eq!(report.isv_status, EnclaveQuoteStatus::Ok);
        assert_eq!(report.quote_raw.len(), QUOTE_BODY_LEN);
    }

    #[test]
    fn validation_is_idempotent() {
        let json = report_json("OK", NONCE);
        let a = run(&json, Some(NONCE), &RaConfig::default()).unwrap();
        let b = run(&json, Some(NONCE), &RaConfig::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_tampered_body() {
        let json = report_json("OK", NONCE);
        let tampered = json.replace("OK", "GROUP_REVOKED");
        let chain = chain_pem();
        let sig = sign_report(&json);
        let root = pem_to_der(CA_PEM).unwrap();
        let input = ReportInput {
            report_json: &tampered,
            cert_chain_pem: &chain,
            signature: &sig,
            expected_nonce: Some(NONCE),
            now_unix: TEST_NOW,
        };
        match verify_report(&input, &RaConfig::default(), &root, |_| true) {
            Err(Error::CryptoFailure(_)) => {}
            other => panic!("expected signature failure, got {:?}", other),
        }
    }

    #[test]
    fn rejects_nonce_mismatch() {
        let json = report_json("OK", "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB");
        match run(&json, Some(NONCE), &RaConfig::default()) {
            Err(Error::AttestationRejected("report nonce mismatch")) => {}
            other => panic!("expected nonce rejection, got {:?}", other),
        }
    }

    #[test]
    fn rejects_version_mismatch() {
        let json = report_json("OK", NONCE).replace("\"version\":4", "\"version\":3");
        match run(&json, Some(NONCE), &RaConfig::default()) {
            Err(Error::AttestationRejected("report version mismatch")) => {}
            other => panic!("expected version rejection, got {:?}", other),
        }
    }

    #[test]
    fn rejects_disallowed_status() {
        let json = report_json("GROUP_OUT_OF_DATE", NONCE);
        assert!(run(&json, Some(NONCE), &RaConfig::default()).is_err());

        let mut lenient = RaConfig::default();
        lenient.allow_out_of_date = true;
        assert!(run(&json, Some(NONCE), &lenient).is_ok());
    }

    #[test]
    fn rejects_failing_predicate() {
        let json = report_json("OK", NONCE);
        let chain = chain_pem();
        let sig = sign_report(&json);
        let root = pem_to_der(CA_PEM).unwrap();
        let input = ReportInput {
            report_json: &json,
            cert_chain_pem: &chain,
            signature: &sig,
            expected_nonce: Some(NONCE),
            now_unix: TEST_NOW,
        };
        match verify_report(&input, &RaConfig::default(), &root, |_| false) {
            Err(Error::AttestationRejected("quote body check failed")) => {}
            other => panic!("expected predicate rejection, got {:?}", other),
        }
    }

    #[test]
    fn rejects_wrong_root() {
        let json = report_json("OK", NONCE);
        let chain = chain_pem();
        let sig = sign_report(&json);
        // Pin the leaf as the root: the presented chain no longer terminates
        // at the pinned certificate.
        let root = pem_to_der(LEAF_PEM).unwrap();
        let input = ReportInput {
            report_json: &json,
            cert_chain_pem: &chain,
            signature: &sig,
            expected_nonce: Some(NONCE),
            now_unix: TEST_NOW,
        };
        assert!(verify_report(&input, &RaConfig::default(), &root, |_| true).is_err());
    }

    #[test]
    fn report_encoding_round_trip() {
        let json = report_json("OK", NONCE);
        let report = run(&json, Some(NONCE), &RaConfig::default()).unwrap();
        let mut encoded = Vec::new();
        report.encode_into(&mut encoded);
        let mut slice = &encoded[..];
        let decoded = IasReport::decode(&mut slice).unwrap();
        assert!(slice.is_empty());
        assert_eq!(decoded, report);
    }
}
