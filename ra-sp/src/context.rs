use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use subtle::ConstantTimeEq;

use ra_common::error::Error;
use ra_common::key_schedule::{derive_secret_keys, HandshakeKeys};
use ra_common::msg::{
    Msg0r, Msg0s, Msg1, Msg2, Msg3, Msg4, RaConfig, Spid, MSG2_MAC_COVERED,
};
use ra_common::quote::{comparable_region, QuoteBody, REPORT_DATA_LEN};
use ra_common::report::{verify_report, IasReport, ReportInput, IAS_REPORT_SIGNING_CA_PEM};
use ra_common::session::RaSession;
use ra_common::ALLOWED_EXT_GROUP_ID;
use sgx_crypto::certificate::pem_to_der;
use sgx_crypto::cmac::{AesCmac, MAC_LEN};
use sgx_crypto::digest::{sha256, sha256_multi};
use sgx_crypto::key_exchange::{Ec256PublicKey, DHKE};
use sgx_crypto::random::RandomState;
use sgx_crypto::secure_channel::encryption::FrameSealer;
use sgx_crypto::signature::SigningKey;

use crate::config::SpConfig;
use crate::ias::ReportingClient;

/// Length of the base64 freshness nonce submitted with the quote.
const IAS_REQUEST_NONCE_LEN: usize = 32;

/// Checks the report data embedded in the quote against the value expected
/// from the handshake transcript.
pub type ReportDataVerifier = Box<dyn Fn(&[u8; REPORT_DATA_LEN], &[u8; REPORT_DATA_LEN]) -> bool + Send>;
/// Caller-supplied acceptance policy over the attested quote body
/// (measurements, product id, security version).
pub type QuotePolicy = Box<dyn Fn(&QuoteBody) -> bool + Send>;

#[cfg(not(feature = "simulation"))]
fn default_report_data_verifier() -> ReportDataVerifier {
    Box::new(|expected, in_report| bool::from(expected[..].ct_eq(&in_report[..])))
}

#[cfg(feature = "simulation")]
fn default_report_data_verifier() -> ReportDataVerifier {
    Box::new(|_, _| true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpState {
    Init,
    Msg0Seen,
    Msg1Seen,
    Complete,
}

/// Result of msg3 processing. The sealed msg4 must reach the peer even on
/// rejection, so it is returned alongside the verdict instead of inside it;
/// the caller sends the message first and surfaces the verdict after.
pub struct Msg3Outcome {
    pub sealed_msg4: Vec<u8>,
    pub verdict: ra_common::Result<()>,
}

/// Service-provider side of the attestation handshake. Drives
/// msg0 -> msg4, owning the ephemeral ECDH key, the derived subkeys and the
/// freshness nonce. Collapses into an [`RaSession`] on success.
pub struct SpRaContext<R: ReportingClient> {
    ra_config: RaConfig,
    spid: Spid,
    sign_key: Arc<SigningKey>,
    reporting: R,
    rng: RandomState,
    dhke: Option<DHKE>,
    g_b: Ec256PublicKey,
    g_a: Option<Ec256PublicKey>,
    nonce: String,
    keys: Option<HandshakeKeys>,
    state: SpState,
    is_attested: bool,
    ias_report: Option<IasReport>,
    report_data_verifier: ReportDataVerifier,
    quote_policy: QuotePolicy,
    root_der: Vec<u8>,
}

impl<R: ReportingClient> SpRaContext<R> {
    pub fn init(
        config: &SpConfig,
        sign_key: Arc<SigningKey>,
        reporting: R,
    ) -> ra_common::Result<Self> {
        if cfg!(feature = "simulation") && !cfg!(debug_assertions) {
            return Err(Error::PolicyViolation(
                "simulation mode is not allowed in production builds",
            ));
        }
        config.ra_config.validate()?;
        let spid = config.spid_bytes()?;
        let root_pem = config
            .ias_root_cert_pem
            .as_deref()
            .unwrap_or(IAS_REPORT_SIGNING_CA_PEM);
        let root_der = pem_to_der(root_pem)?;

        let rng = RandomState::new();
        let nonce = rng.base64_nonce(IAS_REQUEST_NONCE_LEN)?;
        let dhke = DHKE::generate_keypair(&rng)?;
        let g_b = *dhke.public_key();

        Ok(Self {
            ra_config: config.ra_config,
            spid,
            sign_key,
            reporting,
            rng,
            dhke: Some(dhke),
            g_b,
            g_a: None,
            nonce,
            keys: None,
            state: SpState::Init,
            is_attested: false,
            ias_report: None,
            report_data_verifier: default_report_data_verifier(),
            quote_policy: Box::new(|_| true),
            root_der,
        })
    }

    /// Replaces the default constant-time report-data check.
    pub fn set_report_data_verifier(&mut self, verifier: ReportDataVerifier) {
        self.report_data_verifier = verifier;
    }

    /// Installs the acceptance policy over the attested quote body.
    pub fn set_quote_policy(&mut self, policy: QuotePolicy) {
        self.quote_policy = policy;
    }

    pub fn ra_config(&self) -> &RaConfig {
        &self.ra_config
    }

    pub fn is_attested(&self) -> bool {
        self.is_attested
    }

    pub fn process_msg0(&mut self, msg0s: &Msg0s) -> ra_common::Result<Msg0r> {
        if self.state != SpState::Init {
            return Err(Error::Protocol("msg0s out of order"));
        }
        if msg0s.ext_grp_id != ALLOWED_EXT_GROUP_ID {
            return Err(Error::PolicyViolation("extended group id not supported"));
        }
        self.state = SpState::Msg0Seen;
        Ok(Msg0r {
            ra_config: self.ra_config,
            sp_pub_key: *self.sign_key.public_key(),
        })
    }

    /// Runs the key schedule against the verifier's ephemeral key, signs the
    /// key-exchange transcript and attaches the revocation list. Returns the
    /// encoded msg2.
    pub fn process_msg1(
        &mut self,
        msg1: &Msg1,
        deadline: Option<Duration>,
    ) -> ra_common::Result<Vec<u8>> {
        if self.state != SpState::Msg0Seen {
            return Err(Error::Protocol("msg1 out of order"));
        }

        let dhke = self
            .dhke
            .take()
            .ok_or(Error::Protocol("ephemeral key already consumed"))?;
        let shared = dhke.derive_key(&msg1.g_a)?;
        let keys = derive_secret_keys(shared.as_bytes())?;

        // Sign g_b || g_a with the long-term provider key.
        let mut gb_ga = Vec::with_capacity(128);
        gb_ga.extend_from_slice(&self.g_b.to_bytes());
        gb_ga.extend_from_slice(&msg1.g_a.to_bytes());
        let sign_gb_ga = self.sign_key.sign(&gb_ga, &self.rng)?;

        let sig_rl_b64 = self.reporting.get_sig_rl(&msg1.gid, deadline)?;
        let sig_rl = base64::decode(sig_rl_b64.trim())
            .map_err(|_| Error::ReportingService("undecodable revocation list".to_string()))?;

        let mut msg2 = Msg2 {
            g_b: self.g_b,
            spid: self.spid,
            quote_type: self.ra_config.linkable_sign as u16,
            kdf_id: self.ra_config.ckdf_id,
            sign_gb_ga,
            mac: [0u8; MAC_LEN],
            sig_rl,
        };
        let encoded = msg2.encode();
        msg2.mac = AesCmac::new(keys.smk.clone()).sign(&encoded[..MSG2_MAC_COVERED]);

        self.g_a = Some(msg1.g_a);
        self.keys = Some(keys);
        self.state = SpState::Msg1Seen;
        debug!("msg1 processed, revocation list attached");
        Ok(msg2.encode())
    }

    /// Verifies msg3 and the attestation evidence behind it. The sealed
    /// msg4 in the outcome must be transmitted before the verdict is acted
    /// on, so a rejected peer sees a clean refusal instead of a dead
    /// connection.
    pub fn process_msg3(
        &mut self,
        msg3_bytes: &[u8],
        deadline: Option<Duration>,
    ) -> ra_common::Result<Msg3Outcome> {
        if self.state != SpState::Msg1Seen {
            return Err(Error::Protocol("msg3 out of order"));
        }
        let msg3 = Msg3::decode(msg3_bytes)?;

        let verdict = self.verify_msg3(&msg3, msg3_bytes, deadline);
        self.state = SpState::Complete;
        let (report, is_accepted) = match &verdict {
            Ok(report) => {
                self.is_attested = true;
                self.ias_report = Some(report.clone());
                (Some(report.clone()), true)
            }
            Err(e) => {
                warn!("attestation rejected: {}", e);
                (None, false)
            }
        };

        let msg4 = Msg4 {
            report,
            is_accepted,
        };
        let keys = self.keys.as_ref().ok_or(Error::Protocol("keys not derived"))?;
        // msg4 is frame 0 of the server-to-client envelope direction.
        let mut sealer = FrameSealer::with_counter(&keys.sk, &keys.mk, 0)?;
        let sealed_msg4 = sealer.seal(&msg4.encode())?;

        Ok(Msg3Outcome {
            sealed_msg4,
            verdict: verdict.map(|_| ()),
        })
    }

    fn verify_msg3(
        &self,
        msg3: &Msg3,
        msg3_bytes: &[u8],
        deadline: Option<Duration>,
    ) -> ra_common::Result<IasReport> {
        let g_a = self.g_a.as_ref().ok_or(Error::Protocol("peer key not set"))?;
        let keys = self.keys.as_ref().ok_or(Error::Protocol("keys not derived"))?;

        if !msg3.g_a.ct_eq_key(g_a) {
            return Err(Error::Protocol("msg3 key exchange mismatch"));
        }

        AesCmac::new(keys.smk.clone())
            .verify(&msg3_bytes[MAC_LEN..], &msg3.mac)
            .map_err(Error::from)?;

        // First 32 bytes of report data bind the transcript; the rest stays
        // zero.
        let transcript = sha256_multi(&[
            &g_a.to_bytes(),
            &self.g_b.to_bytes(),
            keys.vk.as_bytes(),
        ]);
        let mut expected_report_data = [0u8; REPORT_DATA_LEN];
        expected_report_data[..32].copy_from_slice(&transcript);

        let pse_manifest = if self.ra_config.enable_pse {
            Some(&msg3.ps_sec_prop[..])
        } else {
            None
        };
        let quote_report =
            self.reporting
                .get_quote_report(&msg3.quote, &self.nonce, pse_manifest, deadline)?;

        let now_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let input = ReportInput {
            report_json: &quote_report.report_json,
            cert_chain_pem: &quote_report.cert_chain_pem,
            signature: &quote_report.signature,
            expected_nonce: Some(&self.nonce),
            now_unix,
        };
        let report_data_verifier = &self.report_data_verifier;
        let quote_policy = &self.quote_policy;
        let report = verify_report(&input, &self.ra_config, &self.root_der, |report| {
            report_data_verifier(&expected_report_data, &report.quote.report_body.report_data)
                && quote_policy(&report.quote)
        })?;

        if self.ra_config.enable_pse {
            let pse_hash = report
                .pse_hash
                .ok_or(Error::AttestationRejected("PSE manifest hash missing"))?;
            let calc = sha256(&msg3.ps_sec_prop);
            if !bool::from(calc[..].ct_eq(&pse_hash[..])) {
                return Err(Error::AttestationRejected("PSE manifest hash mismatch"));
            }
        }

        // The quote the service attested must be the quote the peer sent.
        let sent = comparable_region(&msg3.quote)?;
        if !cfg!(feature = "simulation") && !bool::from(sent.ct_eq(&report.quote_raw)) {
            return Err(Error::AttestationRejected("attested quote mismatch"));
        }

        debug!("attestation evidence accepted");
        Ok(report)
    }

    /// Collapses the handshake into the long-lived session. Only valid once
    /// the peer has been attested.
    pub fn into_session(self) -> ra_common::Result<RaSession> {
        if !self.is_attested {
            return Err(Error::Protocol("session not attested"));
        }
        let keys = self.keys.ok_or(Error::Protocol("keys not derived"))?;
        let ias_report = self
            .ias_report
            .ok_or(Error::Protocol("attestation report missing"))?;
        Ok(RaSession {
            secret_key: keys.sk.clone(),
            masking_key: keys.mk.clone(),
            ias_report,
        })
    }
}
