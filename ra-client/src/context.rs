use log::{debug, warn};
use subtle::ConstantTimeEq;

use ra_common::error::Error;
use ra_common::key_schedule::{derive_secret_keys, HandshakeKeys};
use ra_common::msg::{
    Gid, Msg0r, Msg0s, Msg1, Msg2, Msg3, Msg4, RaConfig, Spid, MSG2_MAC_COVERED,
};
use ra_common::quote::{QuoteBody, REPORT_DATA_LEN};
use ra_common::report::{quote_status_allowed, IasReport, PseManifestStatus};
use ra_common::session::RaSession;
use ra_common::{AES_CMAC_KDF_ID, ALLOWED_EXT_GROUP_ID};
use sgx_crypto::cmac::{AesCmac, MAC_LEN};
use sgx_crypto::digest::sha256_multi;
use sgx_crypto::key_exchange::{Ec256PublicKey, DHKE};
use sgx_crypto::random::RandomState;
use sgx_crypto::secure_channel::decryption::FrameOpener;
use sgx_crypto::signature::verify_p256;

/// The platform's quoting mechanism as seen by the verifier: the EPID group
/// of the platform and quotes over caller-chosen report data.
pub trait QuoteSource {
    fn gid(&mut self) -> ra_common::Result<Gid>;

    /// Returns the quote blob and the platform-services security property
    /// descriptor that msg3 carries alongside it.
    fn get_quote(
        &mut self,
        report_data: &[u8; REPORT_DATA_LEN],
        spid: &Spid,
        quote_type: u16,
        sig_rl: &[u8],
    ) -> ra_common::Result<(Vec<u8>, [u8; 256])>;
}

/// What the client requires of the service provider before it will run the
/// handshake.
pub struct ClientPolicy {
    /// The pinned long-term provider key; msg0r must match it exactly.
    pub sp_pub_key: Ec256PublicKey,
    /// Extra acceptance check over the provider's session parameters.
    pub ra_config_check: Option<Box<dyn Fn(&RaConfig) -> bool + Send>>,
    /// Acceptance policy over the attested quote body echoed in msg4.
    pub quote_policy: Option<Box<dyn Fn(&QuoteBody) -> bool + Send>>,
}

impl ClientPolicy {
    pub fn new(sp_pub_key: Ec256PublicKey) -> Self {
        Self {
            sp_pub_key,
            ra_config_check: None,
            quote_policy: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Init,
    Msg0Sent,
    Msg1Sent,
    Msg2Seen,
    Complete,
}

/// Client (verifier) side of the attestation handshake.
pub struct ClientRaContext<Q: QuoteSource> {
    policy: ClientPolicy,
    quote_source: Q,
    dhke: Option<DHKE>,
    g_a: Ec256PublicKey,
    ra_config: Option<RaConfig>,
    keys: Option<HandshakeKeys>,
    expected_report_data: [u8; REPORT_DATA_LEN],
    state: ClientState,
    is_attested: bool,
    ias_report: Option<IasReport>,
}

impl<Q: QuoteSource> ClientRaContext<Q> {
    pub fn init(policy: ClientPolicy, quote_source: Q) -> ra_common::Result<Self> {
        if cfg!(feature = "simulation") && !cfg!(debug_assertions) {
            return Err(Error::PolicyViolation(
                "simulation mode is not allowed in production builds",
            ));
        }
        let rng = RandomState::new();
        let dhke = DHKE::generate_keypair(&rng)?;
        let g_a = *dhke.public_key();
        Ok(Self {
            policy,
            quote_source,
            dhke: Some(dhke),
            g_a,
            ra_config: None,
            keys: None,
            expected_report_data: [0u8; REPORT_DATA_LEN],
            state: ClientState::Init,
            is_attested: false,
            ias_report: None,
        })
    }

    pub fn is_attested(&self) -> bool {
        self.is_attested
    }

    pub fn get_msg0s(&mut self) -> ra_common::Result<Msg0s> {
        if self.state != ClientState::Init {
            return Err(Error::Protocol("msg0s out of order"));
        }
        self.state = ClientState::Msg0Sent;
        Ok(Msg0s {
            ext_grp_id: ALLOWED_EXT_GROUP_ID,
        })
    }

    /// Checks the provider's parameters against local policy and opens the
    /// key exchange.
    pub fn process_msg0r(&mut self, msg0r: &Msg0r) -> ra_common::Result<Msg1> {
        if self.state != ClientState::Msg0Sent {
            return Err(Error::Protocol("msg0r out of order"));
        }
        msg0r.ra_config.validate()?;
        if !msg0r.sp_pub_key.ct_eq_key(&self.policy.sp_pub_key) {
            return Err(Error::PolicyViolation("unexpected service provider key"));
        }
        if let Some(check) = &self.policy.ra_config_check {
            if !check(&msg0r.ra_config) {
                return Err(Error::PolicyViolation("service provider config refused"));
            }
        }
        self.ra_config = Some(msg0r.ra_config);

        let gid = self.quote_source.gid()?;
        self.state = ClientState::Msg1Sent;
        Ok(Msg1 {
            g_a: self.g_a,
            gid,
        })
    }

    /// Verifies msg2, runs the key schedule, obtains a quote bound to the
    /// transcript and returns the encoded msg3.
    pub fn process_msg2(&mut self, msg2_bytes: &[u8]) -> ra_common::Result<Vec<u8>> {
        if self.state != ClientState::Msg1Sent {
            return Err(Error::Protocol("msg2 out of order"));
        }
        let msg2 = Msg2::decode(msg2_bytes)?;
        let ra_config = self.ra_config.ok_or(Error::Protocol("ra_config not set"))?;

        if msg2.kdf_id != AES_CMAC_KDF_ID {
            return Err(Error::PolicyViolation("unsupported key derivation function"));
        }
        if msg2.quote_type != ra_config.linkable_sign as u16 {
            return Err(Error::PolicyViolation("quote type mismatch"));
        }

        let dhke = self
            .dhke
            .take()
            .ok_or(Error::Protocol("ephemeral key already consumed"))?;
        let shared = dhke.derive_key(&msg2.g_b)?;
        let keys = derive_secret_keys(shared.as_bytes())?;

        // The provider signed g_b || g_a under its pinned key.
        let mut gb_ga = Vec::with_capacity(128);
        gb_ga.extend_from_slice(&msg2.g_b.to_bytes());
        gb_ga.extend_from_slice(&self.g_a.to_bytes());
        verify_p256(&self.policy.sp_pub_key, &gb_ga, &msg2.sign_gb_ga).map_err(Error::from)?;

        AesCmac::new(keys.smk.clone())
            .verify(&msg2_bytes[..MSG2_MAC_COVERED], &msg2.mac)
            .map_err(Error::from)?;

        let transcript = sha256_multi(&[
            &self.g_a.to_bytes(),
            &msg2.g_b.to_bytes(),
            keys.vk.as_bytes(),
        ]);
        self.expected_report_data = [0u8; REPORT_DATA_LEN];
        self.expected_report_data[..32].copy_from_slice(&transcript);

        let (quote, ps_sec_prop) = self.quote_source.get_quote(
            &self.expected_report_data,
            &msg2.spid,
            msg2.quote_type,
            &msg2.sig_rl,
        )?;

        let mut msg3 = Msg3 {
            mac: [0u8; MAC_LEN],
            g_a: self.g_a,
            ps_sec_prop,
            quote,
        };
        let encoded = msg3.encode();
        msg3.mac = AesCmac::new(keys.smk.clone()).sign(&encoded[MAC_LEN..]);

        self.keys = Some(keys);
        self.state = ClientState::Msg2Seen;
        debug!("msg2 verified, quote attached");
        Ok(msg3.encode())
    }

    /// Unseals msg4 and checks the provider's verdict and the echoed report
    /// against what this side expects of its own quote.
    pub fn process_msg4(&mut self, sealed_msg4: &[u8]) -> ra_common::Result<()> {
        if self.state != ClientState::Msg2Seen {
            return Err(Error::Protocol("msg4 out of order"));
        }
        let keys = self.keys.as_ref().ok_or(Error::Protocol("keys not derived"))?;
        let ra_config = self.ra_config.ok_or(Error::Protocol("ra_config not set"))?;

        // msg4 is frame 0 of the inbound envelope direction.
        let mut opener = FrameOpener::with_counter(&keys.sk, &keys.mk, 0)?;
        let plaintext = opener.open(sealed_msg4)?;
        let msg4 = Msg4::decode(&plaintext)?;

        self.state = ClientState::Complete;
        if !msg4.is_accepted {
            warn!("service provider rejected attestation");
            return Err(Error::AttestationRejected(
                "service provider rejected attestation",
            ));
        }
        let report = msg4
            .report
            .ok_or(Error::Protocol("accepted msg4 without report"))?;

        let in_report = &report.quote.report_body.report_data;
        if !cfg!(feature = "simulation")
            && !bool::from(self.expected_report_data[..].ct_eq(&in_report[..]))
        {
            return Err(Error::AttestationRejected("report data mismatch"));
        }
        if !quote_status_allowed(report.isv_status, &ra_config) {
            return Err(Error::AttestationRejected("enclave quote status not allowed"));
        }
        if ra_config.enable_pse {
            match report.pse_status {
                Some(PseManifestStatus::Ok) => {}
                Some(PseManifestStatus::OutOfDate) if ra_config.allow_out_of_date => {}
                _ => {
                    return Err(Error::AttestationRejected(
                        "PSE manifest status not allowed",
                    ))
                }
            }
        }
        if let Some(policy) = &self.policy.quote_policy {
            if !policy(&report.quote) {
                return Err(Error::AttestationRejected("quote body check failed"));
            }
        }

        self.is_attested = true;
        self.ias_report = Some(report);
        debug!("msg4 verified, peer attested");
        Ok(())
    }

    /// Collapses the handshake into the long-lived session.
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
