use serde::Deserialize;

use ra_common::error::Error;
use ra_common::msg::{RaConfig, Spid};

fn default_ias_base_uri() -> String {
    "https://api.trustedservices.intel.com/sgx/dev".to_string()
}

fn default_sig_rl_path() -> String {
    "/attestation/v4/sigrl/".to_string()
}

fn default_report_path() -> String {
    "/attestation/v4/report".to_string()
}

fn default_allow_resume() -> bool {
    true
}

/// Service-provider configuration. Immutable for the lifetime of a session.
#[derive(Debug, Clone, Deserialize)]
pub struct SpConfig {
    #[serde(default)]
    pub ra_config: RaConfig,
    /// Service provider id registered with the attestation service, hex.
    pub spid: String,
    #[serde(default = "default_ias_base_uri")]
    pub ias_base_uri: String,
    #[serde(default = "default_sig_rl_path")]
    pub ias_sig_rl_path: String,
    #[serde(default = "default_report_path")]
    pub ias_report_path: String,
    pub ias_subscription_key: String,
    /// Overrides the built-in report-signing root CA (PEM). Private
    /// deployments and tests pin their own root here.
    #[serde(default)]
    pub ias_root_cert_pem: Option<String>,
    #[serde(default = "default_allow_resume")]
    pub allow_resume: bool,
}

impl SpConfig {
    pub fn spid_bytes(&self) -> ra_common::Result<Spid> {
        let bytes = hex::decode(&self.spid)
            .map_err(|_| Error::PolicyViolation("SPID is not valid hex"))?;
        if bytes.len() != 16 {
            return Err(Error::PolicyViolation("SPID must be 16 bytes"));
        }
        let mut spid = [0u8; 16];
        spid.copy_from_slice(&bytes);
        Ok(spid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let config: SpConfig = serde_json::from_str(
            "{\"spid\":\"00112233445566778899aabbccddeeff\",\
             \"ias_subscription_key\":\"key\"}",
        )
        .unwrap();
        assert!(config.allow_resume);
        assert_eq!(config.ra_config, RaConfig::default());
        assert_eq!(config.spid_bytes().unwrap()[0], 0x00);
        assert_eq!(config.spid_bytes().unwrap()[15], 0xff);
    }

    #[test]
    fn rejects_bad_spid() {
        let config: SpConfig = serde_json::from_str(
            "{\"spid\":\"001122\",\"ias_subscription_key\":\"key\"}",
        )
        .unwrap();
        assert!(config.spid_bytes().is_err());
    }
}
