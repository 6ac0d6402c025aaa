use std::time::Duration;

use percent_encoding::percent_decode_str;

use ra_common::error::Error;
use ra_common::msg::Gid;

use crate::config::SpConfig;

/// A signed attestation verdict as returned by the reporting service.
#[derive(Debug, Clone)]
pub struct QuoteReport {
    /// The report body, byte-exact as signed.
    pub report_json: String,
    /// RSA signature over `report_json`.
    pub signature: Vec<u8>,
    /// Report-signing certificate chain, PEM.
    pub cert_chain_pem: String,
}

/// The attestation reporting service as seen by the prover. Calls block;
/// the deadline bounds each round trip.
pub trait ReportingClient {
    /// Fetches the signature revocation list for an EPID group, returned
    /// base64-encoded (possibly empty).
    fn get_sig_rl(&self, gid: &Gid, deadline: Option<Duration>) -> ra_common::Result<String>;

    /// Submits a quote for verification, with the freshness nonce and, when
    /// platform services are in use, the PSE manifest from msg3.
    fn get_quote_report(
        &self,
        quote: &[u8],
        nonce: &str,
        pse_manifest: Option<&[u8]>,
        deadline: Option<Duration>,
    ) -> ra_common::Result<QuoteReport>;
}

/// HTTPS client for the Intel attestation service.
pub struct IasClient {
    http: reqwest::blocking::Client,
    base_uri: String,
    sig_rl_path: String,
    report_path: String,
    subscription_key: String,
}

impl IasClient {
    pub fn new(config: &SpConfig) -> ra_common::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| Error::ReportingService(e.to_string()))?;
        Ok(Self {
            http,
            base_uri: config.ias_base_uri.clone(),
            sig_rl_path: config.ias_sig_rl_path.clone(),
            report_path: config.ias_report_path.clone(),
            subscription_key: config.ias_subscription_key.clone(),
        })
    }
}

fn request_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else {
        Error::ReportingService(e.to_string())
    }
}

impl ReportingClient for IasClient {
    fn get_sig_rl(&self, gid: &Gid, deadline: Option<Duration>) -> ra_common::Result<String> {
        let url = format!(
            "{}{}{:02x}{:02x}{:02x}{:02x}",
            self.base_uri, self.sig_rl_path, gid[0], gid[1], gid[2], gid[3]
        );
        let mut request = self
            .http
            .get(&url)
            .header("Ocp-Apim-Subscription-Key", &self.subscription_key);
        if let Some(deadline) = deadline {
            request = request.timeout(deadline);
        }
        let response = request.send().map_err(request_error)?;
        if response.status().as_u16() != 200 {
            return Err(Error::ReportingService(format!(
                "sigrl request failed with status {}",
                response.status()
            )));
        }
        response.text().map_err(request_error)
    }

    fn get_quote_report(
        &self,
        quote: &[u8],
        nonce: &str,
        pse_manifest: Option<&[u8]>,
        deadline: Option<Duration>,
    ) -> ra_common::Result<QuoteReport> {
        let url = format!("{}{}", self.base_uri, self.report_path);
        let body = match pse_manifest {
            Some(manifest) => format!(
                "{{\"isvEnclaveQuote\":\"{}\",\"pseManifest\":\"{}\",\"nonce\":\"{}\"}}",
                base64::encode(quote),
                base64::encode(manifest),
                nonce
            ),
            None => format!(
                "{{\"isvEnclaveQuote\":\"{}\",\"nonce\":\"{}\"}}",
                base64::encode(quote),
                nonce
            ),
        };
        let mut request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Ocp-Apim-Subscription-Key", &self.subscription_key)
            .body(body);
        if let Some(deadline) = deadline {
            request = request.timeout(deadline);
        }
        let response = request.send().map_err(request_error)?;
        if response.status().as_u16() != 200 {
            return Err(Error::ReportingService(format!(
                "report request failed with status {}",
                response.status()
            )));
        }

        let signature_b64 = header_string(&response, "X-IASReport-Signature")?;
        let signature = base64::decode(&signature_b64)
            .map_err(|_| Error::ReportingService("undecodable report signature".to_string()))?;
        let cert_chain = header_string(&response, "X-IASReport-Signing-Certificate")?;
        let cert_chain_pem = percent_decode_str(&cert_chain)
            .decode_utf8()
            .map_err(|_| Error::ReportingService("undecodable certificate header".to_string()))?
            .into_owned();
        let report_json = response.text().map_err(request_error)?;

        Ok(QuoteReport {
            report_json,
            signature,
            cert_chain_pem,
        })
    }
}

fn header_string(
    response: &reqwest::blocking::Response,
    name: &str,
) -> ra_common::Result<String> {
    Ok(response
        .headers()
        .get(name)
        .ok_or_else(|| Error::ReportingService(format!("missing {} header", name)))?
        .to_str()
        .map_err(|_| Error::ReportingService(format!("malformed {} header", name)))?
        .to_string())
}
