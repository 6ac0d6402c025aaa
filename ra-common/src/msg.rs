//! Fixed-layout attestation handshake messages. Multi-byte integers are
//! little-endian and every structure reserialises byte-identically, since
//! the msg2/msg3 MACs are computed over byte ranges of the packed form.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use sgx_crypto::cmac::{MacTag, MAC_LEN};
use sgx_crypto::key_exchange::{Ec256PublicKey, EC256_PUB_LEN};
use sgx_crypto::signature::{Ec256Signature, EC256_SIG_LEN};

use crate::error::Error;
use crate::report::IasReport;
use crate::AES_CMAC_KDF_ID;

pub type Gid = [u8; 4];
pub type Spid = [u8; 16];

pub const PS_SEC_PROP_LEN: usize = 256;

pub const MSG0S_LEN: usize = 4;
pub const MSG0R_LEN: usize = RaConfig::WIRE_LEN + EC256_PUB_LEN;
pub const MSG1_LEN: usize = EC256_PUB_LEN + 4;
/// msg2 without the revocation list bytes.
pub const MSG2_FIXED_LEN: usize = EC256_PUB_LEN + 16 + 2 + 2 + EC256_SIG_LEN + MAC_LEN + 4;
/// The msg2 MAC covers everything from `g_b` up to (not including) `mac`.
pub const MSG2_MAC_COVERED: usize = EC256_PUB_LEN + 16 + 2 + 2 + EC256_SIG_LEN;
/// msg3 without the quote bytes.
pub const MSG3_FIXED_LEN: usize = MAC_LEN + EC256_PUB_LEN + PS_SEC_PROP_LEN;

/// Session parameters the service provider commits to in msg0r. The wire
/// form is 10 bytes, policy flags first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaConfig {
    pub linkable_sign: bool,
    pub enable_pse: bool,
    pub allow_out_of_date: bool,
    pub allow_configuration_needed: bool,
    pub ckdf_id: u16,
    pub quote_version: u16,
    pub report_version: u16,
}

impl Default for RaConfig {
    fn default() -> Self {
        Self {
            linkable_sign: true,
            enable_pse: false,
            allow_out_of_date: false,
            allow_configuration_needed: false,
            ckdf_id: AES_CMAC_KDF_ID,
            quote_version: 2,
            report_version: 4,
        }
    }
}

impl RaConfig {
    pub const WIRE_LEN: usize = 10;

    pub fn validate(&self) -> crate::Result<()> {
        if self.ckdf_id != AES_CMAC_KDF_ID {
            return Err(Error::PolicyViolation("unsupported key derivation function"));
        }
        Ok(())
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.linkable_sign as u8);
        out.push(self.enable_pse as u8);
        out.push(self.allow_out_of_date as u8);
        out.push(self.allow_configuration_needed as u8);
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, self.ckdf_id);
        out.extend_from_slice(&buf);
        LittleEndian::write_u16(&mut buf, self.quote_version);
        out.extend_from_slice(&buf);
        LittleEndian::write_u16(&mut buf, self.report_version);
        out.extend_from_slice(&buf);
    }

    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() != Self::WIRE_LEN {
            return Err(Error::Protocol("bad ra_config length"));
        }
        Ok(Self {
            linkable_sign: decode_flag(bytes[0])?,
            enable_pse: decode_flag(bytes[1])?,
            allow_out_of_date: decode_flag(bytes[2])?,
            allow_configuration_needed: decode_flag(bytes[3])?,
            ckdf_id: LittleEndian::read_u16(&bytes[4..6]),
            quote_version: LittleEndian::read_u16(&bytes[6..8]),
            report_version: LittleEndian::read_u16(&bytes[8..10]),
        })
    }
}

fn decode_flag(byte: u8) -> crate::Result<bool> {
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(Error::Protocol("bad flag byte")),
    }
}

/// Attestation request marker sent by the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Msg0s {
    pub ext_grp_id: u32,
}

impl Msg0s {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; MSG0S_LEN];
        LittleEndian::write_u32(&mut out, self.ext_grp_id);
        out
    }

    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() != MSG0S_LEN {
            return Err(Error::Protocol("bad msg0s length"));
        }
        Ok(Self {
            ext_grp_id: LittleEndian::read_u32(bytes),
        })
    }
}

/// The service provider's response to msg0s: its session parameters and its
/// long-term public signing key, which the verifier pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Msg0r {
    pub ra_config: RaConfig,
    pub sp_pub_key: Ec256PublicKey,
}

impl Msg0r {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MSG0R_LEN);
        self.ra_config.encode_into(&mut out);
        out.extend_from_slice(&self.sp_pub_key.to_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() != MSG0R_LEN {
            return Err(Error::Protocol("bad msg0r length"));
        }
        let ra_config = RaConfig::decode(&bytes[..RaConfig::WIRE_LEN])?;
        let mut key = [0u8; EC256_PUB_LEN];
        key.copy_from_slice(&bytes[RaConfig::WIRE_LEN..]);
        Ok(Self {
            ra_config,
            sp_pub_key: Ec256PublicKey::from_bytes(&key),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Msg1 {
    pub g_a: Ec256PublicKey,
    pub gid: Gid,
}

impl Msg1 {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MSG1_LEN);
        out.extend_from_slice(&self.g_a.to_bytes());
        out.extend_from_slice(&self.gid);
        out
    }

    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() != MSG1_LEN {
            return Err(Error::Protocol("bad msg1 length"));
        }
        let mut key = [0u8; EC256_PUB_LEN];
        key.copy_from_slice(&bytes[..EC256_PUB_LEN]);
        let mut gid = [0u8; 4];
        gid.copy_from_slice(&bytes[EC256_PUB_LEN..]);
        Ok(Self {
            g_a: Ec256PublicKey::from_bytes(&key),
            gid,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg2 {
    pub g_b: Ec256PublicKey,
    pub spid: Spid,
    pub quote_type: u16,
    pub kdf_id: u16,
    pub sign_gb_ga: Ec256Signature,
    pub mac: MacTag,
    pub sig_rl: Vec<u8>,
}

impl Msg2 {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MSG2_FIXED_LEN + self.sig_rl.len());
        out.extend_from_slice(&self.g_b.to_bytes());
        out.extend_from_slice(&self.spid);
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, self.quote_type);
        out.extend_from_slice(&buf);
        LittleEndian::write_u16(&mut buf, self.kdf_id);
        out.extend_from_slice(&buf);
        out.extend_from_slice(&self.sign_gb_ga.to_bytes());
        out.extend_from_slice(&self.mac);
        let mut len = [0u8; 4];
        LittleEndian::write_u32(&mut len, self.sig_rl.len() as u32);
        out.extend_from_slice(&len);
        out.extend_from_slice(&self.sig_rl);
        out
    }

    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() < MSG2_FIXED_LEN {
            return Err(Error::Protocol("msg2 too short"));
        }
        let mut pos = 0;
        let mut key = [0u8; EC256_PUB_LEN];
        key.copy_from_slice(&bytes[pos..pos + EC256_PUB_LEN]);
        pos += EC256_PUB_LEN;
        let mut spid = [0u8; 16];
        spid.copy_from_slice(&bytes[pos..pos + 16]);
        pos += 16;
        let quote_type = LittleEndian::read_u16(&bytes[pos..]);
        pos += 2;
        let kdf_id = LittleEndian::read_u16(&bytes[pos..]);
        pos += 2;
        let mut sig = [0u8; EC256_SIG_LEN];
        sig.copy_from_slice(&bytes[pos..pos + EC256_SIG_LEN]);
        pos += EC256_SIG_LEN;
        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(&bytes[pos..pos + MAC_LEN]);
        pos += MAC_LEN;
        let sig_rl_size = LittleEndian::read_u32(&bytes[pos..]) as usize;
        pos += 4;
        if bytes.len() - pos != sig_rl_size {
            return Err(Error::Protocol("msg2 sig_rl size mismatch"));
        }
        Ok(Self {
            g_b: Ec256PublicKey::from_bytes(&key),
            spid,
            quote_type,
            kdf_id,
            sign_gb_ga: Ec256Signature::from_bytes(&sig),
            mac,
            sig_rl: bytes[pos..].to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg3 {
    pub mac: MacTag,
    pub g_a: Ec256PublicKey,
    pub ps_sec_prop: [u8; PS_SEC_PROP_LEN],
    pub quote: Vec<u8>,
}

impl Msg3 {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MSG3_FIXED_LEN + self.quote.len());
        out.extend_from_slice(&self.mac);
        out.extend_from_slice(&self.g_a.to_bytes());
        out.extend_from_slice(&self.ps_sec_prop);
        out.extend_from_slice(&self.quote);
        out
    }

    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() < MSG3_FIXED_LEN {
            return Err(Error::Protocol("msg3 too short"));
        }
        let mut pos = 0;
        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(&bytes[pos..pos + MAC_LEN]);
        pos += MAC_LEN;
        let mut key = [0u8; EC256_PUB_LEN];
        key.copy_from_slice(&bytes[pos..pos + EC256_PUB_LEN]);
        pos += EC256_PUB_LEN;
        let mut ps_sec_prop = [0u8; PS_SEC_PROP_LEN];
        ps_sec_prop.copy_from_slice(&bytes[pos..pos + PS_SEC_PROP_LEN]);
        pos += PS_SEC_PROP_LEN;
        Ok(Self {
            mac,
            g_a: Ec256PublicKey::from_bytes(&key),
            ps_sec_prop,
            quote: bytes[pos..].to_vec(),
        })
    }
}

/// The attestation verdict, sealed under the session envelope before
/// transmission. A rejection carries `is_accepted == false` and usually no
/// report.
#[derive(Debug, Clone, PartialEq)]
pub struct Msg4 {
    pub report: Option<IasReport>,
    pub is_accepted: bool,
}

impl Msg4 {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.is_accepted as u8);
        match &self.report {
            Some(report) => {
                out.push(1);
                report.encode_into(&mut out);
            }
            None => out.push(0),
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() < 2 {
            return Err(Error::Protocol("msg4 too short"));
        }
        let is_accepted = decode_flag(bytes[0])?;
        let report = match bytes[1] {
            0 if bytes.len() == 2 => None,
            1 => {
                let mut rest = &bytes[2..];
                let report = IasReport::decode(&mut rest)?;
                if !rest.is_empty() {
                    return Err(Error::Protocol("trailing bytes in msg4"));
                }
                Some(report)
            }
            _ => return Err(Error::Protocol("bad msg4 report flag")),
        };
        Ok(Self {
            report,
            is_accepted,
        })
    }
}
