//! SGX quote structures as embedded in msg3 and in the attestation report.
//! A quote blob is the 432-byte body (48-byte quote header plus the 384-byte
//! enclave report body), optionally followed by `signature_len: u32` and the
//! EPID signature. The report returned by the attestation service carries
//! only the 432-byte body, so equality checks run over that comparable
//! region and never include the signature length field.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Error;
use crate::msg::Gid;

/// Length of the comparable region (quote without signature).
pub const QUOTE_BODY_LEN: usize = 432;
pub const REPORT_BODY_LEN: usize = 384;
pub const REPORT_DATA_LEN: usize = 64;
/// Offset of `report_data` within the quote blob.
pub const REPORT_DATA_OFFSET: usize = 368;

/// Enclave report body carried inside a quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportBody {
    pub cpu_svn: [u8; 16],
    pub misc_select: u32,
    pub attributes: [u8; 16],
    pub mr_enclave: [u8; 32],
    pub mr_signer: [u8; 32],
    pub isv_prod_id: u16,
    pub isv_svn: u16,
    pub report_data: [u8; REPORT_DATA_LEN],
}

impl ReportBody {
    pub fn try_copy_from(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != REPORT_BODY_LEN {
            return None;
        }
        let mut body = Self {
            cpu_svn: [0; 16],
            misc_select: LittleEndian::read_u32(&bytes[16..20]),
            attributes: [0; 16],
            mr_enclave: [0; 32],
            mr_signer: [0; 32],
            isv_prod_id: LittleEndian::read_u16(&bytes[256..258]),
            isv_svn: LittleEndian::read_u16(&bytes[258..260]),
            report_data: [0; REPORT_DATA_LEN],
        };
        body.cpu_svn.copy_from_slice(&bytes[0..16]);
        body.attributes.copy_from_slice(&bytes[48..64]);
        body.mr_enclave.copy_from_slice(&bytes[64..96]);
        body.mr_signer.copy_from_slice(&bytes[128..160]);
        body.report_data.copy_from_slice(&bytes[320..384]);
        Some(body)
    }
}

/// Quote body as produced by the quoting enclave (without signature).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteBody {
    pub version: u16,
    pub sign_type: u16,
    pub epid_group_id: Gid,
    pub qe_svn: u16,
    pub pce_svn: u16,
    pub xeid: u32,
    pub basename: [u8; 32],
    pub report_body: ReportBody,
}

impl QuoteBody {
    pub fn try_copy_from(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != QUOTE_BODY_LEN {
            return None;
        }
        let mut quote = Self {
            version: LittleEndian::read_u16(&bytes[0..2]),
            sign_type: LittleEndian::read_u16(&bytes[2..4]),
            epid_group_id: [0; 4],
            qe_svn: LittleEndian::read_u16(&bytes[8..10]),
            pce_svn: LittleEndian::read_u16(&bytes[10..12]),
            xeid: LittleEndian::read_u32(&bytes[12..16]),
            basename: [0; 32],
            report_body: ReportBody::try_copy_from(&bytes[48..QUOTE_BODY_LEN])?,
        };
        quote.epid_group_id.copy_from_slice(&bytes[4..8]);
        quote.basename.copy_from_slice(&bytes[16..48]);
        Some(quote)
    }
}

/// The comparable region of a quote blob: its first 432 bytes, excluding
/// the trailing signature length and signature.
pub fn comparable_region(quote: &[u8]) -> crate::Result<&[u8]> {
    if quote.len() < QUOTE_BODY_LEN {
        return Err(Error::Protocol("quote too short"));
    }
    Ok(&quote[..QUOTE_BODY_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn sample_quote_bytes(report_data: &[u8; REPORT_DATA_LEN]) -> Vec<u8> {
        let mut bytes = vec![0u8; QUOTE_BODY_LEN];
        LittleEndian::write_u16(&mut bytes[0..2], 2); // version
        LittleEndian::write_u16(&mut bytes[2..4], 1); // linkable
        bytes[4..8].copy_from_slice(&[0x00, 0x00, 0x0a, 0x0b]);
        LittleEndian::write_u16(&mut bytes[8..10], 7); // qe_svn
        for (i, b) in bytes[64 + 48..96 + 48].iter_mut().enumerate() {
            *b = i as u8; // mr_enclave
        }
        LittleEndian::write_u16(&mut bytes[48 + 256..48 + 258], 42); // isv_prod_id
        bytes[REPORT_DATA_OFFSET..].copy_from_slice(report_data);
        bytes
    }

    #[test]
    fn parses_fields_at_documented_offsets() {
        let mut report_data = [0u8; REPORT_DATA_LEN];
        report_data[0] = 0xaa;
        report_data[63] = 0xbb;
        let bytes = sample_quote_bytes(&report_data);
        let quote = QuoteBody::try_copy_from(&bytes).unwrap();
        assert_eq!(quote.version, 2);
        assert_eq!(quote.sign_type, 1);
        assert_eq!(quote.epid_group_id, [0x00, 0x00, 0x0a, 0x0b]);
        assert_eq!(quote.qe_svn, 7);
        assert_eq!(quote.report_body.isv_prod_id, 42);
        assert_eq!(quote.report_body.report_data, report_data);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(QuoteBody::try_copy_from(&[0u8; 431]).is_none());
        assert!(QuoteBody::try_copy_from(&[0u8; 436]).is_none());
    }

    #[test]
    fn comparable_region_strips_signature() {
        let report_data = [1u8; REPORT_DATA_LEN];
        let mut blob = sample_quote_bytes(&report_data);
        blob.extend_from_slice(&[4, 0, 0, 0]); // signature_len
        blob.extend_from_slice(&[9, 9, 9, 9]); // signature
        assert_eq!(comparable_region(&blob).unwrap().len(), QUOTE_BODY_LEN);
        assert!(comparable_region(&blob[..100]).is_err());
    }
}
