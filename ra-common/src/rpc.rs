//! Typed argument framing for the resume and ticket RPCs: a u32 argument
//! count followed by tagged arguments. Primitive arguments carry a one-byte
//! width and little-endian bytes; binary arguments a u64 length. The resume
//! finish tags are computed over these frames exactly as sent, so encoding
//! is deterministic.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Error;

const TAG_PRIM: u8 = 1;
const TAG_BIN: u8 = 2;

pub struct RpcWriter {
    buf: Vec<u8>,
    count: u32,
}

impl RpcWriter {
    pub fn new() -> Self {
        Self {
            // Argument count is patched in by `into_bytes`.
            buf: vec![0u8; 4],
            count: 0,
        }
    }

    pub fn add_prim_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(TAG_PRIM);
        self.buf.push(1);
        self.buf.push(value);
        self.count += 1;
        self
    }

    pub fn add_prim_u64(&mut self, value: u64) -> &mut Self {
        self.buf.push(TAG_PRIM);
        self.buf.push(8);
        self.buf.extend_from_slice(&value.to_le_bytes());
        self.count += 1;
        self
    }

    pub fn add_bin(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.push(TAG_BIN);
        self.buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        self.buf.extend_from_slice(bytes);
        self.count += 1;
        self
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        LittleEndian::write_u32(&mut self.buf[..4], self.count);
        self.buf
    }
}

impl Default for RpcWriter {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RpcParser {
    buf: Vec<u8>,
    pos: usize,
    remaining: u32,
}

impl RpcParser {
    pub fn new(buf: Vec<u8>) -> crate::Result<Self> {
        if buf.len() < 4 {
            return Err(Error::Protocol("rpc frame too short"));
        }
        let remaining = LittleEndian::read_u32(&buf[..4]);
        Ok(Self {
            buf,
            pos: 4,
            remaining,
        })
    }

    /// The frame exactly as it travelled on the wire.
    pub fn full_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn prim_u8(&mut self) -> crate::Result<u8> {
        let arg = self.next_prim(1)?;
        Ok(arg[0])
    }

    pub fn prim_u64(&mut self) -> crate::Result<u64> {
        let arg = self.next_prim(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(arg);
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn bin(&mut self) -> crate::Result<Vec<u8>> {
        self.expect_arg(TAG_BIN)?;
        if self.buf.len() - self.pos < 8 {
            return Err(Error::Protocol("truncated rpc argument"));
        }
        let len = LittleEndian::read_u64(&self.buf[self.pos..self.pos + 8]) as usize;
        self.pos += 8;
        if self.buf.len() - self.pos < len {
            return Err(Error::Protocol("truncated rpc argument"));
        }
        let out = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(out)
    }

    fn expect_arg(&mut self, tag: u8) -> crate::Result<()> {
        if self.remaining == 0 {
            return Err(Error::Protocol("rpc argument count exhausted"));
        }
        if self.pos >= self.buf.len() || self.buf[self.pos] != tag {
            return Err(Error::Protocol("unexpected rpc argument type"));
        }
        self.pos += 1;
        self.remaining -= 1;
        Ok(())
    }

    fn next_prim(&mut self, width: usize) -> crate::Result<&[u8]> {
        self.expect_arg(TAG_PRIM)?;
        if self.pos >= self.buf.len() || self.buf[self.pos] as usize != width {
            return Err(Error::Protocol("unexpected rpc primitive width"));
        }
        self.pos += 1;
        if self.buf.len() - self.pos < width {
            return Err(Error::Protocol("truncated rpc argument"));
        }
        let out = &self.buf[self.pos..self.pos + width];
        self.pos += width;
        Ok(out)
    }
}
