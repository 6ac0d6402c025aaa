pub mod error;
pub mod key_schedule;
pub mod msg;
pub mod net;
pub mod quote;
pub mod report;
pub mod resume;
pub mod rpc;
pub mod session;
pub mod tcp;

pub use crate::error::{Error, Result};

/// The only key-derivation function id accepted by the handshake
/// (AES-128-CMAC based derivation).
pub const AES_CMAC_KDF_ID: u16 = 1;

/// The only extended EPID group id accepted by either side.
pub const ALLOWED_EXT_GROUP_ID: u32 = 0;
