pub mod certificate;
pub mod cmac;
pub mod digest;
pub mod error;
pub mod kdf;
pub mod key;
pub mod key_exchange;
pub mod random;
pub mod secure_channel;
pub mod signature;

pub type Result<T> = std::result::Result<T, error::CryptoError>;
