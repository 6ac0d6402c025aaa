mod comm;
mod context;

pub use crate::comm::{connect_session, ClientCommLayer};
pub use crate::context::{ClientPolicy, ClientRaContext, QuoteSource};

pub type ClientRaResult<T> = ra_common::Result<T>;
