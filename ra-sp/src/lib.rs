mod comm;
mod config;
mod context;
mod ias;
mod ticket;

pub use crate::comm::{accept_session, SpCommLayer};
pub use crate::config::SpConfig;
pub use crate::context::{Msg3Outcome, QuotePolicy, ReportDataVerifier, SpRaContext};
pub use crate::ias::{IasClient, QuoteReport, ReportingClient};
pub use crate::ticket::TicketSealer;

pub type SpRaResult<T> = ra_common::Result<T>;
