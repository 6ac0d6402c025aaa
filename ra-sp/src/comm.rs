//! Server-side handshake driver. A connection starts with the client's
//! resume RPC; an acceptable ticket short-circuits into a rekeyed session,
//! anything else falls back to the full msg0..msg4 attestation, after which
//! a fresh ticket is issued over the encrypted channel.

use std::time::Duration;

use log::{debug, info};
use subtle::ConstantTimeEq;

use ra_common::error::Error;
use ra_common::msg::{Msg0s, Msg1, MSG0S_LEN, MSG1_LEN};
use ra_common::net::{Connection, EncryptedConnection};
use ra_common::report::IasReport;
use ra_common::resume::{
    finish_tag, rekey, ACCEPTED, FINISH_TAG_LEN, HAS_TICKET, NOT_ACCEPTED, NO_TICKET,
};
use ra_common::rpc::{RpcParser, RpcWriter};
use ra_common::session::RaSession;
use sgx_crypto::digest::sha256;
use sgx_crypto::random::RandomState;
use sgx_crypto::secure_channel::SecureChannel;

use crate::context::SpRaContext;
use crate::ias::ReportingClient;
use crate::ticket::TicketSealer;

/// An attested, encrypted server-side session.
pub struct SpCommLayer<C: Connection> {
    conn: EncryptedConnection<C>,
    session: RaSession,
}

impl<C: Connection> SpCommLayer<C> {
    pub fn send(&mut self, data: &[u8], deadline: Option<Duration>) -> ra_common::Result<()> {
        self.conn.send(data, deadline)
    }

    pub fn recv(&mut self, deadline: Option<Duration>) -> ra_common::Result<Vec<u8>> {
        self.conn.recv(deadline)
    }

    pub fn ias_report(&self) -> &IasReport {
        &self.session.ias_report
    }

    pub fn session(&self) -> &RaSession {
        &self.session
    }
}

/// Accepts one client session on `conn`: resume if the presented ticket is
/// good, full attestation otherwise.
pub fn accept_session<C, R>(
    mut conn: C,
    ctx: SpRaContext<R>,
    tickets: &TicketSealer,
    allow_resume: bool,
    deadline: Option<Duration>,
) -> ra_common::Result<SpCommLayer<C>>
where
    C: Connection,
    R: ReportingClient,
{
    // 1. The client always opens with a resume RPC.
    let first = conn.recv_container(deadline)?;
    let mut rpc = RpcParser::new(first)?;
    let ticket_tag = rpc.prim_u8()?;

    match ticket_tag {
        NO_TICKET => {}
        HAS_TICKET => {
            let ticket = rpc.bin()?;
            let client_nonce = rpc.prim_u64()?;
            let saved = if allow_resume {
                tickets.open(&ticket).ok()
            } else {
                None
            };
            match saved {
                Some(saved) => {
                    return resume_session(conn, saved, &rpc, client_nonce, deadline);
                }
                None => {
                    debug!("resume refused, falling back to full attestation");
                    let mut refusal = RpcWriter::new();
                    refusal.add_prim_u8(NOT_ACCEPTED);
                    conn.send_container(&refusal.into_bytes(), deadline)?;
                }
            }
        }
        _ => return Err(Error::Protocol("unknown resume rpc")),
    }

    full_attestation(conn, ctx, tickets, allow_resume, deadline)
}

fn resume_session<C: Connection>(
    mut conn: C,
    saved: RaSession,
    client_rpc: &RpcParser,
    client_nonce: u64,
    deadline: Option<Duration>,
) -> ra_common::Result<SpCommLayer<C>> {
    let rng = RandomState::new();
    let server_nonce = rng.next_u64().map_err(Error::from)?;

    let mut acceptance = RpcWriter::new();
    acceptance.add_prim_u8(ACCEPTED);
    acceptance.add_prim_u64(server_nonce);
    let acceptance = acceptance.into_bytes();
    conn.send_container(&acceptance, deadline)?;

    // Each side proves possession of the saved key over the other's RPC
    // bytes as they travelled.
    let own_rpc_hash = sha256(&acceptance);
    let peer_rpc_hash = sha256(client_rpc.full_bytes());

    let client_finish = conn.recv_container(deadline)?;
    let expected = finish_tag(&saved.secret_key, &own_rpc_hash);
    if client_finish.len() != FINISH_TAG_LEN
        || !bool::from(client_finish[..].ct_eq(&expected[..]))
    {
        return Err(Error::CryptoFailure(
            sgx_crypto::error::CryptoError::BadMac,
        ));
    }
    let server_finish = finish_tag(&saved.secret_key, &peer_rpc_hash);
    conn.send_container(&server_finish, deadline)?;

    let secret_key = rekey(&saved.secret_key, client_nonce, server_nonce)?;
    let masking_key = rekey(&saved.masking_key, client_nonce, server_nonce)?;
    let channel = SecureChannel::new(&secret_key, &masking_key)?;

    info!("session resumed from ticket");
    Ok(SpCommLayer {
        conn: EncryptedConnection::new(conn, channel),
        session: RaSession {
            secret_key,
            masking_key,
            ias_report: saved.ias_report,
        },
    })
}

fn full_attestation<C, R>(
    mut conn: C,
    mut ctx: SpRaContext<R>,
    tickets: &TicketSealer,
    allow_resume: bool,
    deadline: Option<Duration>,
) -> ra_common::Result<SpCommLayer<C>>
where
    C: Connection,
    R: ReportingClient,
{
    let mut msg0s = [0u8; MSG0S_LEN];
    conn.recv_exact(&mut msg0s, deadline)?;
    let msg0r = ctx.process_msg0(&Msg0s::decode(&msg0s)?)?;
    conn.send_all(&msg0r.encode(), deadline)?;

    let mut msg1 = [0u8; MSG1_LEN];
    conn.recv_exact(&mut msg1, deadline)?;
    let msg2 = ctx.process_msg1(&Msg1::decode(&msg1)?, deadline)?;
    conn.send_container(&msg2, deadline)?;

    let msg3 = conn.recv_container(deadline)?;
    let outcome = ctx.process_msg3(&msg3, deadline)?;
    // The peer sees the verdict before this side surfaces it.
    conn.send_container(&outcome.sealed_msg4, deadline)?;
    outcome.verdict?;

    let session = ctx.into_session()?;
    // msg4 was frame 0 of the outbound direction.
    let channel = SecureChannel::with_counters(&session.secret_key, &session.masking_key, 1, 0)?;
    let mut conn = EncryptedConnection::new(conn, channel);

    let mut ticket_rpc = RpcWriter::new();
    if allow_resume {
        let ticket = tickets.issue(&session)?;
        ticket_rpc.add_prim_u8(HAS_TICKET);
        ticket_rpc.add_bin(&ticket);
    } else {
        ticket_rpc.add_prim_u8(NO_TICKET);
    }
    conn.send(&ticket_rpc.into_bytes(), deadline)?;

    info!("full attestation completed");
    Ok(SpCommLayer { conn, session })
}
