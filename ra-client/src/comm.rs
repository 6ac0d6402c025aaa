//! Client-side handshake driver: attempt resume from a saved ticket, fall
//! back to the full msg0..msg4 attestation, then pick up the new ticket the
//! server issues over the encrypted channel.

use std::time::Duration;

use log::{debug, info};
use subtle::ConstantTimeEq;

use ra_common::error::Error;
use ra_common::msg::{Msg0r, MSG0R_LEN};
use ra_common::net::{Connection, EncryptedConnection};
use ra_common::report::IasReport;
use ra_common::resume::{
    finish_tag, rekey, ACCEPTED, FINISH_TAG_LEN, HAS_TICKET, NOT_ACCEPTED, NO_TICKET,
};
use ra_common::rpc::{RpcParser, RpcWriter};
use ra_common::session::{ClientSession, RaSession};
use sgx_crypto::digest::sha256;
use sgx_crypto::random::RandomState;
use sgx_crypto::secure_channel::SecureChannel;

use crate::context::{ClientRaContext, QuoteSource};

/// An attested, encrypted client-side session. Keeps the original session
/// (ticket included) for the next connection's resume attempt.
pub struct ClientCommLayer<C: Connection> {
    conn: EncryptedConnection<C>,
    session: RaSession,
    orig: ClientSession,
}

impl<C: Connection> ClientCommLayer<C> {
    pub fn send(&mut self, data: &[u8], deadline: Option<Duration>) -> ra_common::Result<()> {
        self.conn.send(data, deadline)
    }

    pub fn recv(&mut self, deadline: Option<Duration>) -> ra_common::Result<Vec<u8>> {
        self.conn.recv(deadline)
    }

    pub fn ias_report(&self) -> &IasReport {
        &self.orig.session.ias_report
    }

    /// The session to save for resuming later connections.
    pub fn orig_session(&self) -> &ClientSession {
        &self.orig
    }

    pub fn session(&self) -> &RaSession {
        &self.session
    }
}

/// Establishes one session over `conn`, resuming from `saved` when the
/// server accepts the ticket.
pub fn connect_session<C, Q>(
    mut conn: C,
    ctx: ClientRaContext<Q>,
    saved: Option<&ClientSession>,
    deadline: Option<Duration>,
) -> ra_common::Result<ClientCommLayer<C>>
where
    C: Connection,
    Q: QuoteSource,
{
    match saved {
        Some(saved) if !saved.ticket.is_empty() => {
            if let Some(session) = try_resume(&mut conn, saved, deadline)? {
                let channel = SecureChannel::new(&session.secret_key, &session.masking_key)?;
                info!("session resumed from ticket");
                return Ok(ClientCommLayer {
                    conn: EncryptedConnection::new(conn, channel),
                    session,
                    // The saved ticket stays valid for the next connection.
                    orig: saved.clone(),
                });
            }
            // Server refused the ticket; the refusal RPC has been consumed.
        }
        _ => {
            let mut rpc = RpcWriter::new();
            rpc.add_prim_u8(NO_TICKET);
            conn.send_container(&rpc.into_bytes(), deadline)?;
        }
    }

    full_attestation(conn, ctx, deadline)
}

/// Runs the resume exchange for a saved ticket. `Ok(None)` means the server
/// refused and the caller falls back to the full handshake; a bad finish
/// tag is fatal.
fn try_resume<C: Connection>(
    conn: &mut C,
    saved: &ClientSession,
    deadline: Option<Duration>,
) -> ra_common::Result<Option<RaSession>> {
    let rng = RandomState::new();
    let client_nonce = rng.next_u64().map_err(Error::from)?;

    let mut rpc = RpcWriter::new();
    rpc.add_prim_u8(HAS_TICKET);
    rpc.add_bin(&saved.ticket);
    rpc.add_prim_u64(client_nonce);
    let request = rpc.into_bytes();
    conn.send_container(&request, deadline)?;
    let own_rpc_hash = sha256(&request);

    let reply = conn.recv_container(deadline)?;
    let peer_rpc_hash = sha256(&reply);
    let mut reply = RpcParser::new(reply)?;
    match reply.prim_u8()? {
        ACCEPTED => {}
        NOT_ACCEPTED => {
            debug!("server refused resume, falling back");
            return Ok(None);
        }
        _ => return Err(Error::Protocol("unknown resume reply")),
    }
    let server_nonce = reply.prim_u64()?;

    // Prove possession over the server's RPC; verify its proof over ours.
    let client_finish = finish_tag(&saved.session.secret_key, &peer_rpc_hash);
    conn.send_container(&client_finish, deadline)?;

    let server_finish = conn.recv_container(deadline)?;
    let expected = finish_tag(&saved.session.secret_key, &own_rpc_hash);
    if server_finish.len() != FINISH_TAG_LEN
        || !bool::from(server_finish[..].ct_eq(&expected[..]))
    {
        return Err(Error::CryptoFailure(
            sgx_crypto::error::CryptoError::BadMac,
        ));
    }

    let secret_key = rekey(&saved.session.secret_key, client_nonce, server_nonce)?;
    let masking_key = rekey(&saved.session.masking_key, client_nonce, server_nonce)?;
    Ok(Some(RaSession {
        secret_key,
        masking_key,
        ias_report: saved.session.ias_report.clone(),
    }))
}

fn full_attestation<C, Q>(
    mut conn: C,
    mut ctx: ClientRaContext<Q>,
    deadline: Option<Duration>,
) -> ra_common::Result<ClientCommLayer<C>>
where
    C: Connection,
    Q: QuoteSource,
{
    let msg0s = ctx.get_msg0s()?;
    conn.send_all(&msg0s.encode(), deadline)?;

    let mut msg0r = [0u8; MSG0R_LEN];
    conn.recv_exact(&mut msg0r, deadline)?;
    let msg1 = ctx.process_msg0r(&Msg0r::decode(&msg0r)?)?;
    conn.send_all(&msg1.encode(), deadline)?;

    let msg2 = conn.recv_container(deadline)?;
    let msg3 = ctx.process_msg2(&msg2)?;
    conn.send_container(&msg3, deadline)?;

    let sealed_msg4 = conn.recv_container(deadline)?;
    ctx.process_msg4(&sealed_msg4)?;

    let session = ctx.into_session()?;
    // The sealed msg4 consumed frame 0 of the inbound direction.
    let channel = SecureChannel::with_counters(&session.secret_key, &session.masking_key, 0, 1)?;
    let mut conn = EncryptedConnection::new(conn, channel);

    // The server sends the new ticket over the established channel.
    let ticket_rpc = conn.recv(deadline)?;
    let mut ticket_rpc = RpcParser::new(ticket_rpc)?;
    let ticket = match ticket_rpc.prim_u8()? {
        HAS_TICKET => ticket_rpc.bin()?,
        NO_TICKET => Vec::new(),
        _ => return Err(Error::Protocol("unknown ticket rpc")),
    };

    info!("full attestation completed");
    Ok(ClientCommLayer {
        conn,
        orig: ClientSession {
            ticket,
            session: session.clone(),
        },
        session,
    })
}
