//! Startup handshake that turns `world_size` independent processes into a ring.
//!
//! Rank 0 listens on `master_addr:master_port`. Every other rank connects, says
//! [`Message::Hello`], and waits. Once all ranks have checked in with matching
//! settings, rank 0 answers each one with the full list of ring addresses. If a
//! Hello disagrees with rank 0's settings, everyone connected so far receives
//! [`Message::Reject`] and fails with `RendezvousMismatch`. If the deadline passes
//! first, they receive [`Message::Abort`] and fail with `RendezvousTimeout`.
//!
//! Each rank then connects to its right neighbour, accepts its left neighbour,
//! and the join ends with a barrier over the new ring. Everything up to the end of
//! that barrier is bounded by [`RendezvousConfig::timeout`].

use super::backend::CollectiveBackend;
use super::tcp_backend::TcpBackend;
use crate::config::{RendezvousConfig, Transport};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Bumped whenever [`Message`] changes shape.
pub const PROTOCOL_VERSION: u32 = 1;

const MAX_MESSAGE_BYTES: usize = 1 << 20;
const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long rank 0 waits for a Hello on one accepted connection before dropping it.
const HELLO_BUDGET: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Message {
    /// A non-zero rank checking in with its view of the run.
    Hello {
        rank: usize,
        world_size: usize,
        transport: Transport,
        protocol_version: u32,
        /// Port of the ring listener; the host is the one the connection came from.
        ring_port: u16,
    },
    /// Ring listener address of every rank, indexed by rank.
    Welcome { ring: Vec<SocketAddr> },
    Reject { reason: String },
    Abort { reason: String },
    /// First frame on a ring connection, naming the connecting rank.
    RingHello { rank: usize },
}

pub(crate) fn write_message(mut w: impl Write, msg: &Message) -> Result<()> {
    let payload = bincode::serialize(msg)?;
    w.write_all(&(payload.len() as u32).to_le_bytes())?;
    w.write_all(&payload)?;
    w.flush()?;
    Ok(())
}

pub(crate) fn read_message(mut r: impl Read) -> Result<Message> {
    let mut header = [0u8; 4];
    r.read_exact(&mut header)?;
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_MESSAGE_BYTES {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("rendezvous message of {len} bytes exceeds the limit"),
        )));
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok(bincode::deserialize(&payload)?)
}

/// Tracks the single deadline shared by every step of a join.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    timeout: Duration,
}

impl Deadline {
    fn new(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            timeout,
        }
    }

    /// Time left, or a timeout error naming `stage` if none is.
    fn remaining(&self, stage: &str) -> Result<Duration> {
        match self.at.checked_duration_since(Instant::now()) {
            Some(left) if !left.is_zero() => Ok(left),
            _ => Err(self.expired(stage)),
        }
    }

    fn expired(&self, stage: &str) -> Error {
        Error::RendezvousTimeout {
            timeout: self.timeout,
            stage: stage.to_string(),
        }
    }

    fn is_past(&self) -> bool {
        Instant::now() >= self.at
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Joins the group described by `config` as `rank` of `world_size`.
///
/// Blocks until every rank has joined and the closing barrier has completed, or
/// until `config.timeout` passes. A world of one returns immediately without
/// touching the network.
///
/// # Errors
///
/// - `InvalidWorldSize` / `InvalidRank` before any network activity.
/// - `RendezvousMismatch` if any rank disagrees on world size, transport or
///   protocol version, or two processes claim the same rank.
/// - `RendezvousTimeout` if the group is not complete in time.
pub fn join(rank: usize, world_size: usize, config: &RendezvousConfig) -> Result<Option<TcpBackend>> {
    if world_size == 0 {
        return Err(Error::InvalidWorldSize);
    }
    if rank >= world_size {
        return Err(Error::InvalidRank { rank, world_size });
    }
    if world_size == 1 {
        return Ok(None);
    }
    let deadline = Deadline::new(config.timeout);
    let (ring_listener, ring) = if rank == 0 {
        run_master(world_size, config, &deadline)?
    } else {
        run_peer(rank, world_size, config, &deadline)?
    };
    let backend = form_ring(rank, world_size, &ring, ring_listener, &deadline)?;

    backend.set_recv_timeout(Some(deadline.remaining("entering the closing barrier")?))?;
    backend.barrier().map_err(|e| {
        if deadline.is_past() {
            deadline.expired("waiting in the closing barrier")
        } else {
            e
        }
    })?;
    backend.set_recv_timeout(None)?;

    info!(rank, world_size, "joined process group");
    Ok(Some(backend))
}

fn resolve(config: &RendezvousConfig) -> Result<SocketAddr> {
    (config.master_addr.as_str(), config.master_port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            Error::Config(format!(
                "{}:{} does not resolve to an address",
                config.master_addr, config.master_port
            ))
        })
}

/// Blocks on a non-blocking listener until a connection arrives or the deadline passes.
fn accept_before(listener: &TcpListener, deadline: &Deadline, stage: &str) -> Result<(TcpStream, SocketAddr)> {
    listener.set_nonblocking(true)?;
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                stream.set_nonblocking(false)?;
                return Ok((stream, addr));
            }
            Err(e) if is_timeout(&e) => {
                deadline.remaining(stage)?;
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Connects to `addr`, retrying while the other side is not listening yet.
fn connect_before(addr: SocketAddr, deadline: &Deadline, stage: &str) -> Result<TcpStream> {
    loop {
        let left = deadline.remaining(stage)?;
        match TcpStream::connect_timeout(&addr, left) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, error = %e, "connect failed, retrying");
                thread::sleep(POLL_INTERVAL.min(left));
            }
        }
    }
}

fn read_before(stream: &TcpStream, deadline: &Deadline, stage: &str) -> Result<Message> {
    stream.set_read_timeout(Some(deadline.remaining(stage)?))?;
    let msg = read_message(stream).map_err(|e| match e {
        Error::Io(io) if is_timeout(&io) => deadline.expired(stage),
        other => other,
    })?;
    stream.set_read_timeout(None)?;
    Ok(msg)
}

/// Reads a Hello from a freshly accepted connection within [`HELLO_BUDGET`].
///
/// A connection that stays silent for the budget is a `Protocol` error, so the
/// caller drops it and goes back to accepting. Running out of the join deadline
/// is still a `RendezvousTimeout`.
fn read_hello(stream: &TcpStream, addr: SocketAddr, deadline: &Deadline, stage: &str) -> Result<Message> {
    stream.set_read_timeout(Some(deadline.remaining(stage)?.min(HELLO_BUDGET)))?;
    let msg = read_message(stream).map_err(|e| match e {
        Error::Io(io) if is_timeout(&io) && deadline.is_past() => deadline.expired(stage),
        Error::Io(io) if is_timeout(&io) => Error::Protocol {
            addr,
            reason: format!("no Hello within {HELLO_BUDGET:?}"),
        },
        other => other,
    })?;
    stream.set_read_timeout(None)?;
    Ok(msg)
}

/// Reports `msg` to every registered peer, ignoring peers that already left.
fn broadcast(peers: &[(usize, TcpStream)], msg: &Message) {
    for (rank, stream) in peers {
        if let Err(e) = write_message(stream, msg) {
            warn!(peer = rank, error = %e, "could not notify peer");
        }
    }
}

fn check_hello(msg: &Message, world_size: usize, transport: Transport, seen: &[bool]) -> std::result::Result<(usize, u16), String> {
    let Message::Hello {
        rank,
        world_size: theirs,
        transport: their_transport,
        protocol_version,
        ring_port,
    } = *msg
    else {
        return Err(format!("expected Hello, got {msg:?}"));
    };
    if protocol_version != PROTOCOL_VERSION {
        return Err(format!(
            "rank {rank} speaks protocol {protocol_version}, rank 0 speaks {PROTOCOL_VERSION}"
        ));
    }
    if theirs != world_size {
        return Err(format!(
            "rank {rank} declared world_size {theirs}, rank 0 declared {world_size}"
        ));
    }
    if their_transport != transport {
        return Err(format!(
            "rank {rank} uses transport {their_transport}, rank 0 uses {transport}"
        ));
    }
    if rank == 0 || rank >= world_size {
        return Err(format!("rank {rank} is not a valid peer rank in a world of {world_size}"));
    }
    if seen[rank] {
        return Err(format!("rank {rank} joined twice"));
    }
    Ok((rank, ring_port))
}

/// Rank 0: collect every Hello, validate it, and hand out the ring layout.
fn run_master(
    world_size: usize,
    config: &RendezvousConfig,
    deadline: &Deadline,
) -> Result<(TcpListener, Vec<SocketAddr>)> {
    let bind = resolve(config)?;
    let listener = TcpListener::bind(bind)?;
    let ring_listener = TcpListener::bind(SocketAddr::new(bind.ip(), 0))?;
    let ring_port = ring_listener.local_addr()?.port();
    info!(%bind, world_size, "waiting for peers");

    let mut seen = vec![false; world_size];
    seen[0] = true;
    let mut peers: Vec<(usize, TcpStream)> = Vec::with_capacity(world_size - 1);
    let mut ring_ports: Vec<(IpAddr, u16)> = vec![(bind.ip(), ring_port); world_size];

    while peers.len() < world_size - 1 {
        let missing: Vec<usize> = (1..world_size).filter(|r| !seen[*r]).collect();
        let stage = format!("waiting for ranks {missing:?}");
        let accepted = accept_before(&listener, deadline, &stage).and_then(|(stream, addr)| {
            let hello = read_hello(&stream, addr, deadline, &stage);
            Ok((stream, addr, hello))
        });
        let (stream, addr, hello) = match accepted {
            Ok(t) => t,
            Err(e @ Error::RendezvousTimeout { .. }) => {
                broadcast(&peers, &Message::Abort { reason: e.to_string() });
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let hello = match hello {
            Ok(msg) => msg,
            Err(e @ Error::RendezvousTimeout { .. }) => {
                broadcast(&peers, &Message::Abort { reason: e.to_string() });
                return Err(e);
            }
            Err(e) => {
                // Not one of ours; keep waiting for real peers.
                warn!(%addr, error = %e, "dropping connection that did not say Hello");
                continue;
            }
        };

        match check_hello(&hello, world_size, config.transport, &seen) {
            Ok((rank, port)) => {
                debug!(rank, %addr, "peer checked in");
                seen[rank] = true;
                ring_ports[rank] = (addr.ip(), port);
                peers.push((rank, stream));
            }
            Err(reason) => {
                warn!(%addr, %reason, "rejecting rendezvous");
                let reject = Message::Reject { reason: reason.clone() };
                let _ = write_message(&stream, &reject);
                broadcast(&peers, &reject);
                return Err(Error::RendezvousMismatch(reason));
            }
        }
    }

    let ring: Vec<SocketAddr> = ring_ports.into_iter().map(|(ip, port)| SocketAddr::new(ip, port)).collect();
    for (rank, stream) in &peers {
        // Rank 0's ring address as this peer can reach it.
        let mut theirs = ring.clone();
        theirs[0] = SocketAddr::new(stream.local_addr()?.ip(), ring_port);
        write_message(stream, &Message::Welcome { ring: theirs }).map_err(|e| {
            warn!(peer = rank, error = %e, "peer left before Welcome");
            e
        })?;
    }
    Ok((ring_listener, ring))
}

/// Ranks 1..W: check in with rank 0 and wait for the ring layout.
fn run_peer(
    rank: usize,
    world_size: usize,
    config: &RendezvousConfig,
    deadline: &Deadline,
) -> Result<(TcpListener, Vec<SocketAddr>)> {
    const STAGE: &str = "waiting for the group to fill";
    let master = resolve(config)?;
    let (ring_listener, reply) = loop {
        let stream = connect_before(master, deadline, "connecting to rank 0")?;
        let ring_listener = TcpListener::bind(SocketAddr::new(stream.local_addr()?.ip(), 0))?;
        let hello = Message::Hello {
            rank,
            world_size,
            transport: config.transport,
            protocol_version: PROTOCOL_VERSION,
            ring_port: ring_listener.local_addr()?.port(),
        };
        let reply = write_message(&stream, &hello).and_then(|()| {
            debug!(rank, %master, "sent Hello");
            read_before(&stream, deadline, STAGE)
        });
        match reply {
            // Rank 0 dropped the connection before answering; check in again.
            Err(Error::Io(e)) => {
                warn!(rank, %master, error = %e, "lost connection to rank 0, reconnecting");
                thread::sleep(POLL_INTERVAL.min(deadline.remaining(STAGE)?));
            }
            reply => break (ring_listener, reply?),
        }
    };

    match reply {
        Message::Welcome { ring } if ring.len() == world_size => Ok((ring_listener, ring)),
        Message::Welcome { ring } => Err(Error::RendezvousMismatch(format!(
            "rank 0 sent a ring of {} ranks, expected {world_size}",
            ring.len()
        ))),
        Message::Reject { reason } => Err(Error::RendezvousMismatch(reason)),
        Message::Abort { reason } => {
            warn!(rank, %reason, "rank 0 gave up");
            Err(deadline.expired(STAGE))
        }
        other => Err(Error::Protocol {
            addr: master,
            reason: format!("expected Welcome, got {other:?}"),
        }),
    }
}

/// Connect right, accept left, and confirm who is on each end.
fn form_ring(
    rank: usize,
    world_size: usize,
    ring: &[SocketAddr],
    listener: TcpListener,
    deadline: &Deadline,
) -> Result<TcpBackend> {
    let right_rank = (rank + 1) % world_size;
    let left_rank = (rank + world_size - 1) % world_size;

    // The listener is already bound, so this succeeds before the neighbour accepts.
    let right = connect_before(ring[right_rank], deadline, "connecting to the right neighbour")?;
    write_message(&right, &Message::RingHello { rank })?;

    let (left, addr) = accept_before(&listener, deadline, "waiting for the left neighbour")?;
    match read_before(&left, deadline, "waiting for the left neighbour")? {
        Message::RingHello { rank: r } if r == left_rank => {}
        other => {
            return Err(Error::Protocol {
                addr,
                reason: format!("expected RingHello from rank {left_rank}, got {other:?}"),
            });
        }
    }
    debug!(rank, left = left_rank, right = right_rank, "ring links up");
    TcpBackend::new(rank, world_size, left, right)
}
