use super::backend::CollectiveBackend;
use super::ring::{RingLink, ring_all_reduce_sum};
use crate::error::{Error, Result};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Largest chunk accepted from a peer, in values. Guards against a corrupt header
/// turning into a huge allocation.
const MAX_FRAME_VALUES: usize = 1 << 28;

/// A collective backend with one process per rank, joined in a TCP ring.
///
/// Built by [`super::rendezvous::join`]. `right` carries this rank's sends to
/// `rank + 1`; `left` carries the sends of `rank - 1`. With two ranks these are
/// still two separate connections.
///
/// Frames are a little-endian `u32` value count followed by that many
/// little-endian `f32`s.
#[derive(Debug)]
pub struct TcpBackend {
    rank: usize,
    world_size: usize,
    left: TcpStream,
    right: TcpStream,
}

impl TcpBackend {
    pub(crate) fn new(rank: usize, world_size: usize, left: TcpStream, right: TcpStream) -> Result<Self> {
        left.set_nodelay(true)?;
        right.set_nodelay(true)?;
        Ok(Self {
            rank,
            world_size,
            left,
            right,
        })
    }

    /// Bounds how long a receive may block. `None` waits forever, which is the
    /// steady state once the group is formed.
    pub(crate) fn set_recv_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.left.set_read_timeout(timeout)?;
        Ok(())
    }

    fn left_rank(&self) -> usize {
        (self.rank + self.world_size - 1) % self.world_size
    }

    fn right_rank(&self) -> usize {
        (self.rank + 1) % self.world_size
    }

    fn stall(peer: usize, err: io::Error) -> Error {
        let reason = match err.kind() {
            io::ErrorKind::UnexpectedEof => "connection closed".to_string(),
            _ => err.to_string(),
        };
        Error::CollectiveStall { peer, reason }
    }
}

pub(crate) fn write_frame(mut w: impl Write, values: &[f32]) -> io::Result<()> {
    let mut bytes = Vec::with_capacity(4 + values.len() * 4);
    bytes.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    w.write_all(&bytes)?;
    w.flush()
}

pub(crate) fn read_frame(mut r: impl Read) -> io::Result<Vec<f32>> {
    let mut header = [0u8; 4];
    r.read_exact(&mut header)?;
    let count = u32::from_le_bytes(header) as usize;
    if count > MAX_FRAME_VALUES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {count} values exceeds the limit"),
        ));
    }
    let mut body = vec![0u8; count * 4];
    r.read_exact(&mut body)?;
    Ok(body
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

impl RingLink for TcpBackend {
    fn exchange(&self, send: &[f32]) -> Result<Vec<f32>> {
        // Every rank sends and receives at once. Writing on a second thread keeps
        // a large chunk from filling both socket buffers with nobody reading.
        thread::scope(|s| {
            let writer = s.spawn(|| write_frame(&self.right, send));
            let received = read_frame(&self.left).map_err(|e| Self::stall(self.left_rank(), e));
            let sent = match writer.join() {
                Ok(res) => res.map_err(|e| Self::stall(self.right_rank(), e)),
                Err(_) => Err(Error::CollectiveStall {
                    peer: self.right_rank(),
                    reason: "writer thread panicked".into(),
                }),
            };
            sent?;
            received
        })
    }
}

impl CollectiveBackend for TcpBackend {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_sum(&self, buf: &mut [f32]) -> Result<()> {
        ring_all_reduce_sum(self, self.rank, self.world_size, buf)
    }

    fn shutdown(&self) {
        debug!(rank = self.rank, "closing ring links");
        let _ = self.right.shutdown(Shutdown::Both);
        let _ = self.left.shutdown(Shutdown::Both);
    }
}
