use super::backend::CollectiveBackend;
use super::ring::{RingLink, ring_all_reduce_sum};
use crate::error::{Error, Result};
use crossbeam::channel::{Receiver, Sender, unbounded};

/// An in-process collective backend.
///
/// Implements the **Ring All-Reduce** algorithm using `crossbeam` channels, one
/// rank per thread. It runs the same ring code as the TCP backend, which makes it
/// the reference the multi-process path is tested against.
pub struct CpuBackend {
    rank: usize,
    world_size: usize,
    left_rx: Receiver<Vec<f32>>, // Receive from rank - 1
    right_tx: Sender<Vec<f32>>,  // Send to rank + 1
}

impl CpuBackend {
    pub fn new(
        rank: usize,
        world_size: usize,
        left_rx: Receiver<Vec<f32>>,
        right_tx: Sender<Vec<f32>>,
    ) -> Self {
        Self {
            rank,
            world_size,
            left_rx,
            right_tx,
        }
    }

    /// Wires `world_size` backends into a ring. Element `r` is rank `r`; move each
    /// one onto its own thread.
    ///
    /// Channel `i` carries rank `i`'s sends to rank `i + 1`. Each channel has a
    /// single sender, so a rank that drops its backend turns its neighbours'
    /// next collective into a [`Error::CollectiveStall`] instead of a hang.
    pub fn ring(world_size: usize) -> Result<Vec<CpuBackend>> {
        if world_size == 0 {
            return Err(Error::InvalidWorldSize);
        }
        let (txs, mut rxs): (Vec<_>, Vec<_>) = (0..world_size).map(|_| unbounded()).unzip();
        // Rank r receives on channel r - 1.
        rxs.rotate_right(1);

        Ok(txs
            .into_iter()
            .zip(rxs)
            .enumerate()
            .map(|(rank, (right_tx, left_rx))| CpuBackend::new(rank, world_size, left_rx, right_tx))
            .collect())
    }

    fn left(&self) -> usize {
        (self.rank + self.world_size - 1) % self.world_size
    }

    fn right(&self) -> usize {
        (self.rank + 1) % self.world_size
    }
}

impl RingLink for CpuBackend {
    fn exchange(&self, send: &[f32]) -> Result<Vec<f32>> {
        // Unbounded channels never block on send, so send-then-receive cannot deadlock.
        self.right_tx
            .send(send.to_vec())
            .map_err(|_| Error::CollectiveStall {
                peer: self.right(),
                reason: "receiver dropped".into(),
            })?;
        self.left_rx.recv().map_err(|_| Error::CollectiveStall {
            peer: self.left(),
            reason: "sender dropped".into(),
        })
    }
}

impl CollectiveBackend for CpuBackend {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_sum(&self, buf: &mut [f32]) -> Result<()> {
        ring_all_reduce_sum(self, self.rank, self.world_size, buf)
    }
}
