use crate::error::{Error, Result};

/// Abstraction for a collective communication backend.
///
/// This trait allows swapping between different communication implementations:
/// - **Solo**: a group of one, every collective is the identity.
/// - **CPU/Ring**: in-process ranks joined by channels, used by tests and benches.
/// - **TCP/Ring**: one process per rank, joined by [`super::rendezvous`].
///
/// Every rank must issue the same collectives, with the same buffer lengths, in
/// the same order. Nothing checks this at runtime; a rank that skips a call
/// leaves its neighbours waiting forever.
pub trait CollectiveBackend: Send + Sync {
    /// Returns the rank of the current process/thread.
    fn rank(&self) -> usize;

    /// Returns the total number of processes/threads.
    fn world_size(&self) -> usize;

    /// Replaces `buf` with the elementwise sum of every rank's `buf`.
    ///
    /// On return all ranks hold bit-identical contents. Blocks until every
    /// rank has contributed; there is no timeout.
    fn all_reduce_sum(&self, buf: &mut [f32]) -> Result<()>;

    /// Returns once every rank has reached the barrier.
    fn barrier(&self) -> Result<()> {
        let mut token = [1.0f32];
        self.all_reduce_sum(&mut token)?;
        if token[0] != self.world_size() as f32 {
            return Err(Error::CollectiveStall {
                peer: self.rank(),
                reason: format!(
                    "barrier counted {} ranks, expected {}",
                    token[0],
                    self.world_size()
                ),
            });
        }
        Ok(())
    }

    /// Closes any links to peers. Later collectives fail instead of blocking.
    fn shutdown(&self) {}
}

/// The backend of a one-rank group.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoloBackend;

impl CollectiveBackend for SoloBackend {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, _buf: &mut [f32]) -> Result<()> {
        Ok(())
    }
}
