use super::backend::{CollectiveBackend, SoloBackend};
use super::rendezvous;
use crate::config::RendezvousConfig;
use crate::error::Result;
use tracing::{debug, info};

/// This process's membership in a fixed-size group of ranks.
///
/// A `ProcessGroup` only exists after every rank has joined, so holding one means
/// collectives are safe to issue. Leaving (or dropping) it closes the links, and
/// any neighbour still inside a collective fails with `CollectiveStall` rather
/// than waiting forever.
pub struct ProcessGroup {
    backend: Box<dyn CollectiveBackend>,
    closed: bool,
}

impl std::fmt::Debug for ProcessGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessGroup")
            .field("rank", &self.rank())
            .field("world_size", &self.world_size())
            .finish()
    }
}

impl ProcessGroup {
    /// Rendezvous with the other `world_size - 1` processes.
    ///
    /// A hard barrier: returns on one rank only once it can return on all of them.
    pub fn join(rank: usize, world_size: usize, config: &RendezvousConfig) -> Result<Self> {
        info!(
            rank,
            world_size,
            master = %format!("{}:{}", config.master_addr, config.master_port),
            transport = %config.transport,
            "joining process group"
        );
        match rendezvous::join(rank, world_size, config)? {
            Some(backend) => Ok(Self::from_backend(backend)),
            None => Ok(Self::solo()),
        }
    }

    /// A group of one. Every collective returns its input unchanged.
    pub fn solo() -> Self {
        Self::from_backend(SoloBackend)
    }

    /// Wraps an already-connected backend, e.g. one of [`super::CpuBackend::ring`].
    pub fn from_backend(backend: impl CollectiveBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            closed: false,
        }
    }

    pub fn rank(&self) -> usize {
        self.backend.rank()
    }

    pub fn world_size(&self) -> usize {
        self.backend.world_size()
    }

    /// Whether this rank is `coordinator_rank`, the one allowed to write shared output.
    pub fn is_coordinator(&self, coordinator_rank: usize) -> bool {
        self.rank() == coordinator_rank
    }

    pub fn barrier(&self) -> Result<()> {
        self.backend.barrier()
    }

    /// In-place elementwise sum across all ranks.
    pub fn all_reduce_sum(&self, buf: &mut [f32]) -> Result<()> {
        self.backend.all_reduce_sum(buf)
    }

    /// In-place elementwise mean across all ranks. Bit-identical on every rank.
    pub fn all_reduce_mean(&self, buf: &mut [f32]) -> Result<()> {
        self.backend.all_reduce_sum(buf)?;
        let world = self.world_size() as f32;
        if world > 1.0 {
            buf.iter_mut().for_each(|v| *v /= world);
        }
        Ok(())
    }

    /// Releases the group. Dropping it has the same effect.
    pub fn leave(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if !self.closed {
            debug!(rank = self.rank(), "leaving process group");
            self.backend.shutdown();
            self.closed = true;
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.close();
    }
}
