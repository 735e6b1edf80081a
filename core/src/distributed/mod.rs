//! # Distributed data-parallel training
//!
//! Every rank runs the same program on a different slice of the data. The
//! replicas meet at two kinds of synchronization point:
//!
//! 1. **Join**: [`ProcessGroup::join`] blocks until all `world_size` processes
//!    have found each other (see [`rendezvous`]).
//! 2. **Gradient averaging**: once per batch, [`DistributedDataParallel`] replaces
//!    each rank's gradients with the mean over all ranks.
//!
//! ## Module Contents
//!
//! *   [`CollectiveBackend`]: the interface for communication. Implemented by:
//!     *   [`SoloBackend`]: a group of one.
//!     *   [`CpuBackend`]: threads in one process, joined by channels.
//!     *   [`TcpBackend`]: one process per rank, joined by TCP.
//! *   [`ring`]: the ring all-reduce shared by the channel and TCP backends.

pub mod backend;
pub mod cpu_backend;
pub mod ddp;
pub mod process_group;
pub mod rendezvous;
pub mod ring;
pub mod tcp_backend;

pub use backend::{CollectiveBackend, SoloBackend};
pub use cpu_backend::CpuBackend;
pub use ddp::DistributedDataParallel;
pub use process_group::ProcessGroup;
pub use tcp_backend::TcpBackend;
