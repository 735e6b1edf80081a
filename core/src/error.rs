//! Crate-wide error type.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Everything that can stop a training run.
///
/// None of these are retried inside the crate. Rendezvous failures happen before
/// the first batch; the rest abort the current rank, and its peers either fail on
/// their next collective or stall (see [`crate::distributed::ddp`]).
#[derive(Error, Debug)]
pub enum Error {
    #[error("rendezvous timed out after {timeout:?} while {stage}")]
    RendezvousTimeout { timeout: Duration, stage: String },

    #[error("rendezvous mismatch: {0}")]
    RendezvousMismatch(String),

    /// A neighbour on the ring went away mid-collective.
    #[error("collective stalled: link to rank {peer} failed ({reason})")]
    CollectiveStall { peer: usize, reason: String },

    #[error("failed to load sample {index}: {reason}")]
    DataAccess { index: usize, reason: String },

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("rank {rank} is outside a world of size {world_size}")]
    InvalidRank { rank: usize, world_size: usize },

    #[error("world size must be at least 1")]
    InvalidWorldSize,

    #[error("model parameters differ across ranks (local checksum {local}, mean {mean})")]
    ParameterDivergence { local: f64, mean: f64 },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A layer was asked for gradients before it saw an input.
    #[error("{layer}: backward called before forward")]
    BackwardBeforeForward { layer: String },

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("unexpected peer at {addr}: {reason}")]
    Protocol { addr: SocketAddr, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire encoding error: {0}")]
    Wire(#[from] bincode::Error),

    #[error("kernel error: {0}")]
    Kernel(#[from] searchcast_kernels::KernelError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ShapeMismatch {
            expected: vec![1, 51],
            got: vec![51, 1],
        };
        assert_eq!(err.to_string(), "Shape mismatch: expected [1, 51], got [51, 1]");

        let err = Error::InvalidRank {
            rank: 3,
            world_size: 2,
        };
        assert_eq!(err.to_string(), "rank 3 is outside a world of size 2");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
