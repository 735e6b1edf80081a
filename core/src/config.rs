//! Run configuration.
//!
//! Each struct is built once at process start and passed down by reference.
//! Nothing here writes to the process environment.

use crate::data::PartitionOptions;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const MASTER_ADDR_ENV: &str = "MASTER_ADDR";
pub const MASTER_PORT_ENV: &str = "MASTER_PORT";
pub const RENDEZVOUS_TIMEOUT_ENV: &str = "SEARCHCAST_RENDEZVOUS_TIMEOUT_SECS";

/// How ranks talk to each other once the group is formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Transport {
    /// Length-prefixed frames over a TCP ring.
    #[default]
    Tcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => f.write_str("tcp"),
        }
    }
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            other => Err(Error::Config(format!("unknown transport {other:?}"))),
        }
    }
}

/// Where and how ranks meet. Must be identical on every participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendezvousConfig {
    /// Host of rank 0's rendezvous listener.
    pub master_addr: String,
    pub master_port: u16,
    pub transport: Transport,
    /// Bound on the whole join, from first connect to the closing barrier.
    pub timeout: Duration,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            master_addr: "127.0.0.1".to_string(),
            master_port: 29500,
            transport: Transport::Tcp,
            timeout: Duration::from_secs(300),
        }
    }
}

impl RendezvousConfig {
    /// Defaults overridden by `MASTER_ADDR`, `MASTER_PORT` and
    /// `SEARCHCAST_RENDEZVOUS_TIMEOUT_SECS` when set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Self::from_env`] but reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(addr) = lookup(MASTER_ADDR_ENV) {
            config.master_addr = addr;
        }
        if let Some(port) = lookup(MASTER_PORT_ENV) {
            config.master_port = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{MASTER_PORT_ENV}={port:?} is not a port")))?;
        }
        if let Some(secs) = lookup(RENDEZVOUS_TIMEOUT_ENV) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                Error::Config(format!("{RENDEZVOUS_TIMEOUT_ENV}={secs:?} is not a number of seconds"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Training hyperparameters shared by every rank.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub epochs: usize,
    /// Samples per optimizer step on each rank.
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Seeds parameter initialization. Identical on every rank.
    pub init_seed: u64,
    /// Seeds and shapes the per-epoch split of the training set.
    pub partition: PartitionOptions,
    /// The one rank that writes the checkpoint.
    pub coordinator_rank: usize,
    pub checkpoint_path: PathBuf,
    /// Leading samples used for training; the rest are held out for validation.
    /// `None` trains on everything.
    pub train_len: Option<usize>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 1,
            learning_rate: 0.005,
            init_seed: 42,
            partition: PartitionOptions::default(),
            coordinator_rank: 0,
            checkpoint_path: PathBuf::from("trained_model.safetensors"),
            train_len: Some(50),
        }
    }
}

impl TrainConfig {
    /// Seed for this rank's dropout masks. Distinct per rank, and never equal to
    /// the init seed's stream.
    pub fn dropout_seed(&self, rank: usize) -> u64 {
        self.init_seed ^ 0x9E37_79B9_7F4A_7C15u64.wrapping_mul(rank as u64 + 1)
    }

    /// Rejects values that would make ranks disagree or the loop degenerate.
    pub fn validate(&self, world_size: usize) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.coordinator_rank >= world_size {
            return Err(Error::InvalidRank {
                rank: self.coordinator_rank,
                world_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_transport_parse() {
        assert_eq!("tcp".parse::<Transport>().unwrap(), Transport::Tcp);
        assert_eq!("TCP".parse::<Transport>().unwrap(), Transport::Tcp);
        assert!("nccl".parse::<Transport>().is_err());
        assert_eq!(Transport::Tcp.to_string(), "tcp");
    }

    #[test]
    fn test_rendezvous_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (MASTER_ADDR_ENV, "node0.cluster"),
            (MASTER_PORT_ENV, "60021"),
            (RENDEZVOUS_TIMEOUT_ENV, "5"),
        ]
        .into_iter()
        .collect();

        let config =
            RendezvousConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.master_addr, "node0.cluster");
        assert_eq!(config.master_port, 60021);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_rendezvous_defaults_and_bad_port() {
        let config = RendezvousConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, RendezvousConfig::default());

        let err = RendezvousConfig::from_lookup(|k| {
            (k == MASTER_PORT_ENV).then(|| "not-a-port".to_string())
        });
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn test_train_config_validate() {
        let config = TrainConfig::default();
        assert!(config.validate(2).is_ok());

        let bad = TrainConfig {
            coordinator_rank: 2,
            ..TrainConfig::default()
        };
        assert!(matches!(bad.validate(2), Err(Error::InvalidRank { .. })));

        let bad = TrainConfig {
            batch_size: 0,
            ..TrainConfig::default()
        };
        assert!(bad.validate(1).is_err());
    }

    #[test]
    fn test_dropout_seed_differs_per_rank() {
        let config = TrainConfig::default();
        assert_ne!(config.dropout_seed(0), config.dropout_seed(1));
        assert_ne!(config.dropout_seed(0), config.init_seed);
        assert_eq!(config.dropout_seed(3), TrainConfig::default().dropout_seed(3));
    }
}
