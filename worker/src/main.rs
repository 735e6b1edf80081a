//! One rank of a data-parallel training run.
//!
//! ```bash
//! MASTER_ADDR=10.0.0.1 MASTER_PORT=29500 searchcast-worker 0 4
//! ```
//!
//! Every rank is started with the same world size and its own rank. Rank 0 hosts
//! the rendezvous and writes `trained_model.safetensors` when training ends.

use anyhow::{Context, Result};
use clap::Parser;
use searchcast::config::{RendezvousConfig, TrainConfig};
use searchcast::data::GraphDataset;
use searchcast::data::synthetic::{self, SyntheticConfig};
use searchcast::distributed::ProcessGroup;
use searchcast::models::{Gcn, GcnConfig, Trainable};
use searchcast::optim::AdamW;
use searchcast::trainer::Trainer;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Train the search-term case forecaster as one rank of a process group.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// This process's rank, in `0..world_size`.
    rank: usize,

    /// Number of processes in the group.
    world_size: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let rendezvous = RendezvousConfig::from_env().context("reading rendezvous environment")?;
    let group = ProcessGroup::join(args.rank, args.world_size, &rendezvous)
        .with_context(|| format!("rank {} failed to join", args.rank))?;

    let dataset = synthetic::generate(&SyntheticConfig::default()).context("building sample store")?;
    let config = TrainConfig::default();
    let gcn = GcnConfig {
        in_features: dataset.num_features(),
        dropout_seed: config.dropout_seed(group.rank()),
        ..GcnConfig::default()
    };
    let model = Gcn::new(&gcn, dataset.graph(), config.init_seed)?;
    info!(parameters = model.num_parameters(), "model built");

    let optimizer = AdamW::adam(config.learning_rate);
    let mut trainer = Trainer::new(model, &group, optimizer, config)?;
    let report = trainer.fit(&dataset).context("training failed")?;

    if let Some(loss) = report.validation_loss {
        info!(loss, "final validation loss");
    }
    if let Some(path) = &report.checkpoint {
        info!(path = %path.display(), "model saved");
    }

    drop(trainer);
    group.leave();
    Ok(())
}
