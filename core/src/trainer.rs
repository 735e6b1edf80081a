//! The per-rank training loop.
//!
//! Every rank runs [`Trainer::fit`] with the same [`TrainConfig`] and an
//! identically initialized model. Each epoch, a rank visits only its own
//! partition of the training window, sums per-sample gradients over a batch,
//! averages them across ranks with one all-reduce, and takes an optimizer step.
//! When the loop ends, the coordinator alone writes the checkpoint.

use crate::checkpoint::save_parameters;
use crate::config::TrainConfig;
use crate::data::{DataLoader, Dataset, GraphSample, PartitionSampler, Subset};
use crate::distributed::{DistributedDataParallel, ProcessGroup};
use crate::error::Result;
use crate::loss::l1_loss;
use crate::models::Trainable;
use crate::optim::Optimizer;
use crate::tensor::Tensor;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, info_span};

/// A sample that carries a model input and a `[1, outputs]` regression target.
pub trait Labeled {
    type Input;

    fn input(&self) -> &Self::Input;

    fn target(&self) -> &Tensor<f32, 2>;
}

impl Labeled for GraphSample {
    type Input = Tensor<f32, 2>;

    fn input(&self) -> &Tensor<f32, 2> {
        &self.features
    }

    fn target(&self) -> &Tensor<f32, 2> {
        &self.target
    }
}

/// Running mean of a scalar, weighted by the number of items behind each value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossMeter {
    last: f32,
    sum: f64,
    count: usize,
}

impl LossMeter {
    pub fn update(&mut self, value: f32, n: usize) {
        self.last = value;
        self.sum += f64::from(value) * n as f64;
        self.count += n;
    }

    pub fn last(&self) -> f32 {
        self.last
    }

    /// Zero when nothing has been recorded.
    pub fn mean(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum / self.count as f64) as f32
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub batches: usize,
    /// Mean L1 loss of this rank's samples; not reduced across ranks.
    pub mean_loss: f32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrainReport {
    pub epochs: Vec<EpochSummary>,
    /// Mean L1 loss over the held-out samples, if there were any.
    pub validation_loss: Option<f32>,
    /// Where the checkpoint was written. `Some` on the coordinator only.
    pub checkpoint: Option<PathBuf>,
}

/// Drives one rank of a data-parallel run.
pub struct Trainer<'g, M, O> {
    ddp: DistributedDataParallel<'g, M>,
    optimizer: O,
    config: TrainConfig,
}

impl<'g, M: Trainable, O: Optimizer> Trainer<'g, M, O> {
    /// # Errors
    ///
    /// `Error::Config` or `Error::InvalidRank` if `config` is unusable for this
    /// group.
    pub fn new(model: M, group: &'g ProcessGroup, optimizer: O, config: TrainConfig) -> Result<Self> {
        config.validate(group.world_size())?;
        Ok(Self {
            ddp: DistributedDataParallel::new(model, group),
            optimizer,
            config,
        })
    }

    pub fn model(&self) -> &M {
        self.ddp.module()
    }

    pub fn into_model(self) -> M {
        self.ddp.into_inner()
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Trains on the first `config.train_len` samples of `dataset` and reports
    /// the loss on the rest.
    ///
    /// Collective: every rank in the group must call it with the same config
    /// and a dataset of the same length.
    ///
    /// # Errors
    ///
    /// `Error::ParameterDivergence` if the replicas do not start equal, any
    /// collective failure, `Error::DataAccess` from the store, and
    /// `Error::Checkpoint` or `Error::Io` from the coordinator's save.
    pub fn fit<D, S>(&mut self, dataset: &D) -> Result<TrainReport>
    where
        D: Dataset<S> + ?Sized,
        S: Labeled<Input = M::Input>,
    {
        let group = self.ddp.group();
        let rank = group.rank();
        let world_size = group.world_size();
        let _span = info_span!("fit", rank, world_size).entered();

        let train_len = self.config.train_len.unwrap_or(dataset.len()).min(dataset.len());
        let train = Subset::new::<S>(dataset, 0, train_len);
        let validation = Subset::new::<S>(dataset, train_len, dataset.len());

        self.ddp.verify_parameters_in_sync()?;
        info!(
            train = train.len(),
            validation = validation.len(),
            epochs = self.config.epochs,
            batch_size = self.config.batch_size,
            "training started"
        );

        let mut report = TrainReport::default();
        for epoch in 0..self.config.epochs {
            report.epochs.push(self.run_epoch(&train, epoch)?);
        }

        if !validation.is_empty() {
            let loss = self.evaluate(&validation)?;
            info!(loss, samples = validation.len(), "validation");
            report.validation_loss = Some(loss);
        }

        if self.ddp.group().is_coordinator(self.config.coordinator_rank) {
            let metadata = HashMap::from([
                ("format".to_string(), "searchcast".to_string()),
                ("world_size".to_string(), world_size.to_string()),
                ("epochs".to_string(), self.config.epochs.to_string()),
            ]);
            let path = save_parameters(&self.config.checkpoint_path, &self.ddp.parameters(), metadata)?;
            report.checkpoint = Some(path);
        }
        Ok(report)
    }

    fn run_epoch<D, S>(&mut self, train: &D, epoch: usize) -> Result<EpochSummary>
    where
        D: Dataset<S> + ?Sized,
        S: Labeled<Input = M::Input>,
    {
        let group = self.ddp.group();
        let sampler = PartitionSampler::new(group.rank(), group.world_size(), epoch, self.config.partition)?;
        let loader = DataLoader::new(train, self.config.batch_size).with_sampler(sampler);

        self.ddp.set_training(true);
        let mut meter = LossMeter::default();
        let mut batches = 0;
        for batch in loader.iter() {
            let batch = batch?;
            let loss = self.step(&batch)?;
            meter.update(loss, batch.len());
            batches += 1;
            info!(epoch, batch = batches, loss, "batch");
        }

        info!(epoch, batches, loss = meter.mean(), "epoch finished");
        Ok(EpochSummary {
            epoch,
            batches,
            mean_loss: meter.mean(),
        })
    }

    /// One optimizer step on one batch; returns the batch's mean loss.
    fn step<S: Labeled<Input = M::Input>>(&mut self, batch: &[S]) -> Result<f32> {
        self.ddp.zero_grad();
        let scale = 1.0 / batch.len().max(1) as f32;
        let mut meter = LossMeter::default();
        for sample in batch {
            let output = self.ddp.forward(sample.input())?;
            let (loss, mut grad) = l1_loss(&output, sample.target())?;
            grad.scale_(scale);
            self.ddp.backward_local(&grad)?;
            meter.update(loss, 1);
        }
        self.ddp.sync_gradients()?;
        self.optimizer.step(self.ddp.parameters_mut())?;
        Ok(meter.mean())
    }

    /// Mean L1 loss over `data` with dropout disabled. Local to this rank.
    pub fn evaluate<D, S>(&mut self, data: &D) -> Result<f32>
    where
        D: Dataset<S> + ?Sized,
        S: Labeled<Input = M::Input>,
    {
        self.ddp.set_training(false);
        let mut meter = LossMeter::default();
        for index in 0..data.len() {
            let sample = data.get(index)?;
            let output = self.ddp.forward(sample.input())?;
            let (loss, _) = l1_loss(&output, sample.target())?;
            meter.update(loss, 1);
        }
        self.ddp.set_training(true);
        Ok(meter.mean())
    }
}
