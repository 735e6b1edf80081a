//! Data-parallel gradient synchronization.
//!
//! Every rank holds a full replica of the model and runs forward/backward on its
//! own shard of the data. [`DistributedDataParallel`] adds one step after the
//! local backward pass: all parameter gradients are flattened into one buffer,
//! averaged across ranks with a single all-reduce, and written back.
//!
//! Replicas stay identical because they start identical (same `init_seed` on
//! every rank) and then apply the same averaged gradient with the same
//! deterministic optimizer. Nothing is broadcast.
//!
//! There is no liveness detection: a rank that stops calling collectives stalls
//! its peers at their next `sync_gradients`. A rank whose process exits closes
//! its links, and its neighbours fail with `Error::CollectiveStall`.

use super::ProcessGroup;
use crate::error::{Error, Result};
use crate::models::{Parameter, Trainable, flatten_grads, unflatten_grads};
use crate::tensor::Tensor;
use tracing::{debug, warn};

/// Wraps a model so that `backward` leaves the cross-rank mean gradient behind.
pub struct DistributedDataParallel<'g, M> {
    module: M,
    group: &'g ProcessGroup,
}

impl<'g, M: Trainable> DistributedDataParallel<'g, M> {
    pub fn new(module: M, group: &'g ProcessGroup) -> Self {
        Self { module, group }
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut M {
        &mut self.module
    }

    pub fn into_inner(self) -> M {
        self.module
    }

    pub fn group(&self) -> &'g ProcessGroup {
        self.group
    }

    pub fn forward(&mut self, input: &M::Input) -> Result<Tensor<f32, 2>> {
        self.module.forward(input)
    }

    pub fn zero_grad(&mut self) {
        self.module.zero_grad();
    }

    /// Local backward followed by gradient averaging. Blocks until every rank
    /// has contributed.
    pub fn backward(&mut self, grad_output: &Tensor<f32, 2>) -> Result<()> {
        self.module.backward(grad_output)?;
        self.sync_gradients()
    }

    /// Local backward only. Use it to accumulate several samples of a batch, then
    /// call [`Self::sync_gradients`] once.
    pub fn backward_local(&mut self, grad_output: &Tensor<f32, 2>) -> Result<()> {
        self.module.backward(grad_output)
    }

    /// Replaces every local gradient with its mean across ranks.
    pub fn sync_gradients(&mut self) -> Result<()> {
        let mut flat = flatten_grads(&self.module.parameters());
        self.group.all_reduce_mean(&mut flat)?;
        unflatten_grads(&mut self.module.parameters_mut(), &flat)?;
        debug!(rank = self.group.rank(), values = flat.len(), "gradients averaged");
        Ok(())
    }

    /// Checks that every rank holds the same parameter values.
    ///
    /// Each rank writes its parameter checksum into its own slot of a
    /// `world_size` buffer; one sum gathers every checksum on every rank. If the
    /// spread between them exceeds a relative `1e-6`, all ranks return
    /// `Error::ParameterDivergence`. Every rank must call it at the same point.
    pub fn verify_parameters_in_sync(&self) -> Result<()> {
        let rank = self.group.rank();
        let mut checksums = vec![0.0f32; self.group.world_size()];
        checksums[rank] = parameter_checksum(&self.module.parameters()) as f32;
        self.group.all_reduce_sum(&mut checksums)?;

        let (lo, hi) = checksums
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &c| (lo.min(c), hi.max(c)));
        let (lo, hi) = (f64::from(lo), f64::from(hi));
        let tolerance = 1e-6 * lo.abs().max(hi.abs()).max(1.0);
        if hi - lo > tolerance || checksums.iter().any(|c| c.is_nan()) {
            let local = f64::from(checksums[rank]);
            let mean = checksums.iter().map(|&c| f64::from(c)).sum::<f64>() / checksums.len() as f64;
            warn!(rank, local, mean, ?checksums, "parameters out of sync");
            return Err(Error::ParameterDivergence { local, mean });
        }
        Ok(())
    }

    pub fn parameters(&self) -> Vec<&Parameter> {
        self.module.parameters()
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.module.parameters_mut()
    }

    pub fn set_training(&mut self, training: bool) {
        self.module.set_training(training);
    }
}

/// Position-weighted sum over all parameter values, in `f64`.
///
/// Weights make a permutation of values, not just a change of values, visible.
pub fn parameter_checksum(params: &[&Parameter]) -> f64 {
    let mut sum = 0.0f64;
    let mut position = 0usize;
    for p in params {
        for &v in p.value.data() {
            position += 1;
            sum += f64::from(v) * (1.0 + (position % 97) as f64 / 97.0);
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::CpuBackend;
    use std::thread;

    /// `y = x * w`, with `w` of shape `[1, 2]` and a `[1, 1]` input.
    struct Scale {
        w: Parameter,
        last_x: f32,
    }

    impl Scale {
        fn new(w: Vec<f32>) -> Self {
            Self {
                w: Parameter::new("w", Tensor::new(w, [1, 2]).unwrap()),
                last_x: 0.0,
            }
        }
    }

    impl Trainable for Scale {
        type Input = f32;

        fn forward(&mut self, x: &f32) -> Result<Tensor<f32, 2>> {
            self.last_x = *x;
            Ok(self.w.value.map(|w| w * *x))
        }

        fn backward(&mut self, grad_output: &Tensor<f32, 2>) -> Result<()> {
            let x = self.last_x;
            let dw = grad_output.map(|g| g * x);
            self.w.accumulate_grad(&dw)
        }

        fn parameters(&self) -> Vec<&Parameter> {
            vec![&self.w]
        }

        fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
            vec![&mut self.w]
        }
    }

    #[test]
    fn test_solo_backward_keeps_local_gradient() {
        let pg = ProcessGroup::solo();
        let mut ddp = DistributedDataParallel::new(Scale::new(vec![1.0, 1.0]), &pg);
        ddp.forward(&2.0).unwrap();
        ddp.backward(&Tensor::new(vec![1.0, 3.0], [1, 2]).unwrap()).unwrap();
        assert_eq!(ddp.parameters()[0].grad.data(), &[2.0, 6.0]);
        ddp.verify_parameters_in_sync().unwrap();
    }

    #[test]
    fn test_gradients_averaged_across_ranks() {
        let handles: Vec<_> = CpuBackend::ring(2)
            .unwrap()
            .into_iter()
            .map(|backend| {
                thread::spawn(move || {
                    let pg = ProcessGroup::from_backend(backend);
                    let mut ddp = DistributedDataParallel::new(Scale::new(vec![1.0, 1.0]), &pg);
                    // Rank 0 sees x = 2 -> grad [2, 4]; rank 1 sees x = 0 -> grad [0, 0].
                    let x = if pg.rank() == 0 { 2.0 } else { 0.0 };
                    ddp.zero_grad();
                    ddp.forward(&x).unwrap();
                    ddp.backward(&Tensor::new(vec![1.0, 2.0], [1, 2]).unwrap()).unwrap();
                    ddp.parameters()[0].grad.data().to_vec()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), vec![1.0, 2.0]);
        }
    }

    #[test]
    fn test_divergent_parameters_detected() {
        let handles: Vec<_> = CpuBackend::ring(2)
            .unwrap()
            .into_iter()
            .map(|backend| {
                thread::spawn(move || {
                    let pg = ProcessGroup::from_backend(backend);
                    let w = if pg.rank() == 0 { vec![1.0, 2.0] } else { vec![1.0, 5.0] };
                    let ddp = DistributedDataParallel::new(Scale::new(w), &pg);
                    ddp.verify_parameters_in_sync()
                })
            })
            .collect();
        for h in handles {
            assert!(matches!(h.join().unwrap(), Err(Error::ParameterDivergence { .. })));
        }
    }

    #[test]
    fn test_divergence_verdict_is_shared_by_all_ranks() {
        // Rank 1's checksum equals the mean of all three; it must still fail.
        let handles: Vec<_> = CpuBackend::ring(3)
            .unwrap()
            .into_iter()
            .map(|backend| {
                thread::spawn(move || {
                    let pg = ProcessGroup::from_backend(backend);
                    let w = vec![(pg.rank() + 1) as f32, 0.0];
                    let ddp = DistributedDataParallel::new(Scale::new(w), &pg);
                    ddp.verify_parameters_in_sync()
                })
            })
            .collect();
        for h in handles {
            assert!(matches!(h.join().unwrap(), Err(Error::ParameterDivergence { .. })));
        }
    }

    #[test]
    fn test_checksum_sees_permutations() {
        let a = Parameter::new("w", Tensor::new(vec![1.0, 2.0], [1, 2]).unwrap());
        let b = Parameter::new("w", Tensor::new(vec![2.0, 1.0], [1, 2]).unwrap());
        assert_ne!(parameter_checksum(&[&a]), parameter_checksum(&[&b]));
    }
}
