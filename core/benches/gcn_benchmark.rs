use criterion::{Criterion, criterion_group, criterion_main};
use searchcast::data::synthetic::{self, SyntheticConfig};
use searchcast::data::{Dataset, GraphDataset};
use searchcast::loss::l1_loss;
use searchcast::models::{Gcn, GcnConfig, Trainable};
use std::hint::black_box;

fn benchmark_gcn_step(c: &mut Criterion) {
    let data = synthetic::generate(&SyntheticConfig {
        num_samples: 2,
        ..SyntheticConfig::default()
    })
    .unwrap();
    let sample = data.get(0).unwrap();
    let config = GcnConfig {
        in_features: data.num_features(),
        hidden: vec![256, 64, 10],
        ..GcnConfig::default()
    };
    let mut model = Gcn::new(&config, data.graph(), 42).unwrap();

    let mut group = c.benchmark_group("gcn");
    group.sample_size(10);
    group.bench_function("forward", |b| {
        b.iter(|| black_box(model.forward(&sample.features).unwrap()))
    });
    group.bench_function("forward_backward", |b| {
        b.iter(|| {
            model.zero_grad();
            let y = model.forward(&sample.features).unwrap();
            let (_, grad) = l1_loss(&y, &sample.target).unwrap();
            model.backward(&grad).unwrap();
        })
    });
    group.finish();
}

criterion_group!(benches, benchmark_gcn_step);
criterion_main!(benches);
