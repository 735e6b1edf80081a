use criterion::{Criterion, criterion_group, criterion_main};
use searchcast_kernels::{cpu_matmul, cpu_transpose};
use std::hint::black_box;

// Shapes taken from the graph convolution stack: 51 regions, wide feature rows.
fn benchmark_matmul(c: &mut Criterion) {
    let mut group = c.benchmark_group("matmul");
    let shapes = [(51, 51, 3244), (51, 3244, 256), (51, 256, 64)];

    for &(m, k, n) in &shapes {
        let lhs = vec![1.0f32; m * k];
        let rhs = vec![0.5f32; k * n];

        group.bench_function(format!("{m}x{k}x{n}"), |b| {
            b.iter(|| cpu_matmul(black_box(&lhs), black_box(&rhs), &[m, k], &[k, n]).unwrap())
        });
    }
    group.finish();
}

fn benchmark_transpose(c: &mut Criterion) {
    let mut group = c.benchmark_group("transpose");
    for &(rows, cols) in &[(51, 3244), (3244, 256)] {
        let data = vec![1.0f32; rows * cols];
        group.bench_function(format!("{rows}x{cols}"), |b| {
            b.iter(|| cpu_transpose(black_box(&data), &[rows, cols]).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_matmul, benchmark_transpose);
criterion_main!(benches);
