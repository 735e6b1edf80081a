use crossbeam::channel::unbounded;
use searchcast::distributed::{CollectiveBackend, CpuBackend, ProcessGroup};
use searchcast::Error;
use std::thread;

#[test]
fn test_ring_all_reduce_cpu() {
    let world_size = 4;
    let backends = CpuBackend::ring(world_size).unwrap();

    let handles: Vec<_> = backends
        .into_iter()
        .map(|backend| {
            thread::spawn(move || {
                // Rank 0 has 1s, rank 1 has 2s, ...; the sum is 1+2+3+4 = 10.
                let rank = backend.rank();
                let mut data = vec![(rank + 1) as f32; 8];
                backend.all_reduce_sum(&mut data).unwrap();
                for &val in &data {
                    assert!((val - 10.0).abs() < 1e-5, "Rank {}: expected 10, got {}", rank, val);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_gradient_mean_two_ranks() {
    let backends = CpuBackend::ring(2).unwrap();
    let inputs = [vec![2.0f32, 4.0], vec![0.0f32, 0.0]];

    let handles: Vec<_> = backends
        .into_iter()
        .zip(inputs)
        .map(|(backend, mut grads)| {
            thread::spawn(move || {
                let group = ProcessGroup::from_backend(backend);
                group.all_reduce_mean(&mut grads).unwrap();
                group.leave();
                grads
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), vec![1.0, 2.0]);
    }
}

#[test]
fn test_results_are_bit_identical_across_ranks() {
    // Values chosen so that summation order would change the low bits.
    let world_size = 3;
    let backends = CpuBackend::ring(world_size).unwrap();

    let handles: Vec<_> = backends
        .into_iter()
        .map(|backend| {
            thread::spawn(move || {
                let r = backend.rank() as f32;
                let mut data: Vec<f32> = (0..17).map(|i| 0.1 * (i as f32 + 1.0) / (r + 3.0)).collect();
                backend.all_reduce_sum(&mut data).unwrap();
                data.iter().map(|v| v.to_bits()).collect::<Vec<u32>>()
            })
        })
        .collect();

    let results: Vec<Vec<u32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn test_barrier_releases_every_rank() {
    let backends = CpuBackend::ring(3).unwrap();
    let handles: Vec<_> = backends
        .into_iter()
        .map(|backend| thread::spawn(move || ProcessGroup::from_backend(backend).barrier()))
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }
}

#[test]
fn test_cpu_backend_properties() {
    let (tx, rx) = unbounded();
    let backend = CpuBackend::new(2, 4, rx, tx);
    assert_eq!(backend.rank(), 2);
    assert_eq!(backend.world_size(), 4);
}

#[test]
fn test_departed_peer_fails_the_collective() {
    let mut backends = CpuBackend::ring(2).unwrap();
    let survivor = backends.remove(0);
    drop(backends);

    let mut data = vec![1.0f32; 4];
    let err = survivor.all_reduce_sum(&mut data).unwrap_err();
    assert!(matches!(err, Error::CollectiveStall { .. }));
}
