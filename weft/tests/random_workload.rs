//! Many fibers, each grinding through a randomly sized deterministic
//! checksum while yielding periodically.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

/// xorshift-style accumulator; the fiber and the verifier must agree.
fn checksum(seed: u64, rounds: usize) -> u64 {
    let mut acc = seed | 1;
    for _ in 0..rounds {
        acc ^= acc << 13;
        acc ^= acc >> 7;
        acc ^= acc << 17;
    }
    acc
}

fn random_workload(fibers: usize, max_rounds: usize) {
    let mut rng = rand::rng();

    let results: Arc<Vec<AtomicUsize>> =
        Arc::new((0..fibers).map(|_| AtomicUsize::new(0)).collect());

    let jobs: Vec<(u64, usize)> = (0..fibers)
        .map(|i| (i as u64 + 1, rng.random_range(1_000..=max_rounds)))
        .collect();

    let handles: Vec<_> = jobs
        .iter()
        .enumerate()
        .map(|(i, &(seed, rounds))| {
            let results = Arc::clone(&results);
            weft::spawn(format!("crunch-{i}"), move || {
                let mut acc = seed | 1;
                for round in 0..rounds {
                    acc ^= acc << 13;
                    acc ^= acc >> 7;
                    acc ^= acc << 17;
                    if round % 1_000 == 999 {
                        weft::yield_now();
                    }
                }
                results[i].store(acc as usize, Ordering::Release);
            })
        })
        .collect();

    for handle in &handles {
        handle.join();
        assert!(handle.is_finished());
    }

    for (i, &(seed, rounds)) in jobs.iter().enumerate() {
        assert_eq!(
            results[i].load(Ordering::Acquire),
            checksum(seed, rounds) as usize,
            "fiber {i} produced a wrong checksum"
        );
    }
}

#[test]
fn random_workload_scaled() {
    random_workload(500, 5_000);
}

#[test]
#[ignore = "full-size run, slow in debug builds"]
fn random_workload_full() {
    random_workload(10_000, 500_000);
}
