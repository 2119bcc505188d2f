// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use criterion::{Criterion, criterion_group, criterion_main};

// Terminated fibers are retained until process exit, so every iteration
// permanently costs one record; keep the per-iteration work coarse enough
// that criterion doesn't need millions of them.
fn spawn_yield_join(c: &mut Criterion) {
    c.bench_function("spawn_yield_join", |b| {
        b.iter(|| {
            weft::spawn("bench", || {
                for _ in 0..10 {
                    weft::yield_now();
                }
            })
            .join();
        });
    });
}

fn yield_heavy_pair(c: &mut Criterion) {
    c.bench_function("yield_heavy_pair", |b| {
        b.iter(|| {
            let turn = Arc::new(AtomicUsize::new(0));
            let handles: Vec<_> = (0..2)
                .map(|side| {
                    let turn = Arc::clone(&turn);
                    weft::spawn("bench", move || {
                        for _ in 0..1_000 {
                            while turn.load(Ordering::Acquire) % 2 != side {
                                weft::yield_now();
                            }
                            turn.fetch_add(1, Ordering::Release);
                        }
                    })
                })
                .collect();
            for handle in &handles {
                handle.join();
            }
        });
    });
}

criterion_group!(benches, spawn_yield_join, yield_heavy_pair);
criterion_main!(benches);
