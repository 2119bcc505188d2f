// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use weft_fiber::Fiber;
use weft_fiber::stack::GuardedStack;

fn fiber_switch(c: &mut Criterion) {
    let stack = GuardedStack::default();
    let mut identity = Fiber::<usize, usize, (), _>::with_stack(stack, |mut input, suspend| {
        loop {
            input = suspend.suspend(input);
        }
    });

    c.bench_function("fiber_switch", |b| {
        b.iter(|| identity.resume(black_box(0usize)));
    });

    // The identity fiber never returns; reset it so the Drop assertion
    // doesn't fire. Nothing on its stack needs drop code.
    unsafe {
        identity.force_reset();
    }
}

fn fiber_call(c: &mut Criterion) {
    // Don't count time spent allocating a stack.
    let mut stack = GuardedStack::default();

    c.bench_function("fiber_call", move |b| {
        b.iter(|| {
            let mut identity =
                Fiber::<usize, (), usize, _>::with_stack(&mut stack, |input, _suspend| input);
            identity.resume(black_box(0usize))
        });
    });
}

criterion_group!(benches, fiber_switch, fiber_call);
criterion_main!(benches);
