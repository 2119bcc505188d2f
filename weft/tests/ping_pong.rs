//! Two fibers bouncing a turn counter back and forth with yield as the only
//! synchronization.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn ping_pong(exchanges: usize) {
    let turn = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..2)
        .map(|side| {
            let turn = Arc::clone(&turn);
            weft::spawn(if side == 0 { "ping" } else { "pong" }, move || {
                for _ in 0..exchanges {
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

    assert_eq!(turn.load(Ordering::Acquire), exchanges * 2);
}

#[test]
fn ping_pong_short() {
    ping_pong(100_000);
}

#[test]
#[ignore = "full-size run, minutes in debug builds"]
fn ping_pong_full() {
    ping_pong(5_000_000);
}
