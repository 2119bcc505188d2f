//! Join from the main thread against fibers that finish before and after
//! the join starts, plus several joiners sharing one target.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[test]
fn fast_and_parked_paths() {
    // These finish almost immediately.
    let quick: Vec<_> = (0..8)
        .map(|i| weft::spawn(format!("quick-{i}"), || {}))
        .collect();

    // Give them time to terminate so the joins below hit the dead-fast-path.
    for handle in &quick {
        while !handle.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }
    }

    // These grind through enough yields that main parks on the condvar.
    let slow: Vec<_> = (0..8)
        .map(|i| {
            weft::spawn(format!("slow-{i}"), || {
                for _ in 0..50_000 {
                    weft::yield_now();
                }
            })
        })
        .collect();

    // Join in either order; both paths must return.
    for handle in quick.iter().chain(slow.iter()) {
        handle.join();
        assert!(handle.is_finished());
    }
}

#[test]
fn join_long_after_death() {
    let handle = weft::spawn("ephemeral", || {});
    handle.join();

    // The record is retained, so a much later join still succeeds.
    thread::sleep(Duration::from_millis(10));
    handle.join();
    assert!(handle.is_finished());
}

#[test]
fn many_joiners_one_target() {
    let woken = Arc::new(AtomicUsize::new(0));

    let gate = weft::spawn("gate", || {
        for _ in 0..10_000 {
            weft::yield_now();
        }
    });

    let joiners: Vec<_> = (0..16)
        .map(|i| {
            let gate = gate.clone();
            let woken = Arc::clone(&woken);
            weft::spawn(format!("joiner-{i}"), move || {
                gate.join();
                assert!(gate.is_finished());
                woken.fetch_add(1, Ordering::Release);
            })
        })
        .collect();

    for joiner in &joiners {
        joiner.join();
    }
    assert_eq!(woken.load(Ordering::Acquire), 16);
}

#[test]
fn handle_is_shareable_across_threads() {
    let fiber = weft::spawn("shared", || {
        for _ in 0..10_000 {
            weft::yield_now();
        }
    });

    let from_thread = {
        let fiber = fiber.clone();
        thread::spawn(move || {
            fiber.join();
            fiber.is_finished()
        })
    };

    fiber.join();
    assert!(from_thread.join().unwrap());
}
