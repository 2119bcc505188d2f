//! Two fibers taking turns through explicit yields, joined from the main
//! thread.

use std::sync::{Arc, Mutex};

#[test]
fn yield_round_trip() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let log: Arc<Mutex<Vec<(char, usize)>>> = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = ['a', 'b']
        .into_iter()
        .map(|id| {
            let log = Arc::clone(&log);
            weft::spawn(format!("fiber-{id}"), move || {
                for iteration in 0..3 {
                    log.lock().unwrap().push((id, iteration));
                    weft::yield_now();
                }
            })
        })
        .collect();

    // From the main thread this must return immediately.
    weft::yield_now();

    for handle in &handles {
        handle.join();
        assert!(handle.is_finished());
    }

    let log = log.lock().unwrap();
    for id in ['a', 'b'] {
        let iterations: Vec<_> = log
            .iter()
            .filter(|(fiber, _)| *fiber == id)
            .map(|(_, iteration)| *iteration)
            .collect();
        assert_eq!(iterations, vec![0, 1, 2], "fiber {id} ran out of order");
    }

    // Spawn/join balanced, so nothing may be left alive.
    assert_eq!(weft::live_fibers(), 0);
}
