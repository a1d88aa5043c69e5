//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use stepgraph::ExecutionContext;
use std::time::{Duration, Instant};

/// Upper bound for anything a test waits on
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Run `f` once per rank of a `size`-rank world, each on its own thread
/// with a sibling context, and collect the results in rank order.
pub fn run_on_ranks<T, F>(size: u32, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(ExecutionContext) -> T + Sync,
{
    let root = ExecutionContext::with_world(size).expect("valid world size");
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..size)
            .map(|rank| {
                let ctx = root.with_rank(rank).expect("rank in range");
                let f = &f;
                scope.spawn(move || f(ctx))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

/// Poll `condition` until it holds or the test timeout expires.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}
