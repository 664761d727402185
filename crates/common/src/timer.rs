//! Wall-clock timing of operations

use std::future::Future;
use std::time::Instant;

/// Run `f` and return its result with the elapsed time in seconds
pub fn time<T>(f: impl FnOnce() -> T) -> (T, f64) {
    let start = Instant::now();
    let result = f();
    (result, start.elapsed().as_secs_f64())
}

/// Await `fut` and return its output with the elapsed time in seconds
pub async fn timed<F: Future>(fut: F) -> (F::Output, f64) {
    let start = Instant::now();
    let result = fut.await;
    (result, start.elapsed().as_secs_f64())
}
