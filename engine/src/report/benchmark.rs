//! A few utilities to measure how long executing algorithms takes.

use super::*;
use std::sync::atomic::{compiler_fence, Ordering::SeqCst};
use std::time::*;

/// Measure how long it takes to execute the given lambda,
/// log the time, report it as `running_time_ms` and return the result of the lambda.
pub fn report_time<Out, F: FnOnce(&mut Reporter) -> Out>(name: &str, reporter: &mut Reporter, f: F) -> Out {
    report_time_with_key(name, "running_time_ms", reporter, f)
}

/// Measure how long it takes to execute the given lambda,
/// log the time, report it under the given key and return the result of the lambda.
pub fn report_time_with_key<Out, F: FnOnce(&mut Reporter) -> Out>(name: &str, key: &str, reporter: &mut Reporter, f: F) -> Out {
    compiler_fence(SeqCst);
    let start = Instant::now();
    tracing::info!("starting {}", name);
    let res = f(reporter);
    let t_passed = start.elapsed();
    compiler_fence(SeqCst);
    let t_passed = t_passed.as_secs_f64() * 1000.0;
    tracing::info!("{} done - took: {}ms", name, t_passed);
    report!(reporter, key, t_passed);
    res
}

/// A struct to repeatedly measure the time passed since the timer was started
#[derive(Debug)]
pub struct Timer {
    start: Instant,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    /// Create and start a new `Timer`
    pub fn new() -> Timer {
        Timer { start: Instant::now() }
    }

    /// Return the time passed since the timer was started as a Duration
    pub fn get_passed(&self) -> Duration {
        self.start.elapsed()
    }
}
