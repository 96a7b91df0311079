//! Per-pass wall-clock instrumentation.
//!
//! Mirrors Cranelift's `cranelift_codegen::timing` module, whose call
//! sites (e.g. `let _tt = timing::flowgraph();` in `flowgraph.rs`) start a
//! named timer that reports itself at `debug` level when dropped. We keep
//! the same start-a-guard-and-drop-it shape but without the global
//! aggregate table, since the core compiles one graph per process
//! invocation and a per-run log line is enough for profiling a slow pass.

use log::debug;
use std::time::Instant;

/// An in-flight timer for one named pass. Logs its elapsed time at `debug`
/// when dropped.
pub struct PassTimer {
    name: &'static str,
    start: Instant,
}

impl PassTimer {
    /// Start timing a pass named `name`.
    pub fn start(name: &'static str) -> Self {
        PassTimer {
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for PassTimer {
    fn drop(&mut self) {
        debug!("{} took {:?}", self.name, self.start.elapsed());
    }
}

/// Time the context-discovery pass.
pub fn context_analysis() -> PassTimer {
    PassTimer::start("context_analysis")
}

/// Time the encapsulation & rewiring pass.
pub fn encapsulate() -> PassTimer {
    PassTimer::start("encapsulate")
}

/// Time the state-update synthesis & pruning pass.
pub fn state_update() -> PassTimer {
    PassTimer::start("state_update")
}

/// Time the scheduler (sort half).
pub fn schedule() -> PassTimer {
    PassTimer::start("schedule")
}

/// Time the FIFO insertion pass.
pub fn insert_fifos() -> PassTimer {
    PassTimer::start("insert_fifos")
}
