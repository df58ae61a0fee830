//! Logical timeline for history events.
//!
//! Times are nanoseconds elapsed on a monotonic local clock, shifted by a
//! configurable origin so that histories from several runs can be laid on
//! one axis.

use std::time::Instant;

/// Monotonic clock offset by a start origin.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    /// Local instant corresponding to `origin_ns`.
    started: Instant,
    /// Logical time at `started`.
    origin_ns: i64,
}

impl Clock {
    /// Create a clock whose current reading is `origin_ns`.
    pub fn new(origin_ns: i64) -> Self {
        Clock {
            started: Instant::now(),
            origin_ns,
        }
    }

    /// Current logical time in nanoseconds.
    pub fn now_ns(&self) -> i64 {
        let elapsed = self.started.elapsed().as_nanos();
        let elapsed = i64::try_from(elapsed).unwrap_or(i64::MAX);
        self.origin_ns.saturating_add(elapsed)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(0)
    }
}
