//! Stage timing.

use std::time::Instant;

/// Measures how long a patch stage takes and reports it as a tracing event.
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    /// Start a new timer with the given stage name.
    pub fn start(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Finish the timer and emit the elapsed time.
    pub fn finish(self) {
        let secs = self.start.elapsed().as_secs_f64();
        tracing::debug!(stage = self.name, "[{:.1}s] {}", secs, self.name);
    }
}
