//! A minimal rate-limited "complain" helper.
//!
//! Mirrors collectd's `utils_complain` pattern used around DNS resolution in
//! `write_influxdb_udp.c`: log a failure once, stay quiet on repeats, and
//! announce recovery exactly once when the condition clears.

use std::sync::atomic::{AtomicBool, Ordering};

/// Tracks whether a recurring failure has already been logged.
///
/// `complain` returns `true` the first time it's called after a `release`
/// (or after construction); callers use that to decide whether to emit a
/// `tracing::error!`. `release` resets the latch and, if it was previously
/// tripped, tells the caller to emit a one-time recovery log.
#[derive(Debug, Default)]
pub struct Complaint {
    complained: AtomicBool,
}

impl Complaint {
    /// Creates a fresh, untripped complaint latch.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            complained: AtomicBool::new(false),
        }
    }

    /// Returns `true` the first time this is called since the last
    /// `release`; returns `false` on every repeat so the caller can skip
    /// logging.
    pub fn complain(&self) -> bool {
        !self.complained.swap(true, Ordering::Relaxed)
    }

    /// Clears the latch. Returns `true` if the latch was previously tripped,
    /// meaning a recovery message should be logged.
    pub fn release(&self) -> bool {
        self.complained.swap(false, Ordering::Relaxed)
    }
}
