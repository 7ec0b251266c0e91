//! A concrete `LatencyHistogram` for timer cells.
//!
//! Out of scope per the contract this crate consumes, but implemented here
//! because verifying monotonic `-count` and exact `-percentile-<P>` values
//! needs a real backing structure to check against.
//! Wraps `hdrhistogram::Histogram<u64>` behind fixed-point microsecond
//! scaling so sub-millisecond timer samples keep useful precision.

use hdrhistogram::Histogram;

use crate::error::MetricsError;

/// Sub-millisecond precision is preserved by recording milliseconds as
/// fixed-point microseconds: `value_ms * SCALE` rounds to the nearest
/// microsecond before handing an integer to `hdrhistogram`.
const SCALE: f64 = 1000.0;

/// The widest latency this histogram can record, in scaled (microsecond)
/// units: one hour.
const MAX_SCALED_VALUE: u64 = 3_600_000 * SCALE as u64;

/// Significant figures of precision retained across the whole value range.
const SIGNIFICANT_FIGURES: u8 = 3;

/// A latency histogram for one timer cell, backed by `hdrhistogram`.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    inner: Histogram<u64>,
}

impl LatencyHistogram {
    /// Creates an empty histogram covering `[0, 1h]` of latency at
    /// [`SIGNIFICANT_FIGURES`] significant figures.
    ///
    /// # Errors
    /// Returns [`MetricsError::HistogramCreation`] if `hdrhistogram` rejects
    /// the bounds (it won't, for the fixed constants above, but construction
    /// is still fallible at the type level).
    pub fn new() -> Result<Self, MetricsError> {
        let inner = Histogram::new_with_bounds(1, MAX_SCALED_VALUE, SIGNIFICANT_FIGURES)?;
        Ok(Self { inner })
    }

    /// Records one sample, given in milliseconds.
    ///
    /// # Errors
    /// Returns [`MetricsError::Histogram`] if the scaled value exceeds this
    /// histogram's configured range.
    pub fn add(&mut self, value_ms: f64) -> Result<(), MetricsError> {
        let scaled = (value_ms * SCALE).round().clamp(1.0, MAX_SCALED_VALUE as f64) as u64;
        self.inner.record(scaled)?;
        Ok(())
    }

    /// Minimum recorded value, in milliseconds. `0.0` if empty.
    #[must_use]
    pub fn min(&self) -> f64 {
        self.inner.min() as f64 / SCALE
    }

    /// Maximum recorded value, in milliseconds. `0.0` if empty.
    #[must_use]
    pub fn max(&self) -> f64 {
        self.inner.max() as f64 / SCALE
    }

    /// Arithmetic mean of recorded values, in milliseconds. `0.0` if empty.
    #[must_use]
    pub fn average(&self) -> f64 {
        self.inner.mean() / SCALE
    }

    /// Sum of recorded values, in milliseconds.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.average() * self.count() as f64
    }

    /// Number of samples recorded since the last [`Self::reset`].
    #[must_use]
    pub fn count(&self) -> u64 {
        self.inner.len()
    }

    /// The value at percentile `p` (`0.0..=100.0`), in milliseconds.
    #[must_use]
    pub fn percentile(&self, p: f64) -> f64 {
        self.inner.value_at_percentile(p) as f64 / SCALE
    }

    /// Clears all recorded samples, ready for the next flush interval.
    pub fn reset(&mut self) {
        self.inner.reset();
    }
}
