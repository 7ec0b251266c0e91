use hdrhistogram::errors::{CreationError, RecordError};
use rustix::io::Errno;
use thiserror::Error;

/// Errors that can occur during ingestion core or shipper core init/shutdown.
///
/// Per-record parse failures and per-send transient failures are logged and
/// absorbed at the point they occur; they never surface as a `MetricsError`.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// A custom error with a free-form message.
    #[error("Custom error: {0}")]
    Custom(String),

    /// An I/O error from the standard library.
    #[error("Std Io error: {0}")]
    StdIo(#[from] std::io::Error),

    /// A low-level system errno.
    #[error("Errno error: {0}")]
    Errno(#[from] Errno),

    /// Failed to record a value into a latency histogram.
    #[error("Histogram record error: {0}")]
    Histogram(#[from] RecordError),

    /// Failed to create a latency histogram.
    #[error("Histogram creation error: {0}")]
    HistogramCreation(#[from] CreationError),

    /// A configuration directive was out of its valid range.
    #[error("Config error: {0}")]
    Config(String),
}

impl From<String> for MetricsError {
    fn from(value: String) -> Self {
        Self::Custom(value)
    }
}

impl From<&str> for MetricsError {
    fn from(value: &str) -> Self {
        Self::Custom(value.to_string())
    }
}
