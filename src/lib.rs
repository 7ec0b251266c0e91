//! # rylv-metrics
//!
//! A StatsD ingestion and aggregation core, paired with a line-protocol UDP
//! shipper, extracted from a larger telemetry agent.
//!
//! ## Components
//!
//! - [`ingest`]: accepts StatsD-format UDP datagrams, parses them into
//!   per-metric updates, maintains an in-memory aggregation table across
//!   counters, timers, gauges, and sets, and periodically flushes summary
//!   measurements to a [`ingest::aggregate::Dispatcher`].
//! - [`shipper`]: batches pre-formatted line-protocol text points into
//!   bounded UDP datagrams and ships them to one or more configured
//!   [`shipper::endpoint::Endpoint`]s, with DNS re-resolution and
//!   reconnection.
//!
//! Rendering measurements into line-protocol text and loading configuration
//! from a file are out of scope for this crate; callers supply a
//! [`ingest::aggregate::Dispatcher`] and a [`shipper::ShipperConfig`] built
//! from their own configuration layer.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rylv_metrics::ingest::{StatsdConfig, StatsdCore};
//! use rylv_metrics::ingest::aggregate::LoggingDispatcher;
//!
//! let config = StatsdConfig {
//!     port: "8125".to_string(),
//!     flush_interval: Duration::from_secs(10),
//!     ..StatsdConfig::default()
//! };
//! let core = StatsdCore::start(config, Arc::new(LoggingDispatcher)).unwrap();
//! // ... run until shutdown is requested by the host process ...
//! core.shutdown();
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![warn(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

mod complain;
pub mod error;
pub mod ingest;
pub mod shipper;

pub use error::MetricsError;

/// Result type for metric operations.
///
/// Wraps errors that can occur during core init/shutdown, config validation,
/// and histogram recording. Per-record parse failures and per-send transient
/// failures never surface here — they are logged and absorbed at the point
/// they occur.
pub type MetricResult<T> = Result<T, MetricsError>;
