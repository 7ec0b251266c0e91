//! Aggregator — turns parsed records into cell updates, and cells into
//! emitted [`Measurement`]s at flush time.
//!
//! Update rules and flush rules are grounded in collectd's
//! `statsd_handle_counter`/`statsd_handle_gauge`/`statsd_handle_timer`/
//! `statsd_handle_set` and `statsd_read` (`original_source/src/statsd.c`).

use std::time::SystemTime;

use super::histogram::LatencyHistogram;
use super::parser::{MetricKind, ParsedRecord};
use super::store::{Cell, FlushAction, MetricStore};
use crate::complain::Complaint;

/// One emitted measurement, the sole output of a flush.
#[derive(Debug, Clone)]
pub struct Measurement {
    /// Static plugin identity, always `"statsd"` for this crate.
    pub plugin: &'static str,
    /// The collectd-style type name: `"derive"`, `"gauge"`, `"count"`,
    /// `"latency"`, or `"objects"`.
    pub type_: &'static str,
    /// The type-instance, e.g. `"myapp.hits"` or `"myapp.latency-p99"`.
    pub type_instance: String,
    /// The measurement value.
    pub value: f64,
    /// The flush timestamp shared by every measurement in the same flush.
    pub time: SystemTime,
}

/// The sink every emitted [`Measurement`] is handed to. Out of scope per the
/// contract this crate consumes; this trait and its two implementations
/// exist so ingestion is independently testable.
pub trait Dispatcher: Send + Sync {
    /// Accepts one measurement. Must not block the flush loop for long.
    fn dispatch(&self, measurement: Measurement);
}

/// Traces every measurement at `debug`. Useful as a default/no-op sink.
#[derive(Debug, Default)]
pub struct LoggingDispatcher;

impl Dispatcher for LoggingDispatcher {
    fn dispatch(&self, measurement: Measurement) {
        tracing::debug!(
            plugin = measurement.plugin,
            type_ = measurement.type_,
            type_instance = %measurement.type_instance,
            value = measurement.value,
            "dispatching measurement"
        );
    }
}

/// Pushes every measurement onto a channel. Used by tests to assert on
/// exactly what a flush emitted.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    sender: crossbeam::channel::Sender<Measurement>,
}

impl ChannelDispatcher {
    /// Builds a dispatcher paired with the receiver end of its channel.
    #[must_use]
    pub fn new() -> (Self, crossbeam::channel::Receiver<Measurement>) {
        let (sender, receiver) = crossbeam::channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl Dispatcher for ChannelDispatcher {
    fn dispatch(&self, measurement: Measurement) {
        // A disconnected receiver only means the test/caller stopped
        // listening; dropping the measurement is correct, not an error.
        let _ = self.sender.send(measurement);
    }
}

/// Policy controlling whether idle cells (zero updates this interval) are
/// removed from the store at flush time, per kind. Mirrors collectd's
/// `delete_counters`/`delete_timers`/`delete_gauges`/`delete_sets` options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOnIdle {
    /// Delete idle counter cells.
    pub counters: bool,
    /// Delete idle timer cells.
    pub timers: bool,
    /// Delete idle gauge cells.
    pub gauges: bool,
    /// Delete idle set cells.
    pub sets: bool,
}

impl Default for DeleteOnIdle {
    fn default() -> Self {
        // DeleteCounters/DeleteTimers/DeleteGauges/DeleteSets all default to
        // false.
        Self {
            counters: false,
            timers: false,
            gauges: false,
            sets: false,
        }
    }
}

impl DeleteOnIdle {
    fn applies_to(self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => self.counters,
            MetricKind::Timer => self.timers,
            MetricKind::Gauge => self.gauges,
            MetricKind::Set => self.sets,
        }
    }
}

/// Whether counter flushes additionally emit a `"count"` (the raw per-interval
/// delta) and/or a `"gauge"` (the pre-subtraction residual) alongside the
/// always-present `"derive"` total. Mirrors collectd's `counter_sum`/
/// `counter_gauge` StatsD config directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterEmission {
    /// `CounterSum`: also emit the per-interval delta as a `"count"` measurement.
    pub sum: bool,
    /// `CounterGauge`: also emit the residual (as it stood before this
    /// flush's fold) as a `"gauge"` measurement. Does not otherwise change
    /// how the residual carries forward — it is still reduced by `delta`
    /// exactly as in the non-`CounterGauge` path.
    pub gauge: bool,
}

/// Applies one parsed record to the store.
///
/// # Errors
/// Returns an error only if creating a new timer cell's histogram fails
/// (effectively infallible for the fixed bounds used here) or recording a
/// sample into it fails (the value is outside the histogram's range).
pub fn apply_record(store: &MetricStore, record: &ParsedRecord<'_>) -> Result<(), crate::error::MetricsError> {
    match record.kind {
        MetricKind::Counter => {
            store.update(MetricKind::Counter, record.name, |cell| {
                if let Cell::Counter {
                    residual, updates, ..
                } = cell
                {
                    *residual += record.value / record.sample_rate;
                    *updates += 1;
                }
            });
            Ok(())
        }
        MetricKind::Timer => {
            let mut histogram_err = None;
            store.update(MetricKind::Timer, record.name, |cell| {
                if let Cell::Timer { latency, updates } = cell {
                    let histogram = match latency {
                        Some(h) => h,
                        None => {
                            match LatencyHistogram::new() {
                                Ok(h) => latency.insert(h),
                                Err(e) => {
                                    histogram_err = Some(e);
                                    return;
                                }
                            }
                        }
                    };
                    if let Err(e) = histogram.add(record.value / record.sample_rate) {
                        histogram_err = Some(e);
                    }
                    *updates += 1;
                }
            });
            match histogram_err {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
        MetricKind::Gauge => {
            store.update(MetricKind::Gauge, record.name, |cell| {
                if let Cell::Gauge { value, updates } = cell {
                    if record.is_delta {
                        *value += record.value;
                    } else {
                        *value = record.value;
                    }
                    *updates += 1;
                }
            });
            Ok(())
        }
        MetricKind::Set => {
            store.update(MetricKind::Set, record.name, |cell| {
                if let Cell::Set { members, updates } = cell {
                    members
                        .get_or_insert_with(Default::default)
                        .insert(record.raw_value.into());
                    *updates += 1;
                }
            });
            Ok(())
        }
    }
}

/// Which of the optional timer summaries are emitted, beyond the always-on
/// `-average`. Mirrors collectd's `TimerLower`/`TimerUpper`/`TimerSum`/
/// `TimerCount` StatsD config directives, all defaulting to false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerEmission<'a> {
    /// `TimerLower`: also emit `-lower`.
    pub lower: bool,
    /// `TimerUpper`: also emit `-upper`.
    pub upper: bool,
    /// `TimerSum`: also emit `-sum`.
    pub sum: bool,
    /// `TimerCount`: also emit `-count`.
    pub count: bool,
    /// `TimerPercentile`: additional `-percentile-<P>` outputs, one per value.
    pub percentiles: &'a [f64],
}

/// Flushes every cell in `store`, dispatching [`Measurement`]s to `sink` and
/// deleting idle cells per `delete_policy`. All measurements from this call
/// share `now` as their timestamp: one timestamp per flush interval, not
/// per cell.
pub fn flush(
    store: &MetricStore,
    sink: &dyn Dispatcher,
    delete_policy: DeleteOnIdle,
    counter_emission: CounterEmission,
    timer_emission: TimerEmission<'_>,
    now: SystemTime,
) {
    store.drain_for_flush(|key, cell| {
        let name = key.name().to_string();
        match cell {
            Cell::Counter {
                residual,
                total,
                updates,
            } => {
                flush_counter(&name, residual, total, sink, counter_emission, now);
                let idle = *updates == 0;
                *updates = 0;
                if idle && delete_policy.applies_to(MetricKind::Counter) {
                    return FlushAction::Delete;
                }
            }
            Cell::Timer { latency, updates } => {
                flush_timer(&name, latency.as_ref(), timer_emission, sink, now);
                if let Some(h) = latency {
                    h.reset();
                }
                let idle = *updates == 0;
                *updates = 0;
                if idle && delete_policy.applies_to(MetricKind::Timer) {
                    return FlushAction::Delete;
                }
            }
            Cell::Gauge { value, updates } => {
                sink.dispatch(Measurement {
                    plugin: "statsd",
                    type_: "gauge",
                    type_instance: name,
                    value: *value,
                    time: now,
                });
                let idle = *updates == 0;
                *updates = 0;
                if idle && delete_policy.applies_to(MetricKind::Gauge) {
                    return FlushAction::Delete;
                }
            }
            Cell::Set { members, updates } => {
                let count = members.as_ref().map_or(0, std::collections::BTreeSet::len);
                sink.dispatch(Measurement {
                    plugin: "statsd",
                    type_: "objects",
                    type_instance: name,
                    value: count as f64,
                    time: now,
                });
                *members = None;
                let idle = *updates == 0;
                *updates = 0;
                if idle && delete_policy.applies_to(MetricKind::Set) {
                    return FlushAction::Delete;
                }
            }
        }
        FlushAction::Keep
    });
}

fn flush_counter(
    name: &str,
    residual: &mut f64,
    total: &mut i64,
    sink: &dyn Dispatcher,
    emission: CounterEmission,
    now: SystemTime,
) {
    // Mirrors original_source's statsd_metric_submit_unsafe: `delta` is the
    // rounded residual, folded into `total` once; `count` (if enabled)
    // reports that same delta, and `gauge` (if enabled) reports the residual
    // as it stood before the fold. The residual itself always carries its
    // rounding remainder forward, gauge emission or not.
    let delta = residual.round_ties_even();
    *total += delta as i64;

    sink.dispatch(Measurement {
        plugin: "statsd",
        type_: "derive",
        type_instance: name.to_string(),
        value: *total as f64,
        time: now,
    });
    if emission.sum {
        sink.dispatch(Measurement {
            plugin: "statsd",
            type_: "count",
            type_instance: name.to_string(),
            value: delta,
            time: now,
        });
    }
    if emission.gauge {
        sink.dispatch(Measurement {
            plugin: "statsd",
            type_: "gauge",
            type_instance: name.to_string(),
            value: *residual,
            time: now,
        });
    }
    *residual -= delta;
}

fn flush_timer(
    name: &str,
    latency: Option<&LatencyHistogram>,
    emission: TimerEmission<'_>,
    sink: &dyn Dispatcher,
    now: SystemTime,
) {
    let count = latency.map_or(0, LatencyHistogram::count);
    let have_samples = count > 0;
    let stat = |f: fn(&LatencyHistogram) -> f64| {
        latency
            .filter(|_| have_samples)
            .map_or(f64::NAN, f)
    };
    let emit = |sink: &dyn Dispatcher, type_: &'static str, suffix: &str, value: f64| {
        sink.dispatch(Measurement {
            plugin: "statsd",
            type_,
            type_instance: format!("{name}{suffix}"),
            value,
            time: now,
        });
    };

    // "-average" is always emitted; the rest are conditional on their
    // StatsD config directive (collectd's
    // TimerLower/TimerUpper/TimerSum/TimerCount). All of these carry
    // type = "latency"; only "-count" below switches to "gauge".
    emit(sink, "latency", "-average", stat(LatencyHistogram::average));
    if emission.lower {
        emit(sink, "latency", "-lower", stat(LatencyHistogram::min));
    }
    if emission.upper {
        emit(sink, "latency", "-upper", stat(LatencyHistogram::max));
    }
    if emission.sum {
        emit(sink, "latency", "-sum", stat(LatencyHistogram::sum));
    }
    for &p in emission.percentiles {
        let value = latency.filter(|_| have_samples).map_or(f64::NAN, |h| h.percentile(p));
        // The percentile suffix uses integer rendering of the percentile
        // value (e.g. 95, not 95.0).
        #[allow(clippy::cast_possible_truncation)]
        let suffix = p.trunc() as i64;
        emit(sink, "latency", &format!("-percentile-{suffix}"), value);
    }
    // Kept last, like `statsd_metric_submit_unsafe`: `-count` is always a
    // numeric value (zero when idle), never NaN, regardless of the other
    // flags' state, and reports as type "gauge" rather than "latency".
    if emission.count {
        emit(sink, "gauge", "-count", count as f64);
    }
}

/// Rate-limited logger for store-level recurring failures (grounded in the
/// same `Complaint` latch used by `shipper::endpoint`).
#[derive(Debug, Default)]
pub struct AggregateComplaints {
    histogram_errors: Complaint,
}

impl AggregateComplaints {
    /// A fresh, untripped set of latches.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            histogram_errors: Complaint::new(),
        }
    }

    /// Logs a histogram failure once per failure streak.
    pub fn histogram_error(&self, name: &str, err: &crate::error::MetricsError) {
        if self.histogram_errors.complain() {
            tracing::error!(metric = name, error = %err, "failed to record timer sample");
        }
    }

    /// Clears the histogram-error latch after a success.
    pub fn histogram_recovered(&self) {
        self.histogram_errors.release();
    }
}
