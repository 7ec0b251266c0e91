//! The StatsD ingestion core: the line parser through the UDP listener,
//! wired together behind one [`StatsdConfig`] and a [`StatsdCore`] handle.
//!
//! Grounded in `statsd_config`/`statsd_init`/`statsd_shutdown`
//! (`original_source/src/statsd.c`) for the configuration surface and
//! start/stop lifecycle, and in `initialize_job`'s
//! `crossbeam::channel::tick` + `select!` periodic-flush pattern.

pub mod aggregate;
pub mod histogram;
pub mod listener;
pub mod parser;
pub mod store;

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crossbeam::channel::{bounded, select, tick, Receiver, Sender};

use self::aggregate::{CounterEmission, DeleteOnIdle, Dispatcher, TimerEmission};
use self::listener::ListenerHandle;
use self::store::MetricStore;
use crate::error::MetricsError;

/// Configuration for one StatsD ingestion core. Field names and defaults
/// mirror collectd's `statsd` plugin directives (`original_source/src/statsd.c`,
/// `statsd_config`).
#[derive(Debug, Clone)]
pub struct StatsdConfig {
    /// Interface/address to bind. `None` binds the wildcard address, as
    /// collectd does when `Host` is unset.
    pub host: Option<String>,
    /// Port to bind, as a service name or numeric string.
    pub port: String,
    /// How often the flush loop drains the store and emits measurements.
    pub flush_interval: Duration,
    /// `DeleteCounters`/`DeleteTimers`/`DeleteGauges`/`DeleteSets`.
    pub delete_on_idle: DeleteOnIdle,
    /// `CounterSum`/`CounterGauge`.
    pub counter_emission: CounterEmission,
    /// `TimerLower`/`TimerUpper`/`TimerSum`/`TimerCount`.
    pub timer_lower: bool,
    pub timer_upper: bool,
    pub timer_sum: bool,
    pub timer_count: bool,
    /// `TimerPercentile`, repeatable.
    pub timer_percentiles: Vec<f64>,
}

impl Default for StatsdConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: listener::DEFAULT_PORT.to_string(),
            flush_interval: Duration::from_secs(10),
            delete_on_idle: DeleteOnIdle::default(),
            counter_emission: CounterEmission::default(),
            timer_lower: false,
            timer_upper: false,
            timer_sum: false,
            timer_count: false,
            timer_percentiles: Vec::new(),
        }
    }
}

impl StatsdConfig {
    fn timer_emission(&self) -> TimerEmission<'_> {
        TimerEmission {
            lower: self.timer_lower,
            upper: self.timer_upper,
            sum: self.timer_sum,
            count: self.timer_count,
            percentiles: &self.timer_percentiles,
        }
    }
}

/// Binds the configured listener(s), spawns the dedicated reader thread, and
/// drives a periodic flush loop on the calling thread until [`StatsdCore::shutdown`]
/// is called from another thread (or the handle is dropped).
pub struct StatsdCore {
    listener: Option<ListenerHandle>,
    flush_shutdown: Sender<()>,
    flush_thread: Option<std::thread::JoinHandle<()>>,
    store: Arc<MetricStore>,
}

impl StatsdCore {
    /// Binds the configured socket(s) and starts the listener and flush
    /// threads. `sink` receives every measurement the flush loop emits.
    ///
    /// # Errors
    /// Returns an error if no listening socket could be bound.
    pub fn start(
        config: StatsdConfig,
        sink: Arc<dyn Dispatcher>,
    ) -> Result<Self, MetricsError> {
        let host = config.host.clone().unwrap_or_else(|| "0.0.0.0".to_string());
        let sockets: Vec<UdpSocket> = listener::bind_all(&host, &config.port)?;

        let store = Arc::new(MetricStore::new());
        let listener = ListenerHandle::spawn(sockets, Arc::clone(&store))?;

        let (flush_shutdown, shutdown_rx): (Sender<()>, Receiver<()>) = bounded(0);
        let flush_store = Arc::clone(&store);
        let flush_thread = std::thread::Builder::new()
            .name("statsd-flush".into())
            .spawn(move || run_flush_loop(&config, &flush_store, sink.as_ref(), &shutdown_rx))?;

        Ok(Self {
            listener: Some(listener),
            flush_shutdown,
            flush_thread: Some(flush_thread),
            store,
        })
    }

    /// The shared aggregation store, exposed for tests that want to observe
    /// cell state directly rather than waiting on a flush tick.
    #[must_use]
    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    /// Stops the flush loop and the listener thread, in that order.
    ///
    /// # Panics
    /// Panics if either thread itself panicked.
    pub fn shutdown(mut self) {
        let _ = self.flush_shutdown.send(());
        if let Some(handle) = self.flush_thread.take() {
            let _ = handle.join();
        }
        if let Some(listener) = self.listener.take() {
            listener.shutdown();
        }
    }
}

fn run_flush_loop(
    config: &StatsdConfig,
    store: &MetricStore,
    sink: &dyn Dispatcher,
    shutdown: &Receiver<()>,
) {
    let ticker = tick(config.flush_interval);
    loop {
        select! {
            recv(ticker) -> _ => {
                aggregate::flush(
                    store,
                    sink,
                    config.delete_on_idle,
                    config.counter_emission,
                    config.timer_emission(),
                    SystemTime::now(),
                );
            }
            recv(shutdown) -> _ => {
                // Final flush so nothing accumulated since the last tick is lost.
                aggregate::flush(
                    store,
                    sink,
                    config.delete_on_idle,
                    config.counter_emission,
                    config.timer_emission(),
                    SystemTime::now(),
                );
                return;
            }
        }
    }
}
