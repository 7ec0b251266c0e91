//! A throughput microbenchmark: send a large number of synthetic StatsD
//! datagrams at a locally bound [`StatsdCore`] and report elapsed time.
//!
//! Drives the parse → aggregate → flush pipeline end to end over real UDP,
//! since this crate's hot path is UDP-in rather than in-process calls.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rylv_metrics::ingest::aggregate::{Dispatcher, Measurement};
use rylv_metrics::ingest::{StatsdConfig, StatsdCore};

struct CountingDispatcher {
    count: AtomicU64,
}

impl Dispatcher for CountingDispatcher {
    fn dispatch(&self, _measurement: Measurement) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

const ITERATIONS: usize = 2_000_000;

fn main() {
    let dispatcher = Arc::new(CountingDispatcher {
        count: AtomicU64::new(0),
    });

    let probe = UdpSocket::bind("127.0.0.1:0").expect("bind probe socket");
    let port = probe.local_addr().expect("probe has local addr").port();
    drop(probe);

    let config = StatsdConfig {
        host: Some("127.0.0.1".to_string()),
        port: port.to_string(),
        flush_interval: Duration::from_millis(200),
        ..StatsdConfig::default()
    };

    let core = StatsdCore::start(config, Arc::clone(&dispatcher) as _).expect("start statsd core");
    let client = UdpSocket::bind("127.0.0.1:0").expect("bind client socket");

    let mut batch = String::new();
    let instant = Instant::now();
    for i in 0..ITERATIONS {
        batch.clear();
        batch.push_str(&format!("metric.{}:1|c\n", i % 64));
        client
            .send_to(batch.as_bytes(), ("127.0.0.1", port))
            .expect("send datagram");
    }
    let elapsed = instant.elapsed();

    std::thread::sleep(Duration::from_millis(400));
    core.shutdown();

    println!(
        "sent {ITERATIONS} datagrams in {elapsed:?} ({:.0} datagrams/sec)",
        ITERATIONS as f64 / elapsed.as_secs_f64()
    );
    println!(
        "dispatcher observed {} measurements",
        dispatcher.count.load(Ordering::Relaxed)
    );
}
