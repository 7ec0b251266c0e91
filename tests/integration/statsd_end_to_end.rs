//! Black-box tests of [`StatsdCore`]: bind a real loopback socket, send raw
//! StatsD datagrams with a plain [`UdpSocket`] client, and assert on what the
//! flush loop dispatches.

use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use rylv_metrics::ingest::aggregate::{ChannelDispatcher, CounterEmission, DeleteOnIdle};
use rylv_metrics::ingest::{StatsdConfig, StatsdCore};

/// Starts a core bound to an ephemeral loopback port and returns it with the
/// port and the receiving end of a [`ChannelDispatcher`].
fn start_core(
    config_overrides: impl FnOnce(StatsdConfig) -> StatsdConfig,
) -> (StatsdCore, u16, crossbeam::channel::Receiver<rylv_metrics::ingest::aggregate::Measurement>) {
    let probe = UdpSocket::bind("127.0.0.1:0").expect("bind probe");
    let port = probe.local_addr().expect("local addr").port();
    drop(probe);

    let config = config_overrides(StatsdConfig {
        host: Some("127.0.0.1".to_string()),
        port: port.to_string(),
        flush_interval: Duration::from_millis(50),
        ..StatsdConfig::default()
    });

    let (dispatcher, receiver) = ChannelDispatcher::new();
    let core = StatsdCore::start(config, Arc::new(dispatcher)).expect("core starts");
    (core, port, receiver)
}

fn send(port: u16, payload: &str) {
    let client = UdpSocket::bind("127.0.0.1:0").expect("bind client");
    client
        .send_to(payload.as_bytes(), ("127.0.0.1", port))
        .expect("send datagram");
}

/// Drains every measurement available within `timeout` of the *first*
/// arrival, keyed by `(type_, type_instance)` since a counter flush emits up
/// to three measurements (`derive`/`count`/`gauge`) sharing the same
/// `type_instance`. Stops as soon as a single flush tick's worth of
/// measurements has gone quiet, rather than waiting out the full timeout.
fn drain(
    receiver: &crossbeam::channel::Receiver<rylv_metrics::ingest::aggregate::Measurement>,
    timeout: Duration,
) -> HashMap<(&'static str, String), f64> {
    let mut out = HashMap::new();
    let first = receiver
        .recv_timeout(timeout)
        .expect("expected at least one measurement before the timeout");
    out.insert((first.type_, first.type_instance), first.value);
    while let Ok(m) = receiver.recv_timeout(Duration::from_millis(100)) {
        out.insert((m.type_, m.type_instance), m.value);
    }
    out
}

#[test]
fn counter_total_and_optional_emissions() {
    let (core, port, rx) = start_core(|c| StatsdConfig {
        counter_emission: CounterEmission { sum: true, gauge: true },
        ..c
    });

    for _ in 0..5 {
        send(port, "page.views:3|c");
    }
    send(port, "page.views:2|c|@0.5");

    let values = drain(&rx, Duration::from_secs(2));
    assert_eq!(values[&("derive", "page.views".to_string())], 19.0);
    assert_eq!(values[&("count", "page.views".to_string())], 19.0);
    assert_eq!(values[&("gauge", "page.views".to_string())], 19.0);

    core.shutdown();
}

#[test]
fn gauge_delta_then_absolute_override() {
    let (core, port, rx) = start_core(|c| c);

    send(port, "temp:10|g");
    send(port, "temp:+5|g");
    send(port, "temp:-2|g");
    let values = drain(&rx, Duration::from_secs(2));
    assert_eq!(values[&("gauge", "temp".to_string())], 13.0);

    send(port, "temp:0|g");
    let values = drain(&rx, Duration::from_secs(2));
    assert_eq!(values[&("gauge", "temp".to_string())], 0.0);

    core.shutdown();
}

#[test]
fn set_cardinality() {
    let (core, port, rx) = start_core(|c| c);

    send(port, "users:alice|s");
    send(port, "users:bob|s");
    send(port, "users:alice|s");

    let values = drain(&rx, Duration::from_secs(2));
    assert_eq!(values[&("objects", "users".to_string())], 2.0);

    core.shutdown();
}

#[test]
fn timer_summaries() {
    let (core, port, rx) = start_core(|c| StatsdConfig {
        timer_lower: true,
        timer_upper: true,
        timer_sum: true,
        timer_count: true,
        timer_percentiles: vec![90.0],
        ..c
    });

    send(port, "rq:100|ms");
    send(port, "rq:200|ms");
    send(port, "rq:300|ms");

    let values = drain(&rx, Duration::from_secs(2));
    let latency = |suffix: &str| values[&("latency", format!("rq{suffix}"))];
    assert!((latency("-average") - 200.0).abs() < 1.0);
    assert!((latency("-lower") - 100.0).abs() < 1.0);
    assert!((latency("-upper") - 300.0).abs() < 1.0);
    assert!((latency("-sum") - 600.0).abs() < 2.0);
    assert_eq!(values[&("gauge", "rq-count".to_string())], 3.0);
    assert!((latency("-percentile-90") - 300.0).abs() < 1.0);

    core.shutdown();
}

#[test]
fn malformed_line_does_not_affect_siblings_in_the_same_datagram() {
    let (core, port, rx) = start_core(|c| c);

    send(port, "good:1|c\nbad|c\nfine:2|g\n");

    let values = drain(&rx, Duration::from_secs(2));
    assert_eq!(values[&("derive", "good".to_string())], 1.0);
    assert_eq!(values[&("gauge", "fine".to_string())], 2.0);
    assert!(!values.keys().any(|(_, name)| name == "bad"));

    core.shutdown();
}

#[test]
fn idle_deletion_removes_cell_after_one_quiet_flush() {
    let (core, port, rx) = start_core(|c| StatsdConfig {
        delete_on_idle: DeleteOnIdle {
            counters: true,
            ..DeleteOnIdle::default()
        },
        timer_count: false,
        ..c
    });

    send(port, "hits:1|c");
    let first = drain(&rx, Duration::from_secs(2));
    assert_eq!(first[&("derive", "hits".to_string())], 1.0);

    // No further updates: the cell should be gone from the store within one
    // more flush interval, and stop emitting.
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(core.store().len(), 0);

    core.shutdown();
}

#[test]
fn timer_emission_defaults_skip_optional_summaries() {
    let (core, port, rx) = start_core(|c| c);

    send(port, "rq:5|ms");
    let values = drain(&rx, Duration::from_secs(2));
    let has_latency = |suffix: &str| values.contains_key(&("latency", format!("rq{suffix}")));
    assert!(has_latency("-average"));
    assert!(!has_latency("-lower"));
    assert!(!has_latency("-sum"));
    assert!(!values.contains_key(&("gauge", "rq-count".to_string())));

    core.shutdown();
}
