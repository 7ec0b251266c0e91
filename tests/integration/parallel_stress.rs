//! Concurrent-update stress test for [`MetricStore`]: many threads hammer the
//! same handful of cells the way many UDP reader threads would, and a single
//! flush afterward must observe exactly the sum of every update, with no
//! update lost or double-counted under contention. Mirrors the shape of the
//! teacher's deleted `parallel_stress.rs`, adapted from its direct-collector
//! API to drive `MetricStore`/`apply_record` instead.

use std::sync::Arc;
use std::thread;
use std::time::SystemTime;

use rylv_metrics::ingest::aggregate::{
    apply_record, flush, ChannelDispatcher, CounterEmission, DeleteOnIdle, TimerEmission,
};
use rylv_metrics::ingest::parser::parse_line;
use rylv_metrics::ingest::store::MetricStore;

const THREADS: usize = 8;
const UPDATES_PER_THREAD: usize = 5_000;

#[test]
fn concurrent_counter_updates_sum_exactly() {
    let store = Arc::new(MetricStore::new());

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let record = parse_line("requests:1|c").unwrap();
                for _ in 0..UPDATES_PER_THREAD {
                    apply_record(&store, &record).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("writer thread panicked");
    }

    let (dispatcher, rx) = ChannelDispatcher::new();
    flush(
        &store,
        &dispatcher,
        DeleteOnIdle::default(),
        CounterEmission::default(),
        TimerEmission::default(),
        SystemTime::now(),
    );
    let total = rx.try_recv().expect("expected a derive measurement");
    assert_eq!(total.type_, "derive");
    assert_eq!(total.value, (THREADS * UPDATES_PER_THREAD) as f64);
    assert!(rx.try_recv().is_err(), "only one cell was updated");
}

#[test]
fn concurrent_updates_across_many_distinct_names_keep_cells_independent() {
    let store = Arc::new(MetricStore::new());
    const NAMES: usize = 32;

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for n in 0..NAMES {
                    let line = format!("metric.{n}:1|c");
                    let record = parse_line(&line).unwrap();
                    for _ in 0..200 {
                        apply_record(&store, &record).unwrap();
                    }
                }
                let _ = i;
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("writer thread panicked");
    }

    assert_eq!(store.len(), NAMES);

    let (dispatcher, rx) = ChannelDispatcher::new();
    flush(
        &store,
        &dispatcher,
        DeleteOnIdle::default(),
        CounterEmission::default(),
        TimerEmission::default(),
        SystemTime::now(),
    );
    let mut seen = 0;
    while let Ok(m) = rx.try_recv() {
        assert_eq!(m.value, (THREADS * 200) as f64);
        seen += 1;
    }
    assert_eq!(seen, NAMES);
}

#[test]
fn concurrent_gauge_and_set_updates_do_not_corrupt_each_other() {
    let store = Arc::new(MetricStore::new());

    let gauge_writers: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let record = parse_line("temp:+1|g").unwrap();
                for _ in 0..1_000 {
                    apply_record(&store, &record).unwrap();
                }
            })
        })
        .collect();

    let set_writers: Vec<_> = (0..THREADS)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for n in 0..50 {
                    let line = format!("users:member-{i}-{n}|s");
                    let record = parse_line(&line).unwrap();
                    apply_record(&store, &record).unwrap();
                }
            })
        })
        .collect();

    for handle in gauge_writers.into_iter().chain(set_writers) {
        handle.join().expect("writer thread panicked");
    }

    let (dispatcher, rx) = ChannelDispatcher::new();
    flush(
        &store,
        &dispatcher,
        DeleteOnIdle::default(),
        CounterEmission::default(),
        TimerEmission::default(),
        SystemTime::now(),
    );

    let mut by_name = std::collections::HashMap::new();
    while let Ok(m) = rx.try_recv() {
        by_name.insert(m.type_instance, m.value);
    }
    assert_eq!(by_name["temp"], (THREADS * 1_000) as f64);
    // Every (thread, n) pair produces a distinct member string, so the set's
    // cardinality is exactly the total number of set updates.
    assert_eq!(by_name["users"], (THREADS * 50) as f64);
}
