//! Benchmarks the append/preemptive-flush path (`DatagramBatcher::append`)
//! against a real loopback UDP receiver, with a background reader thread
//! draining the socket so sends never block.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::spawn;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rylv_metrics::shipper::batcher::DatagramBatcher;
use rylv_metrics::shipper::endpoint::Endpoint;

fn bench_append(c: &mut Criterion) {
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = receiver.local_addr().unwrap().port();
    receiver.set_read_timeout(Some(Duration::from_secs(20))).unwrap();

    let finished = Arc::new(AtomicBool::new(false));
    let reader_finished = Arc::clone(&finished);
    let reader = spawn(move || {
        let mut buf = [0u8; 2048];
        let mut received = 0usize;
        while !reader_finished.load(Ordering::Relaxed) {
            if let Ok((n, _)) = receiver.recv_from(&mut buf) {
                received += n;
            }
        }
        received
    });

    let endpoint = Endpoint::new(
        "127.0.0.1".to_string(),
        Some(port.to_string()),
        None,
        None,
        Duration::ZERO,
    );
    let batcher = DatagramBatcher::new(1452, vec![endpoint]).unwrap();
    let point = b"some.long.metric.by.some.criteria:1|c";

    c.bench_function("batcher/append", |b| {
        b.iter(|| {
            batcher.append(black_box(point));
        });
    });

    batcher.flush();
    finished.store(true, Ordering::Relaxed);
    let _ = reader.join();
}

criterion_group!(benches, bench_append);
criterion_main!(benches);
