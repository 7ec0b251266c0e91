//! Black-box tests of [`ShipperCore`]: spawn a loopback UDP receiver, write
//! points through the batcher, and assert on what actually lands on the wire.

use std::net::UdpSocket;
use std::thread::JoinHandle;
use std::time::Duration;

use rylv_metrics::shipper::{ServerSpec, ShipperConfig, ShipperCore};

fn spawn_udp_receiver(port: u16, timeout: Duration) -> JoinHandle<Vec<Vec<u8>>> {
    std::thread::spawn(move || {
        let socket = UdpSocket::bind(("127.0.0.1", port)).expect("bind receiver");
        socket.set_read_timeout(Some(timeout)).expect("set_read_timeout");
        let mut buf = [0u8; 2048];
        let mut datagrams = Vec::new();
        while let Ok((n, _)) = socket.recv_from(&mut buf) {
            datagrams.push(buf[..n].to_vec());
        }
        datagrams
    })
}

fn free_port() -> u16 {
    let probe = UdpSocket::bind("127.0.0.1:0").expect("bind probe");
    probe.local_addr().expect("local addr").port()
}

#[test]
fn no_datagram_exceeds_the_configured_packet_size() {
    let port = free_port();
    let reader = spawn_udp_receiver(port, Duration::from_millis(500));

    let config = ShipperConfig {
        servers: vec![ServerSpec {
            host: "127.0.0.1".to_string(),
            service: Some(port.to_string()),
            bind_addr: None,
            interface_resolve_interval: Duration::ZERO,
        }],
        max_packet_size: 1024,
        ..ShipperConfig::default()
    };
    let core = ShipperCore::new(&config).expect("shipper core builds");

    let line = vec![b'x'; 100];
    for _ in 0..10 {
        core.write(&line);
    }
    core.shutdown();

    let datagrams = reader.join().expect("reader thread");
    assert!(!datagrams.is_empty(), "expected at least one flushed datagram");
    for datagram in &datagrams {
        assert!(datagram.len() <= 1024);
    }
    let total: usize = datagrams.iter().map(Vec::len).sum();
    assert_eq!(total, 1000);
}

#[test]
fn fan_out_sends_every_flush_to_every_configured_endpoint() {
    let port_a = free_port();
    let port_b = free_port();
    let reader_a = spawn_udp_receiver(port_a, Duration::from_millis(500));
    let reader_b = spawn_udp_receiver(port_b, Duration::from_millis(500));

    let config = ShipperConfig {
        servers: vec![
            ServerSpec {
                host: "127.0.0.1".to_string(),
                service: Some(port_a.to_string()),
                bind_addr: None,
                interface_resolve_interval: Duration::ZERO,
            },
            ServerSpec {
                host: "127.0.0.1".to_string(),
                service: Some(port_b.to_string()),
                bind_addr: None,
                interface_resolve_interval: Duration::ZERO,
            },
        ],
        ..ShipperConfig::default()
    };
    let core = ShipperCore::new(&config).expect("shipper core builds");
    core.write(b"some.measurement value=1 1700000000000000000");
    core.shutdown();

    let a = reader_a.join().expect("reader a");
    let b = reader_b.join().expect("reader b");
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_eq!(a[0], b[0]);
}

#[test]
fn periodic_tick_respects_min_age_gate() {
    let port = free_port();
    let reader = spawn_udp_receiver(port, Duration::from_millis(600));

    let config = ShipperConfig {
        servers: vec![ServerSpec {
            host: "127.0.0.1".to_string(),
            service: Some(port.to_string()),
            bind_addr: None,
            interface_resolve_interval: Duration::ZERO,
        }],
        min_age: Duration::from_millis(300),
        ..ShipperConfig::default()
    };
    let core = ShipperCore::new(&config).expect("shipper core builds");

    core.write(b"fresh.point value=1");
    core.tick(); // too young to flush yet
    std::thread::sleep(Duration::from_millis(350));
    core.tick(); // now past min_age

    let datagrams = reader.join().expect("reader thread");
    assert_eq!(datagrams.len(), 1);
    assert_eq!(datagrams[0], b"fresh.point value=1");
}
