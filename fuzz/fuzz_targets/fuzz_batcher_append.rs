#![no_main]

use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use rylv_metrics::shipper::batcher::{DatagramBatcher, MAX_PACKET_SIZE, MIN_PACKET_SIZE};
use rylv_metrics::shipper::endpoint::Endpoint;

// Derives a packet size and a sequence of point lengths from arbitrary
// bytes and appends them, checking the batcher's bound invariant — buffered
// fill never exceeds packet_size at any observable state.
fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    let packet_size = usize::from(u16::from_le_bytes([data[0], data[1]]))
        .clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE);

    // No real endpoint: loopback to a high port nobody listens on so sends
    // fail fast and harmlessly rather than blocking.
    let endpoint = Endpoint::new(
        "127.0.0.1".to_string(),
        Some("1".to_string()),
        None,
        None,
        Duration::ZERO,
    );
    let Ok(batcher) = DatagramBatcher::new(packet_size, vec![endpoint]) else {
        return;
    };

    for chunk in data[2..].chunks(64) {
        if chunk.is_empty() || chunk.len() > packet_size {
            continue;
        }
        batcher.append(chunk);
    }
    batcher.flush();
});
