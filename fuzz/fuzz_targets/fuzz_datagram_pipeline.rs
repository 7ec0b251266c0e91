#![no_main]

use libfuzzer_sys::fuzz_target;
use rylv_metrics::ingest::aggregate::apply_record;
use rylv_metrics::ingest::parser::parse_datagram;
use rylv_metrics::ingest::store::MetricStore;

// Drives a full datagram (arbitrary bytes, not just a single line) through
// split→parse→aggregate the way `ingest::listener::read_one` does. One
// malformed line must never corrupt or panic on the rest of the datagram.
fuzz_target!(|data: &[u8]| {
    let Ok(datagram) = std::str::from_utf8(data) else {
        return;
    };

    let store = MetricStore::new();
    parse_datagram(
        datagram,
        |record| {
            let _ = apply_record(&store, &record);
        },
        |_line, _err| {},
    );
});
