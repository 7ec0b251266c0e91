#![no_main]

use libfuzzer_sys::fuzz_target;
use rylv_metrics::ingest::parser::parse_line;

// Exercises the line parser against arbitrary bytes: it must never panic,
// and any successfully parsed line's recovered fields must stay inside the
// grammar's declared ranges.
fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };
    if line.contains('\n') {
        return;
    }

    if let Ok(record) = parse_line(line) {
        assert!(record.value.is_finite());
        assert!(record.sample_rate > 0.0 && record.sample_rate <= 1.0);
    }
});
