//! LineParser — turns one StatsD text record into a [`ParsedRecord`].
//!
//! Grammar (grounded in `statsd_parse_line`/`statsd_handle_*`
//! in `original_source/src/statsd.c`):
//!
//! ```text
//! line    := name ":" value "|" kind ( "|@" rate )?
//! name    := any bytes up to final ':'
//! value   := decimal number, optionally prefixed with '+' or '-' (gauges only)
//! kind    := "c" | "ms" | "g" | "s"
//! rate    := decimal in (0, 1]
//! ```
//!
//! The kind separator is the *first* `|`; the name/value separator is the
//! *last* `:` before that `|` — this lets a metric name contain `:` but
//! keeps the value segment `:`-free.

use std::fmt;

/// The four StatsD metric families. Distinct kinds with the same name are
/// distinct cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKind {
    /// `c` — incremented by a value, optionally sub-sampled.
    Counter,
    /// `ms` — a duration in milliseconds, aggregated into a histogram.
    Timer,
    /// `g` — a point-in-time value, set absolutely or adjusted by a delta.
    Gauge,
    /// `s` — membership in a per-flush-interval set.
    Set,
}

impl MetricKind {
    /// The single-byte tag used as the first byte of a [`crate::ingest::store::CellKey`].
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Counter => b'c',
            Self::Timer => b't',
            Self::Gauge => b'g',
            Self::Set => b's',
        }
    }
}

/// One successfully parsed StatsD record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedRecord<'a> {
    /// The metric name, borrowed from the input line.
    pub name: &'a str,
    /// Which family this record belongs to.
    pub kind: MetricKind,
    /// The numeric value segment, already parsed to `f64`.
    pub value: f64,
    /// `true` when the value segment began with `+` or `-` (gauges only).
    pub is_delta: bool,
    /// The sample rate, defaulting to `1.0` when no `|@rate` suffix is present.
    pub sample_rate: f64,
    /// The raw value segment, for `Set`'s exact-byte-string semantics.
    pub raw_value: &'a str,
}

/// Why a line failed to parse. Carries enough detail for a caller to log a
/// useful message alongside the original (untruncated) line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// No `|` found to separate the kind.
    MissingKindSeparator,
    /// No `:` found (before the kind separator) to separate the value.
    MissingValueSeparator,
    /// The kind tag wasn't one of `c`, `ms`, `g`, `s`.
    UnknownKind,
    /// The value segment wasn't a finite, fully-consumed decimal.
    InvalidValue,
    /// The `|@rate` suffix wasn't a finite decimal in `(0, 1]`.
    InvalidSampleRate,
    /// A `|@rate` suffix was present on a `g` or `s` record.
    SampleRateNotAllowed,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::MissingKindSeparator => "missing '|' kind separator",
            Self::MissingValueSeparator => "missing ':' value separator",
            Self::UnknownKind => "unknown metric kind",
            Self::InvalidValue => "value segment is not a valid decimal",
            Self::InvalidSampleRate => "sample rate is not a finite decimal in (0, 1]",
            Self::SampleRateNotAllowed => "sample rate is only valid for counters and timers",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ParseError {}

fn parse_decimal(s: &str) -> Option<f64> {
    let value: f64 = s.parse().ok()?;
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

/// Parses one line (no trailing newline) into a [`ParsedRecord`].
///
/// # Errors
/// Returns a [`ParseError`] describing why the line doesn't match the
/// grammar. The caller is expected to log the original line alongside the
/// error and move on — a parse failure never aborts datagram processing.
pub fn parse_line(line: &str) -> Result<ParsedRecord<'_>, ParseError> {
    let kind_sep = line.find('|').ok_or(ParseError::MissingKindSeparator)?;
    let (before_kind, after_sep) = line.split_at(kind_sep);
    let rest = &after_sep[1..];

    let value_sep = before_kind
        .rfind(':')
        .ok_or(ParseError::MissingValueSeparator)?;
    let name = &before_kind[..value_sep];
    let raw_value = &before_kind[value_sep + 1..];

    let (kind_str, extra) = match rest.find('|') {
        Some(i) => (&rest[..i], Some(&rest[i + 1..])),
        None => (rest, None),
    };

    let kind = match kind_str {
        "c" => MetricKind::Counter,
        "ms" => MetricKind::Timer,
        "g" => MetricKind::Gauge,
        "s" => MetricKind::Set,
        _ => return Err(ParseError::UnknownKind),
    };

    let sample_rate = match (kind, extra) {
        (MetricKind::Counter | MetricKind::Timer, Some(extra)) => {
            let rate_str = extra.strip_prefix('@').ok_or(ParseError::InvalidSampleRate)?;
            let rate = parse_decimal(rate_str).ok_or(ParseError::InvalidSampleRate)?;
            if rate <= 0.0 || rate > 1.0 {
                return Err(ParseError::InvalidSampleRate);
            }
            rate
        }
        (MetricKind::Counter | MetricKind::Timer, None) => 1.0,
        (MetricKind::Gauge | MetricKind::Set, None) => 1.0,
        (MetricKind::Gauge | MetricKind::Set, Some(_)) => {
            return Err(ParseError::SampleRateNotAllowed)
        }
    };

    let is_delta = matches!(kind, MetricKind::Gauge)
        && matches!(raw_value.as_bytes().first(), Some(b'+' | b'-'));

    let value = parse_decimal(raw_value).ok_or(ParseError::InvalidValue)?;

    Ok(ParsedRecord {
        name,
        kind,
        value,
        is_delta,
        sample_rate,
        raw_value,
    })
}

/// Splits a full datagram on `\n`, skips empty lines, and invokes
/// `on_record` for each successfully parsed line or `on_error` (with the
/// original, untruncated line and the reason) for each failure.
///
/// Lines within the datagram are processed in order; one bad line does not
/// affect the others.
pub fn parse_datagram<'a>(
    buffer: &'a str,
    mut on_record: impl FnMut(ParsedRecord<'a>),
    mut on_error: impl FnMut(&'a str, ParseError),
) {
    for line in buffer.split('\n') {
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Ok(record) => on_record(record),
            Err(err) => on_error(line, err),
        }
    }
}
