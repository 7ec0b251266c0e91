//! DatagramBatcher — accumulates rendered line-protocol points into a
//! size-bounded send buffer and flushes it to every configured [`Endpoint`].
//!
//! Grounded in `write_influxdb_udp_write`/`flush_buffer`/
//! `write_influxdb_udp_flush` (`original_source/src/write_influxdb_udp.c`):
//! append-then-preemptive-flush on write, and a separate `min_age`-gated
//! explicit flush path used by the periodic/shutdown trigger.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::endpoint::Endpoint;
use crate::error::MetricsError;

/// Minimum configurable `MaxPacketSize`.
pub const MIN_PACKET_SIZE: usize = 1024;
/// Maximum configurable packet size.
pub const MAX_PACKET_SIZE: usize = 65535;
/// collectd's `NET_DEFAULT_PACKET_SIZE`.
pub const DEFAULT_PACKET_SIZE: usize = 1452;

/// Below this many free bytes, a successful append preemptively flushes: the
/// odds of the next point not fitting start to outweigh the odds it does.
const PREEMPTIVE_FLUSH_MARGIN: usize = 120;

struct Buffer {
    data: Vec<u8>,
    fill: usize,
    last_update: Instant,
}

impl Buffer {
    fn new(packet_size: usize) -> Self {
        Self {
            data: vec![0u8; packet_size],
            fill: 0,
            last_update: Instant::now(),
        }
    }

    fn reinit(&mut self) {
        self.data.fill(0);
        self.fill = 0;
    }
}

/// The size-bounded, single-mutex send buffer shared by every writer thread,
/// fanning its flushed contents out to every configured [`Endpoint`] in
/// configuration order.
pub struct DatagramBatcher {
    packet_size: usize,
    buffer: Mutex<Buffer>,
    endpoints: Vec<Endpoint>,
}

impl DatagramBatcher {
    /// Builds a batcher over `endpoints`, in the order sends should fan out.
    ///
    /// # Errors
    /// Returns [`MetricsError::Config`] if `packet_size` is outside
    /// `[1024, 65535]`.
    pub fn new(packet_size: usize, endpoints: Vec<Endpoint>) -> Result<Self, MetricsError> {
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&packet_size) {
            return Err(MetricsError::Config(format!(
                "MaxPacketSize must be between {MIN_PACKET_SIZE} and {MAX_PACKET_SIZE}, got {packet_size}"
            )));
        }
        Ok(Self {
            packet_size,
            buffer: Mutex::new(Buffer::new(packet_size)),
            endpoints,
        })
    }

    /// Appends one rendered point, flushing first if it wouldn't fit, and
    /// flushing again afterward if fewer than [`PREEMPTIVE_FLUSH_MARGIN`]
    /// bytes remain.
    ///
    /// # Panics
    /// Panics if `point.len()` exceeds `packet_size` — such a point can never
    /// fit even in an empty buffer.
    pub fn append(&self, point: &[u8]) {
        assert!(
            point.len() <= self.packet_size,
            "point of {} bytes exceeds packet_size {}",
            point.len(),
            self.packet_size
        );
        let mut buffer = self.buffer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if self.packet_size - buffer.fill < point.len() {
            self.flush_locked(&mut buffer);
        }
        let fill = buffer.fill;
        buffer.data[fill..fill + point.len()].copy_from_slice(point);
        buffer.fill += point.len();
        buffer.last_update = Instant::now();

        if self.packet_size - buffer.fill < PREEMPTIVE_FLUSH_MARGIN {
            self.flush_locked(&mut buffer);
        }
    }

    /// Unconditionally flushes any buffered bytes. Used at shutdown.
    pub fn flush(&self) {
        let mut buffer = self.buffer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if buffer.fill > 0 {
            self.flush_locked(&mut buffer);
        }
    }

    /// Flushes only if the buffer has been idle for at least `min_age`,
    /// mirroring `write_influxdb_udp_flush`'s timeout gate. A `min_age` of
    /// zero always flushes (if non-empty).
    pub fn explicit_flush(&self, min_age: Duration) {
        let mut buffer = self.buffer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if buffer.fill == 0 {
            return;
        }
        if !min_age.is_zero() && buffer.last_update.elapsed() < min_age {
            return;
        }
        self.flush_locked(&mut buffer);
    }

    fn flush_locked(&self, buffer: &mut Buffer) {
        let payload = &buffer.data[..buffer.fill];
        for endpoint in &self.endpoints {
            endpoint.send(payload);
        }
        buffer.reinit();
    }

    /// Number of configured endpoints.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }
}
