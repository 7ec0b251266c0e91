//! The line-protocol UDP shipper core: a DatagramBatcher fanning out to one
//! or more Endpoints.
//!
//! Grounded in `write_influxdb_udp_config`/`write_influxdb_udp_init`/
//! `write_influxdb_udp_shutdown` (`original_source/src/write_influxdb_udp.c`)
//! for the configuration surface and start/stop lifecycle.

pub mod batcher;
pub mod endpoint;

use std::net::IpAddr;
use std::time::Duration;

use self::batcher::DatagramBatcher;
use self::endpoint::Endpoint;
use crate::error::MetricsError;

/// `ns`/`us`/`ms` as carried by the `TimePrecision` directive. This crate
/// renders no payloads itself (that's the out-of-scope LineFormatter), but
/// keeps the setting around because a configuration consumer needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimePrecision {
    Nanoseconds,
    Microseconds,
    #[default]
    Milliseconds,
}

/// One `Server` directive: a destination host plus optional port/service.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub host: String,
    pub service: Option<String>,
    pub bind_addr: Option<IpAddr>,
    pub interface_resolve_interval: Duration,
}

/// Configuration for one line-protocol UDP shipper core.
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// `Server`, repeatable; iteration/fan-out order follows this `Vec`'s order.
    pub servers: Vec<ServerSpec>,
    /// `TimeToLive`, `1..=255`. `None` leaves the OS default TTL untouched.
    pub time_to_live: Option<u8>,
    /// `MaxPacketSize`, `1024..=65535`.
    pub max_packet_size: usize,
    /// `TimePrecision`.
    pub time_precision: TimePrecision,
    /// `StoreRates`.
    pub store_rates: bool,
    /// Gate applied to the periodic/shutdown explicit flush trigger; `None`
    /// (or zero) always flushes a non-empty buffer.
    pub min_age: Duration,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            time_to_live: None,
            max_packet_size: batcher::DEFAULT_PACKET_SIZE,
            time_precision: TimePrecision::default(),
            store_rates: false,
            min_age: Duration::ZERO,
        }
    }
}

/// Owns the batcher and its endpoints for one shipper core.
pub struct ShipperCore {
    batcher: DatagramBatcher,
    min_age: Duration,
}

impl ShipperCore {
    /// Builds endpoints from `config.servers` and a batcher over them.
    ///
    /// # Errors
    /// Returns [`MetricsError::Config`] if `max_packet_size` or `time_to_live`
    /// is out of range.
    pub fn new(config: &ShipperConfig) -> Result<Self, MetricsError> {
        if let Some(ttl) = config.time_to_live {
            if ttl == 0 {
                return Err(MetricsError::Config(
                    "TimeToLive must be between 1 and 255, got 0".to_string(),
                ));
            }
        }
        let endpoints = config
            .servers
            .iter()
            .map(|server| {
                Endpoint::new(
                    server.host.clone(),
                    server.service.clone(),
                    server.bind_addr,
                    config.time_to_live,
                    server.interface_resolve_interval,
                )
            })
            .collect();
        let batcher = DatagramBatcher::new(config.max_packet_size, endpoints)?;
        Ok(Self {
            batcher,
            min_age: config.min_age,
        })
    }

    /// Hands one already-rendered line-protocol point to the batcher.
    pub fn write(&self, point: &[u8]) {
        self.batcher.append(point);
    }

    /// Runs the periodic/timer-triggered explicit flush, gated by `min_age`.
    pub fn tick(&self) {
        self.batcher.explicit_flush(self.min_age);
    }

    /// Unconditionally flushes any buffered bytes. Called on shutdown,
    /// mirroring `write_influxdb_udp_shutdown`'s "if `send_buffer_fill > 0`
    /// flush".
    pub fn shutdown(self) {
        self.batcher.flush();
    }
}
