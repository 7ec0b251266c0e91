//! Endpoint — one send destination's socket lifecycle.
//!
//! Grounded in `sockent_client_connect`/`sockent_client_disconnect`/`set_ttl`/
//! `bind_socket_to_addr` (`original_source/src/write_influxdb_udp.c`): resolve
//! `(node, service)`, open a UDP socket matching the first resolved address's
//! family, apply TTL, optionally bind to a configured interface address, then
//! cache the socket and address for subsequent sends.

use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rustix::net::sockopt;

use crate::complain::Complaint;
use crate::error::MetricsError;

const DEFAULT_SERVICE: &str = "8089";

enum State {
    Disconnected,
    Connected {
        socket: UdpSocket,
        addr: SocketAddr,
        next_resolve_deadline: Option<Instant>,
    },
}

/// One configured send destination. `Send` + `Sync`: every mutable part lives
/// behind the internal [`Mutex`], so an [`Endpoint`] can be shared across
/// writer threads without an outer lock.
pub struct Endpoint {
    node: String,
    service: Option<String>,
    bind_addr: Option<IpAddr>,
    ttl: Option<u8>,
    resolve_interval: Duration,
    state: Mutex<State>,
    resolve_complaint: Complaint,
}

impl Endpoint {
    /// Builds a not-yet-connected endpoint. `ttl`, when present, must already
    /// be validated to `1..=255` by the caller.
    #[must_use]
    pub fn new(
        node: String,
        service: Option<String>,
        bind_addr: Option<IpAddr>,
        ttl: Option<u8>,
        resolve_interval: Duration,
    ) -> Self {
        Self {
            node,
            service,
            bind_addr,
            ttl,
            resolve_interval,
            state: Mutex::new(State::Disconnected),
            resolve_complaint: Complaint::new(),
        }
    }

    /// Sends `data` to this endpoint, connecting (or reconnecting, if stale)
    /// first. `EINTR`/`EAGAIN` are retried indefinitely; any other send error
    /// disconnects the endpoint and logs, then returns without retrying.
    pub fn send(&self, data: &[u8]) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Err(err) = self.ensure_connected(&mut state) {
            tracing::debug!(node = %self.node, error = %err, "endpoint not connected, dropping send");
            return;
        }
        let State::Connected { socket, addr, .. } = &*state else {
            unreachable!("ensure_connected only returns Ok when Connected");
        };
        loop {
            match socket.send_to(data, *addr) {
                Ok(_) => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                Err(err) => {
                    tracing::error!(node = %self.node, error = %err, "endpoint sendto failed, disconnecting");
                    *state = State::Disconnected;
                    return;
                }
            }
        }
    }

    fn ensure_connected(&self, state: &mut State) -> Result<(), MetricsError> {
        let stale = matches!(
            state,
            State::Connected { next_resolve_deadline: Some(deadline), .. }
                if *deadline <= Instant::now()
        );
        if matches!(state, State::Connected { .. }) && !stale {
            return Ok(());
        }

        let service = self.service.as_deref().unwrap_or(DEFAULT_SERVICE);
        let target = format!("{}:{service}", self.node);
        let addrs = match target.to_socket_addrs() {
            Ok(addrs) => {
                if self.resolve_complaint.release() {
                    tracing::info!(node = %self.node, "endpoint: resolved successfully");
                }
                addrs
            }
            Err(err) => {
                if self.resolve_complaint.complain() {
                    tracing::error!(node = %self.node, error = %err, "endpoint: getaddrinfo failed");
                }
                return Err(MetricsError::StdIo(err));
            }
        };

        for addr in addrs {
            match self.connect_one(addr) {
                Ok(socket) => {
                    let next_resolve_deadline = (!self.resolve_interval.is_zero())
                        .then(|| Instant::now() + self.resolve_interval);
                    *state = State::Connected {
                        socket,
                        addr,
                        next_resolve_deadline,
                    };
                    return Ok(());
                }
                Err(err) => {
                    tracing::debug!(node = %self.node, %addr, error = %err, "endpoint: candidate address failed");
                }
            }
        }
        Err(MetricsError::Custom(format!(
            "unable to connect endpoint {}:{service}",
            self.node
        )))
    }

    fn connect_one(&self, addr: SocketAddr) -> Result<UdpSocket, MetricsError> {
        let family = if addr.is_ipv4() {
            rustix::net::AddressFamily::INET
        } else {
            rustix::net::AddressFamily::INET6
        };
        let fd = rustix::net::socket(family, rustix::net::SocketType::DGRAM, None)?;
        self.set_ttl(&fd, &addr)?;
        if let Some(bind_addr) = self.bind_addr {
            let bind_target = SocketAddr::new(bind_addr, 0);
            let bind_result = match bind_target {
                SocketAddr::V4(v4) => rustix::net::bind_v4(&fd, &v4),
                SocketAddr::V6(v6) => rustix::net::bind_v6(&fd, &v6),
            };
            bind_result?;
        }
        // SAFETY: `fd` was just created above and is uniquely owned here.
        let socket = unsafe { UdpSocket::from_raw_fd(fd.into_raw_fd()) };
        Ok(socket)
    }

    fn set_ttl(&self, fd: &OwnedFd, addr: &SocketAddr) -> Result<(), MetricsError> {
        let Some(ttl) = self.ttl else {
            return Ok(());
        };
        match addr {
            SocketAddr::V4(v4) => {
                if v4.ip().is_multicast() {
                    sockopt::set_ip_multicast_ttl(fd, u32::from(ttl))?;
                } else {
                    sockopt::set_ip_ttl(fd, u32::from(ttl))?;
                }
            }
            SocketAddr::V6(v6) => {
                if v6.ip().is_multicast() {
                    sockopt::set_ipv6_multicast_hops(fd, u32::from(ttl))?;
                } else {
                    sockopt::set_ipv6_unicast_hops(fd, u32::from(ttl))?;
                }
            }
        }
        Ok(())
    }

    /// Closes the cached socket and forgets the cached address, mirroring
    /// `sockent_client_disconnect`.
    pub fn disconnect(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *state = State::Disconnected;
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("node", &self.node)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_to_unreachable_host_does_not_panic() {
        // DNS resolution for a bogus TLD fails immediately; send() must
        // absorb the error rather than propagate or panic.
        let endpoint = Endpoint::new(
            "no-such-host.invalid".to_string(),
            Some("9".to_string()),
            None,
            None,
            Duration::ZERO,
        );
        endpoint.send(b"hello");
    }

    #[test]
    fn disconnect_resets_to_disconnected_state() {
        let endpoint = Endpoint::new(
            "127.0.0.1".to_string(),
            Some("9".to_string()),
            None,
            None,
            Duration::ZERO,
        );
        endpoint.send(b"probe");
        endpoint.disconnect();
        assert!(matches!(
            *endpoint.state.lock().unwrap(),
            State::Disconnected
        ));
    }
}
