//! UdpListener — binds one or more UDP sockets and drains datagrams into
//! the parse/aggregate pipeline.
//!
//! Grounded in `statsd_network_init`/`statsd_network_thread`/
//! `statsd_network_read` (`original_source/src/statsd.c`): resolve the
//! configured `(host, port)` with passive/address-config/datagram hints,
//! bind one socket per returned address with `SO_REUSEADDR`, then block in
//! `poll(2)` with an infinite timeout, reading one datagram per ready socket.

use std::io;
use std::net::{ToSocketAddrs, UdpSocket};
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustix::event::{poll, PollFd, PollFlags};
use rustix::net::sockopt;

use super::aggregate;
use super::parser::parse_datagram;
use super::store::MetricStore;
use crate::error::MetricsError;

/// The StatsD default bind port.
pub const DEFAULT_PORT: &str = "8125";

/// Datagrams are read into a buffer at least this large; the original's
/// fixed `4096`-byte stack buffer is used directly here.
const READ_BUFFER_SIZE: usize = 4096;

/// Resolves `(host, port)` and binds one `SO_REUSEADDR` UDP socket per
/// returned address, mirroring `statsd_network_init`'s `getaddrinfo` loop.
///
/// # Errors
/// Returns [`MetricsError::StdIo`] if resolution produces no addresses, or
/// if every resolved address fails to bind.
pub fn bind_all(host: &str, port: &str) -> Result<Vec<UdpSocket>, MetricsError> {
    let target = format!("{host}:{port}");
    let addrs = target.to_socket_addrs().map_err(MetricsError::StdIo)?;

    let mut sockets = Vec::new();
    for addr in addrs {
        let family = if addr.is_ipv4() {
            rustix::net::AddressFamily::INET
        } else {
            rustix::net::AddressFamily::INET6
        };
        let fd = match rustix::net::socket(family, rustix::net::SocketType::DGRAM, None) {
            Ok(fd) => fd,
            Err(err) => {
                tracing::error!(%addr, error = %err, "statsd listener: socket(2) failed");
                continue;
            }
        };
        if let Err(err) = sockopt::set_socket_reuseaddr(&fd, true) {
            tracing::error!(%addr, error = %err, "statsd listener: setsockopt(reuseaddr) failed");
            continue;
        }
        let bind_result = match addr {
            std::net::SocketAddr::V4(v4) => rustix::net::bind_v4(&fd, &v4),
            std::net::SocketAddr::V6(v6) => rustix::net::bind_v6(&fd, &v6),
        };
        if let Err(err) = bind_result {
            tracing::error!(%addr, error = %err, "statsd listener: bind(2) failed");
            continue;
        }
        tracing::info!(%addr, "statsd listener: listening");
        // SAFETY: `fd` was just created above and is uniquely owned here.
        let socket = unsafe { UdpSocket::from_raw_fd(rustix_fd_into_raw(fd)) };
        socket.set_nonblocking(true)?;
        sockets.push(socket);
    }

    if sockets.is_empty() {
        return Err(MetricsError::Custom(format!(
            "unable to bind any listening socket for {host}:{port}"
        )));
    }
    Ok(sockets)
}

fn rustix_fd_into_raw(fd: OwnedFd) -> RawFd {
    fd.into_raw_fd()
}

/// Poll timeout, in milliseconds. An infinite `poll(2)` timeout woken by a
/// signal on shutdown has no cross-platform equivalent without `unsafe`
/// signal handling, so this instead polls with a bounded timeout and
/// rechecks `shutdown` each wakeup — a cooperative-cancellation substitution
/// for a blocking poll loop.
const POLL_TIMEOUT_MS: i32 = 250;

/// Drives the poll/read/parse/aggregate loop over a fixed set of sockets
/// until `shutdown` is observed, applying every parsed record to `store` and
/// logging every parse failure with its original, untruncated line. No
/// fixed-size diagnostic buffer truncates that logged line.
pub fn run(sockets: &[UdpSocket], store: &MetricStore, shutdown: &AtomicBool) -> Result<(), MetricsError> {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut poll_fds: Vec<PollFd<'_>> = sockets
        .iter()
        .map(|s| PollFd::new(s, PollFlags::IN | PollFlags::PRI))
        .collect();

    while !shutdown.load(Ordering::Relaxed) {
        match poll(&mut poll_fds, POLL_TIMEOUT_MS) {
            Ok(_) => {}
            Err(rustix::io::Errno::INTR | rustix::io::Errno::AGAIN) => continue,
            Err(err) => return Err(MetricsError::Errno(err)),
        }

        for (socket, pfd) in sockets.iter().zip(poll_fds.iter_mut()) {
            if pfd.revents().is_empty() {
                continue;
            }
            read_one(socket, &mut buf, store);
            pfd.clear_revents();
        }
    }
    Ok(())
}

fn read_one(socket: &UdpSocket, buf: &mut [u8], store: &MetricStore) {
    loop {
        match socket.recv(buf) {
            Ok(n) => {
                let datagram = String::from_utf8_lossy(&buf[..n]);
                parse_datagram(
                    &datagram,
                    |record| {
                        if let Err(err) = aggregate::apply_record(store, &record) {
                            tracing::error!(metric = record.name, error = %err, "failed to apply update");
                        }
                    },
                    |line, err| {
                        tracing::error!(line, error = %err, "statsd plugin: unable to parse line");
                    },
                );
                return;
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                tracing::error!(error = %err, "statsd listener: recv(2) failed");
                return;
            }
        }
    }
}

/// Owns the listener thread's lifecycle: the bound sockets, a shutdown flag,
/// and the `JoinHandle` driving [`run`].
pub struct ListenerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Spawns the dedicated listener thread: one dedicated OS thread per
    /// core.
    ///
    /// # Errors
    /// Returns [`MetricsError::StdIo`] if the OS refuses to spawn the thread.
    pub fn spawn(sockets: Vec<UdpSocket>, store: Arc<MetricStore>) -> Result<Self, MetricsError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = std::thread::Builder::new()
            .name("statsd-listener".into())
            .spawn(move || {
                if let Err(err) = run(&sockets, &store, &thread_shutdown) {
                    tracing::error!(error = %err, "statsd listener thread aborted");
                }
            })?;
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Signals shutdown and joins the listener thread.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
