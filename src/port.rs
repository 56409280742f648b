//! Random port allocation with collision retry.

use std::{
    io::{ErrorKind, Result as IoResult},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    ops::RangeInclusive,
    sync::atomic::{AtomicU16, Ordering},
};

use rand::Rng;
use tokio::net::TcpListener;

use crate::error::{FetchError, Result};

/// Last port handed out in this process, so that two allocations in a row
/// never share a port.
static LAST_PORT: AtomicU16 = AtomicU16::new(0);

/// Binds TCP listeners on random ports.
///
/// ```
/// use superfetch::PortAllocator;
///
/// let allocator = PortAllocator::new()
///     .range(20000..=30000)
///     .max_attempts(10);
/// ```
#[derive(Debug, Clone)]
pub struct PortAllocator {
    host: IpAddr,
    range: RangeInclusive<u16>,
    max_attempts: usize,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            range: 1024..=49151,
            max_attempts: 50,
        }
    }
}

impl PortAllocator {
    /// Create an allocator binding `127.0.0.1` within `1024..=49151`, giving
    /// up after 50 attempts.
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the address to bind.
    #[must_use]
    pub fn host(self, host: impl Into<IpAddr>) -> Self {
        Self {
            host: host.into(),
            ..self
        }
    }

    /// Sets the range random candidates are drawn from.
    #[must_use]
    pub fn range(self, range: RangeInclusive<u16>) -> Self {
        Self { range, ..self }
    }

    /// Sets how many binds are attempted before giving up. At least one bind
    /// is always attempted.
    #[must_use]
    pub fn max_attempts(self, max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self
        }
    }

    /// Binds a listener starting from a random candidate port.
    pub fn bind_random(&self) -> Result<(TcpListener, u16)> {
        self.check_range(0)?;
        let mut rng = rand::thread_rng();
        let preferred = self.candidate(&mut rng);
        self.bind_with(preferred, &mut rng)
    }

    /// Binds a listener on `preferred`, falling back to random ports if it is
    /// already in use.
    pub fn bind(&self, preferred: u16) -> Result<(TcpListener, u16)> {
        self.bind_with(preferred, &mut rand::thread_rng())
    }

    /// Like [`bind`](Self::bind), drawing fallback candidates from `rng`.
    ///
    /// The returned port is the one the socket is actually bound to, which
    /// differs from `preferred` on collision or when `preferred` is `0`.
    pub fn bind_with<R: Rng>(
        &self,
        preferred: u16,
        rng: &mut R,
    ) -> Result<(TcpListener, u16)> {
        self.check_range(preferred)?;
        let mut port = preferred;
        let mut attempts = 0;

        loop {
            attempts += 1;

            let err = if port != 0 && port == LAST_PORT.load(Ordering::Relaxed) {
                std::io::Error::new(ErrorKind::AddrInUse, "port was handed out last")
            } else {
                match self.try_bind(port) {
                    Ok((listener, port)) => {
                        LAST_PORT.store(port, Ordering::Relaxed);
                        tracing::debug!(port, attempts, "bound listener");
                        return Ok((listener, port));
                    }
                    Err(err) => err,
                }
            };

            if err.kind() != ErrorKind::AddrInUse || attempts >= self.max_attempts {
                return Err(FetchError::PortUnavailable {
                    port,
                    attempts,
                    source: err,
                });
            }

            let next = self.candidate(rng);
            tracing::debug!(port, next, "port in use, retrying");
            port = next;
        }
    }

    fn check_range(&self, port: u16) -> Result<()> {
        if !self.range.is_empty() {
            return Ok(());
        }
        Err(FetchError::PortUnavailable {
            port,
            attempts: 0,
            source: std::io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "empty port range {}..={}",
                    self.range.start(),
                    self.range.end()
                ),
            ),
        })
    }

    fn candidate<R: Rng>(&self, rng: &mut R) -> u16 {
        rng.gen_range(self.range.clone())
    }

    fn try_bind(&self, port: u16) -> IoResult<(TcpListener, u16)> {
        let listener = std::net::TcpListener::bind(SocketAddr::new(self.host, port))?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        Ok((TcpListener::from_std(listener)?, port))
    }
}
