//! TCP transport adapter.
//!
//! The sensing node dials the compute node (`TcpConnector`); the compute node
//! keeps one listening socket for its whole lifetime and accepts one peer at a
//! time (`TcpAcceptor`). Both hand out a `TcpLink`, whose `close()` shuts the
//! socket down so a thread blocked in `send`/`receive` returns immediately.
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use velo_traits::{BoxError, Connector, LinkStatus, Received, Transport};

use crate::error::{HwError, Result};

/// Socket timeouts of zero are rejected by the OS layer; clamp to this floor.
const MIN_IO_TIMEOUT: Duration = Duration::from_millis(1);

#[inline]
fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

pub struct TcpLink {
    stream: TcpStream,
    peer: SocketAddr,
    closed: AtomicBool,
}

impl TcpLink {
    pub fn new(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self {
            stream,
            peer,
            closed: AtomicBool::new(false),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn io_error(&self, e: std::io::Error) -> HwError {
        if self.closed.load(Ordering::Acquire) {
            HwError::Closed
        } else {
            HwError::Io(e)
        }
    }
}

impl std::fmt::Debug for TcpLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpLink")
            .field("peer", &self.peer)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Transport for TcpLink {
    fn send(&self, buf: &[u8], timeout: Duration) -> std::result::Result<usize, BoxError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Box::new(HwError::Closed));
        }
        self.stream
            .set_write_timeout(Some(timeout.max(MIN_IO_TIMEOUT)))
            .map_err(|e| self.io_error(e))?;
        match (&self.stream).write(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Err(Box::new(HwError::Timeout)),
            Err(e) => Err(Box::new(self.io_error(e))),
        }
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> std::result::Result<Received, BoxError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Box::new(HwError::Closed));
        }
        let res = if timeout.is_zero() {
            self.stream
                .set_nonblocking(true)
                .map_err(|e| self.io_error(e))?;
            let r = (&self.stream).read(buf);
            self.stream
                .set_nonblocking(false)
                .map_err(|e| self.io_error(e))?;
            r
        } else {
            self.stream
                .set_read_timeout(Some(timeout.max(MIN_IO_TIMEOUT)))
                .map_err(|e| self.io_error(e))?;
            (&self.stream).read(buf)
        };
        match res {
            // Orderly shutdown by the peer (or by our own close()).
            Ok(0) if !buf.is_empty() => Err(Box::new(HwError::Closed)),
            Ok(n) => Ok(Received::Data(n)),
            Err(e) if is_timeout(&e) || e.kind() == ErrorKind::Interrupted => {
                Ok(Received::WouldBlock)
            }
            Err(e) => Err(Box::new(self.io_error(e))),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.stream.shutdown(Shutdown::Both) {
                tracing::debug!(error = %e, peer = %self.peer, "socket shutdown failed");
            }
            tracing::debug!(peer = %self.peer, "link closed");
        }
    }

    fn status(&self) -> LinkStatus {
        if self.closed.load(Ordering::Acquire) {
            LinkStatus::Closed
        } else {
            LinkStatus::Established
        }
    }
}

/// Client side: dials a fixed peer address.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Connector for TcpConnector {
    type Link = TcpLink;

    fn establish(&mut self, timeout: Duration) -> std::result::Result<TcpLink, BoxError> {
        let addrs: Vec<SocketAddr> = self
            .addr
            .to_socket_addrs()
            .map_err(|e| HwError::Address(format!("{}: {e}", self.addr)))?
            .collect();
        if addrs.is_empty() {
            return Err(Box::new(HwError::Address(format!(
                "{} resolved to no addresses",
                self.addr
            ))));
        }

        let mut last_err: Option<std::io::Error> = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout.max(MIN_IO_TIMEOUT)) {
                Ok(stream) => return Ok(TcpLink::new(stream)?),
                Err(e) => {
                    tracing::trace!(%addr, error = %e, "connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        let err = last_err.map_or(HwError::Timeout, |e| {
            if is_timeout(&e) {
                HwError::Timeout
            } else {
                HwError::Io(e)
            }
        });
        Err(Box::new(err))
    }
}

/// Server side: one persistent listener, one accepted peer per `establish`.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    poll: Duration,
}

impl TcpAcceptor {
    /// Bind `addr` (e.g. "0.0.0.0:5000"; port 0 picks a free port).
    pub fn bind(addr: &str, poll: Duration) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| HwError::Address(format!("bind {addr}: {e}")))?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            poll: poll.max(MIN_IO_TIMEOUT),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

impl Connector for TcpAcceptor {
    type Link = TcpLink;

    fn establish(&mut self, timeout: Duration) -> std::result::Result<TcpLink, BoxError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    // Some platforms let accepted sockets inherit non-blocking mode.
                    stream.set_nonblocking(false).map_err(HwError::Io)?;
                    tracing::debug!(%addr, "peer accepted");
                    return Ok(TcpLink::new(stream)?);
                }
                Err(e) if is_timeout(&e) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Box::new(HwError::AcceptTimeout(timeout)));
                    }
                    std::thread::sleep(self.poll.min(deadline - now));
                }
                Err(e) => return Err(Box::new(HwError::Io(e))),
            }
        }
    }
}
