//! Seams between the control core and the outside world.
//!
//! Hardware (encoder counter, motor bridge) and the byte-stream transport are
//! external collaborators; the core only ever talks to them through these
//! traits, using boxed errors at the boundary.

pub mod clock;

pub use clock::{Clock, MonotonicClock};

use std::time::Duration;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Quadrature encoder exposing a free-running, wrapping 16-bit count.
pub trait Encoder {
    fn read_count(&mut self) -> Result<i16, BoxError>;
}

/// Motor bridge driven by a signed duty command in control units.
pub trait Motor {
    /// Enable both half-bridges.
    fn enable(&mut self) -> Result<(), BoxError>;
    /// Disable both half-bridges.
    fn disable(&mut self) -> Result<(), BoxError>;
    /// Drive the motor; positive is clockwise, zero is stationary.
    fn actuate(&mut self, control: i32) -> Result<(), BoxError>;
}

/// Outcome of a single receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// `n > 0` bytes were copied into the buffer.
    Data(usize),
    /// Nothing arrived before the timeout elapsed (or immediately, for a zero timeout).
    WouldBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Established,
    Closed,
}

/// One established, bidirectional byte stream.
///
/// All methods take `&self` so a supervisor thread can `close()` the link
/// while another thread is blocked inside `send` or `receive`; closing must
/// make any in-flight call return promptly with an error.
pub trait Transport: Send + Sync {
    /// Write `buf`, returning how many bytes were accepted.
    fn send(&self, buf: &[u8], timeout: Duration) -> Result<usize, BoxError>;
    /// Read up to `buf.len()` bytes. A zero `timeout` polls without blocking.
    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<Received, BoxError>;
    fn close(&self);
    fn status(&self) -> LinkStatus;
}

/// Produces links: connects as a client or accepts as a server.
pub trait Connector {
    type Link: Transport + 'static;

    /// Attempt to establish one link, giving up after `timeout`.
    fn establish(&mut self, timeout: Duration) -> Result<Self::Link, BoxError>;
}
