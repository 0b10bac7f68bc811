//! Fixed-size records exchanged once per control period.
//!
//! No framing: each read expects exactly one record's worth of bytes. Both
//! records are little-endian so the two nodes agree regardless of host.
//!
//! | record          | bytes | layout                               |
//! |-----------------|-------|--------------------------------------|
//! | `SampleRecord`  | 8     | `i32` velocity, `u32` timestamp (ms) |
//! | `CommandRecord` | 4     | `i32` control                        |
use std::time::{Duration, Instant};

use byte_struct::*;
pub use byte_struct::{ByteStruct, ByteStructLen};
use velo_traits::{Received, Transport};

use crate::error::LinkError;
use crate::hw_error::map_link_error;

/// Sensing node -> compute node.
#[derive(ByteStruct, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[byte_struct_le]
pub struct SampleRecord {
    /// Filtered velocity (RPM), negative in reverse.
    pub velocity: i32,
    /// Wrapping millisecond tick at which the count was read.
    pub timestamp_ms: u32,
}

/// Compute node -> sensing node.
#[derive(ByteStruct, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[byte_struct_le]
pub struct CommandRecord {
    /// Signed duty in control units, within `[CONTROL_MIN, CONTROL_MAX]`.
    pub control: i32,
}

/// Largest record on the wire; sizes the stack buffers below.
pub const MAX_RECORD_LEN: usize = 8;

const _: () = assert!(<SampleRecord as ByteStructLen>::BYTE_LEN == 8);
const _: () = assert!(<CommandRecord as ByteStructLen>::BYTE_LEN == 4);

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::SampleRecord {}
    impl Sealed for super::CommandRecord {}
}

/// A record that fits in `MAX_RECORD_LEN` bytes.
pub trait Record: ByteStruct + Copy + sealed::Sealed {
    fn encode(&self) -> ([u8; MAX_RECORD_LEN], usize) {
        let mut buf = [0u8; MAX_RECORD_LEN];
        self.write_bytes(&mut buf[..Self::BYTE_LEN]);
        (buf, Self::BYTE_LEN)
    }

    fn decode(bytes: &[u8]) -> Result<Self, LinkError> {
        if bytes.len() != Self::BYTE_LEN {
            return Err(LinkError::ShortTransfer {
                expected: Self::BYTE_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self::read_bytes(bytes))
    }
}

impl Record for SampleRecord {}
impl Record for CommandRecord {}

/// Send one record in a single transport call. Fewer bytes accepted than
/// the record's size is a short transfer.
pub fn send_record<T, L>(link: &L, record: &T, timeout: Duration) -> Result<(), LinkError>
where
    T: Record,
    L: Transport + ?Sized,
{
    let (buf, len) = record.encode();
    let sent = link
        .send(&buf[..len], timeout)
        .map_err(|e| map_link_error(e.as_ref()))?;
    if sent != len {
        return Err(LinkError::ShortTransfer {
            expected: len,
            actual: sent,
        });
    }
    Ok(())
}

/// Receive exactly one record, waiting at most `timeout` in total.
///
/// Nothing at all by the deadline is a `Timeout`; part of a record is a
/// `ShortTransfer`.
pub fn recv_record<T, L>(link: &L, timeout: Duration) -> Result<T, LinkError>
where
    T: Record,
    L: Transport + ?Sized,
{
    let mut buf = [0u8; MAX_RECORD_LEN];
    let buf = &mut buf[..T::BYTE_LEN];
    fill(link, buf, 0, Instant::now() + timeout)?;
    T::decode(buf)
}

/// Poll for one more record without waiting. If the first bytes of a record
/// are already there, the rest must arrive within `timeout`.
pub fn try_recv_record<T, L>(link: &L, timeout: Duration) -> Result<Option<T>, LinkError>
where
    T: Record,
    L: Transport + ?Sized,
{
    let mut buf = [0u8; MAX_RECORD_LEN];
    let buf = &mut buf[..T::BYTE_LEN];
    let got = match link
        .receive(buf, Duration::ZERO)
        .map_err(|e| map_link_error(e.as_ref()))?
    {
        Received::WouldBlock | Received::Data(0) => return Ok(None),
        Received::Data(n) => n,
    };
    fill(link, buf, got, Instant::now() + timeout)?;
    T::decode(buf).map(Some)
}

fn fill<L>(link: &L, buf: &mut [u8], mut got: usize, deadline: Instant) -> Result<(), LinkError>
where
    L: Transport + ?Sized,
{
    while got < buf.len() {
        let now = Instant::now();
        if now >= deadline {
            return Err(if got == 0 {
                LinkError::Timeout
            } else {
                LinkError::ShortTransfer {
                    expected: buf.len(),
                    actual: got,
                }
            });
        }
        match link
            .receive(&mut buf[got..], deadline - now)
            .map_err(|e| map_link_error(e.as_ref()))?
        {
            Received::Data(n) => got += n,
            Received::WouldBlock => {}
        }
    }
    Ok(())
}
