//! In-memory test doubles for velo_core.
//!
//! `MemoryLink` behaves like a connected stream socket: bytes arrive in the
//! chunks they were sent, `close()` wakes a blocked `receive`, and closing one
//! end makes the other end fail.
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{self as xch, select};
use velo_traits::{BoxError, Connector, Encoder, LinkStatus, Motor, Received, Transport};

fn closed_error() -> BoxError {
    Box::new(io::Error::new(io::ErrorKind::BrokenPipe, "memory link closed"))
}

pub struct MemoryLink {
    tx: Mutex<Option<xch::Sender<Vec<u8>>>>,
    rx: xch::Receiver<Vec<u8>>,
    pending: Mutex<VecDeque<u8>>,
    closed: AtomicBool,
    close_tx: Mutex<Option<xch::Sender<()>>>,
    close_rx: xch::Receiver<()>,
}

impl MemoryLink {
    /// Two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = xch::unbounded();
        let (b_tx, a_rx) = xch::unbounded();
        (Self::end(a_tx, a_rx), Self::end(b_tx, b_rx))
    }

    fn end(tx: xch::Sender<Vec<u8>>, rx: xch::Receiver<Vec<u8>>) -> Self {
        let (close_tx, close_rx) = xch::bounded(0);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
            pending: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
        }
    }

    fn drain_pending(&self, buf: &mut [u8]) -> usize {
        let Ok(mut pending) = self.pending.lock() else {
            return 0;
        };
        let n = buf.len().min(pending.len());
        for (dst, src) in buf.iter_mut().zip(pending.drain(..n)) {
            *dst = src;
        }
        n
    }

    fn deliver(&self, chunk: Vec<u8>, buf: &mut [u8]) -> usize {
        let n = buf.len().min(chunk.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len()
            && let Ok(mut pending) = self.pending.lock()
        {
            pending.extend(&chunk[n..]);
        }
        n
    }
}

impl Transport for MemoryLink {
    fn send(&self, buf: &[u8], _timeout: Duration) -> Result<usize, BoxError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }
        let guard = self.tx.lock().map_err(|_| closed_error())?;
        match guard.as_ref() {
            Some(tx) => {
                tx.send(buf.to_vec()).map_err(|_| closed_error())?;
                Ok(buf.len())
            }
            None => Err(closed_error()),
        }
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<Received, BoxError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }
        let n = self.drain_pending(buf);
        if n > 0 {
            return Ok(Received::Data(n));
        }
        let chunk = if timeout.is_zero() {
            match self.rx.try_recv() {
                Ok(chunk) => chunk,
                Err(xch::TryRecvError::Empty) => return Ok(Received::WouldBlock),
                Err(xch::TryRecvError::Disconnected) => return Err(closed_error()),
            }
        } else {
            let woke = select! {
                recv(self.rx) -> msg => Some(msg.ok()),
                recv(self.close_rx) -> _ => Some(None),
                default(timeout) => None,
            };
            match woke {
                Some(Some(chunk)) => chunk,
                Some(None) => return Err(closed_error()),
                None => return Ok(Received::WouldBlock),
            }
        };
        Ok(Received::Data(self.deliver(chunk, buf)))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        if let Ok(mut close_tx) = self.close_tx.lock() {
            close_tx.take();
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

/// Hands out pre-made links; each `establish` takes the next one queued.
pub struct MemoryConnector {
    rx: xch::Receiver<MemoryLink>,
}

impl MemoryConnector {
    /// The returned sender queues links for future `establish` calls.
    pub fn new() -> (xch::Sender<MemoryLink>, Self) {
        let (tx, rx) = xch::unbounded();
        (tx, Self { rx })
    }
}

impl Connector for MemoryConnector {
    type Link = MemoryLink;

    fn establish(&mut self, timeout: Duration) -> Result<MemoryLink, BoxError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            xch::RecvTimeoutError::Timeout => {
                Box::new(io::Error::new(io::ErrorKind::TimedOut, "no link queued")) as BoxError
            }
            xch::RecvTimeoutError::Disconnected => Box::new(io::Error::new(
                io::ErrorKind::NotConnected,
                "connector exhausted",
            )),
        })
    }
}

/// Motor that records every call.
#[derive(Clone, Default)]
pub struct RecordingMotor {
    log: Arc<Mutex<MotorLog>>,
}

#[derive(Debug, Default, Clone)]
pub struct MotorLog {
    pub enabled: bool,
    pub commands: Vec<i32>,
    /// When each entry of `commands` was applied.
    pub stamps: Vec<Instant>,
    pub enables: u32,
    pub disables: u32,
}

impl RecordingMotor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MotorLog {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn last_command(&self) -> Option<i32> {
        self.snapshot().commands.last().copied()
    }
}

impl Motor for RecordingMotor {
    fn enable(&mut self) -> Result<(), BoxError> {
        let mut log = self.log.lock().map_err(|_| "motor log poisoned")?;
        log.enabled = true;
        log.enables += 1;
        Ok(())
    }

    fn disable(&mut self) -> Result<(), BoxError> {
        let mut log = self.log.lock().map_err(|_| "motor log poisoned")?;
        log.enabled = false;
        log.disables += 1;
        Ok(())
    }

    fn actuate(&mut self, control: i32) -> Result<(), BoxError> {
        let mut log = self.log.lock().map_err(|_| "motor log poisoned")?;
        log.commands.push(control);
        log.stamps.push(Instant::now());
        Ok(())
    }
}

/// Encoder that advances by a fixed step on every read, wrapping at 16 bits.
#[derive(Clone)]
pub struct SteppingEncoder {
    count: Arc<AtomicI16>,
    step: i16,
}

impl SteppingEncoder {
    pub fn new(start: i16, step: i16) -> Self {
        Self {
            count: Arc::new(AtomicI16::new(start)),
            step,
        }
    }
}

impl Encoder for SteppingEncoder {
    fn read_count(&mut self) -> Result<i16, BoxError> {
        let step = self.step;
        let prev = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some(c.wrapping_add(step))
            })
            .unwrap_or_else(|c| c);
        Ok(prev.wrapping_add(step))
    }
}
