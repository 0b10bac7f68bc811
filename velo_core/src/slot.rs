//! Single-slot "latest value wins" handoff between two tasks.
//!
//! A `bounded(1)` channel: the producer never blocks, it evicts the stale value
//! instead; the consumer waits on `receiver()` (usually inside `select!`).
use crossbeam_channel::{self as xch, TrySendError};
use std::time::Duration;

#[derive(Debug)]
pub struct Mailbox<T> {
    tx: xch::Sender<T>,
    rx: xch::Receiver<T>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        let (tx, rx) = xch::bounded(1);
        Self { tx, rx }
    }

    /// Store `value`, overwriting whatever was not yet taken.
    /// Returns `true` if an older value was discarded.
    pub fn publish(&self, value: T) -> bool {
        match self.tx.try_send(value) {
            Ok(()) => false,
            Err(TrySendError::Full(value)) => {
                // Single producer: once the stale value is gone the slot stays free for us.
                let evicted = self.rx.try_recv().is_ok();
                let _ = self.tx.try_send(value);
                evicted
            }
            // Both ends live in `self`.
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn take(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Drop any pending value.
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    pub fn receiver(&self) -> &xch::Receiver<T> {
        &self.rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_value_wins() {
        let slot = Mailbox::new();
        assert!(!slot.publish(1));
        assert!(slot.publish(2));
        assert!(slot.publish(3));
        assert_eq!(slot.take(), Some(3));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn clear_empties_slot() {
        let slot = Mailbox::new();
        slot.publish("stale");
        slot.clear();
        assert_eq!(slot.take_timeout(Duration::from_millis(1)), None);
    }

    #[test]
    fn handoff_across_threads() {
        let slot = Mailbox::new();
        let producer = slot.clone();
        let h = std::thread::spawn(move || {
            for i in 0..100u32 {
                producer.publish(i);
            }
        });
        h.join().unwrap();
        assert_eq!(slot.take(), Some(99));
    }
}
