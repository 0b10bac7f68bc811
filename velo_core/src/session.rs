//! Session lifecycle: Disconnected -> Connecting -> Connected -> Lost -> Disconnected.
//!
//! Only the coordinator owns a `SessionMachine` and mutates the state. Every
//! task reads it through a `SessionWatch`, which is a lock-free snapshot of
//! the same value.
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use crossbeam_channel as xch;

use crate::error::LinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Lost = 3,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Lost => "lost",
        }
    }

    /// The complete transition table.
    pub fn can_transition_to(self, next: Self) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Lost)
                | (Lost, Disconnected)
        )
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Lost,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the session state, shared with every task.
#[derive(Debug, Clone)]
pub struct SessionWatch(Arc<AtomicU8>);

impl SessionWatch {
    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.get() == SessionState::Connected
    }
}

/// One accepted transition, as reported to an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    /// 1-based number of the session this transition belongs to.
    pub session: u64,
    pub fault: Option<LinkError>,
    /// When the machine accepted the transition.
    pub at: Instant,
}

#[derive(Debug)]
pub struct SessionMachine {
    state: Arc<AtomicU8>,
    observer: Option<xch::Sender<Transition>>,
    sessions: u64,
    last_fault: Option<LinkError>,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(SessionState::Disconnected as u8)),
            observer: None,
            sessions: 0,
            last_fault: None,
        }
    }

    /// Report every accepted transition on `tx`. Never blocks: a full
    /// observer channel just misses events.
    pub fn with_observer(mut self, tx: xch::Sender<Transition>) -> Self {
        self.observer = Some(tx);
        self
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn watch(&self) -> SessionWatch {
        SessionWatch(Arc::clone(&self.state))
    }

    /// Number of sessions that reached Connected.
    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    pub fn last_fault(&self) -> Option<&LinkError> {
        self.last_fault.as_ref()
    }

    pub fn begin_connect(&mut self) -> Result<(), LinkError> {
        self.transition(SessionState::Connecting, None)
    }

    pub fn connected(&mut self) -> Result<(), LinkError> {
        self.transition(SessionState::Connected, None)
    }

    pub fn connect_failed(&mut self, fault: LinkError) -> Result<(), LinkError> {
        self.transition(SessionState::Disconnected, Some(fault))
    }

    /// Connected -> Lost. `fault` is `None` for an orderly local shutdown.
    pub fn lost(&mut self, fault: Option<LinkError>) -> Result<(), LinkError> {
        self.transition(SessionState::Lost, fault)
    }

    pub fn disconnected(&mut self) -> Result<(), LinkError> {
        self.transition(SessionState::Disconnected, None)
    }

    fn transition(&mut self, to: SessionState, fault: Option<LinkError>) -> Result<(), LinkError> {
        let from = self.state();
        if !from.can_transition_to(to) {
            tracing::error!(%from, %to, "rejected session transition");
            return Err(LinkError::State(format!("{from} -> {to}")));
        }
        if to == SessionState::Connected {
            self.sessions += 1;
        }
        self.state.store(to as u8, Ordering::Release);

        match &fault {
            Some(f) => tracing::info!(%from, %to, session = self.sessions, reason = %f, "session"),
            None => tracing::info!(%from, %to, session = self.sessions, "session"),
        }
        if let Some(tx) = &self.observer {
            let _ = tx.try_send(Transition {
                from,
                to,
                session: self.sessions,
                fault: fault.clone(),
                at: Instant::now(),
            });
        }
        if let Some(f) = fault {
            self.last_fault = Some(f);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_follows_machine() {
        let mut m = SessionMachine::new();
        let w = m.watch();
        assert_eq!(w.get(), SessionState::Disconnected);
        m.begin_connect().unwrap();
        m.connected().unwrap();
        assert!(w.is_connected());
        m.lost(Some(LinkError::Timeout)).unwrap();
        assert_eq!(w.get(), SessionState::Lost);
        assert_eq!(m.last_fault(), Some(&LinkError::Timeout));
    }

    #[test]
    fn rejected_transition_leaves_state() {
        let mut m = SessionMachine::new();
        let err = m.connected().unwrap_err();
        assert!(matches!(err, LinkError::State(_)));
        assert_eq!(m.state(), SessionState::Disconnected);
        assert_eq!(m.sessions(), 0);
    }
}
