//! Square-wave velocity setpoint.
//!
//! One writer (the reference task or the lifecycle task between sessions),
//! many readers (the compute task), so the value lives in an atomic.
use std::sync::atomic::{AtomicI32, Ordering};

use crate::session::SessionState;

/// What happens to the setpoint when a new session comes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetPolicy {
    /// Restore the initial value before the session's tasks start.
    #[default]
    ResetOnConnect,
    /// Carry the last value over from the previous session.
    Keep,
}

#[derive(Debug)]
pub struct ReferenceGenerator {
    value: AtomicI32,
    initial: i32,
    policy: ResetPolicy,
}

impl ReferenceGenerator {
    pub fn new(initial: i32, policy: ResetPolicy) -> Self {
        Self {
            value: AtomicI32::new(initial),
            initial,
            policy,
        }
    }

    pub fn current(&self) -> i32 {
        self.value.load(Ordering::Acquire)
    }

    pub fn initial(&self) -> i32 {
        self.initial
    }

    pub fn policy(&self) -> ResetPolicy {
        self.policy
    }

    /// Toggle the sign of the setpoint, but only while Connected.
    /// Returns the new value when a toggle happened.
    pub fn tick(&self, state: SessionState) -> Option<i32> {
        if state != SessionState::Connected {
            return None;
        }
        Some(self.toggle())
    }

    /// Unconditional toggle; returns the new setpoint.
    pub fn toggle(&self) -> i32 {
        let prev = self.value.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
            Some(v.wrapping_neg())
        });
        // fetch_update with an always-Some closure cannot fail
        prev.unwrap_or_else(|v| v).wrapping_neg()
    }

    /// Apply the reset policy for a freshly established session.
    pub fn on_connect(&self) {
        if self.policy == ResetPolicy::ResetOnConnect {
            self.reset();
        }
    }

    pub fn reset(&self) {
        self.value.store(self.initial, Ordering::Release);
    }
}

impl Default for ReferenceGenerator {
    fn default() -> Self {
        Self::new(2000, ResetPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn toggles_while_connected() {
        let r = ReferenceGenerator::default();
        assert_eq!(r.tick(SessionState::Connected), Some(-2000));
        assert_eq!(r.tick(SessionState::Connected), Some(2000));
        assert_eq!(r.current(), 2000);
    }

    #[rstest]
    #[case(SessionState::Disconnected)]
    #[case(SessionState::Connecting)]
    #[case(SessionState::Lost)]
    fn suppressed_outside_connected(#[case] state: SessionState) {
        let r = ReferenceGenerator::default();
        assert_eq!(r.tick(state), None);
        assert_eq!(r.current(), 2000);
    }

    #[test]
    fn reset_on_connect_restores_initial() {
        let r = ReferenceGenerator::new(1500, ResetPolicy::ResetOnConnect);
        r.tick(SessionState::Connected);
        assert_eq!(r.current(), -1500);
        r.on_connect();
        assert_eq!(r.current(), 1500);
    }

    #[test]
    fn keep_policy_carries_value_across_sessions() {
        let r = ReferenceGenerator::new(1500, ResetPolicy::Keep);
        r.tick(SessionState::Connected);
        r.on_connect();
        assert_eq!(r.current(), -1500);
    }
}
