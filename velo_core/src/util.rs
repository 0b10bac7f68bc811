//! Common time/period helpers for velo_core.
use std::time::Duration;

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Bound on waiting for the peer's answer: two control periods.
#[inline]
pub fn response_timeout(period: Duration) -> Duration {
    period.saturating_mul(2)
}

/// Deadline for the compute node to put its command on the wire.
/// - Strictly less than one period for every period the builder accepts (>= 2 ms).
/// - Never below 1 ms.
#[inline]
pub fn command_deadline(period: Duration) -> Duration {
    period
        .saturating_sub(Duration::from_millis(1))
        .max(Duration::from_millis(1))
}

/// Control frequency in Hz for a given period (rounded down, at least 1).
#[inline]
pub fn rate_hz(period: Duration) -> u64 {
    let ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX).max(1);
    (MILLIS_PER_SEC / ms).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_stays_inside_every_valid_period() {
        for ms in 2..=1_000 {
            let period = Duration::from_millis(ms);
            let deadline = command_deadline(period);
            assert!(deadline < period, "period {ms} ms");
            assert!(deadline >= Duration::from_millis(1));
        }
    }

    #[test]
    fn rate_rounds_down() {
        assert_eq!(rate_hz(Duration::from_millis(10)), 100);
        assert_eq!(rate_hz(Duration::from_millis(3)), 333);
        assert_eq!(rate_hz(Duration::from_secs(5)), 1);
    }
}
