//! Fixed-point PI velocity controller with anti-windup.
//!
//! Gains are integer ratios so fractional values stay exact:
//! `Kp = kp / kp_den` and `Ki = ki / ki_den` per `ki_time_scale_ms`.
//! All products are formed in 128-bit and saturated back to i64; nothing in
//! `compute` can overflow or fail.

use crate::fixed_point::{CONTROL_MAX, CONTROL_MIN, saturate_i64};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gains {
    pub kp: i64,
    pub kp_den: i64,
    pub ki: i64,
    pub ki_den: i64,
    /// Milliseconds per Ki time unit (1000 for a per-second Ki).
    pub ki_time_scale_ms: i64,
}

impl Default for Gains {
    fn default() -> Self {
        Self {
            kp: 300_000,
            kp_den: 1,
            ki: 400_000,
            ki_den: 1,
            ki_time_scale_ms: 1000,
        }
    }
}

impl Gains {
    /// Integer gains, Ki per second.
    pub fn new(kp: i64, ki: i64) -> Self {
        Self {
            kp,
            ki,
            ..Self::default()
        }
    }

    fn proportional(&self, error: i64) -> i64 {
        let num = i128::from(self.kp) * i128::from(error);
        saturate_i64(num / i128::from(self.kp_den.max(1)))
    }

    fn integral_increment(&self, error: i64, dt_ms: u32) -> i64 {
        let num = i128::from(self.ki) * i128::from(error) * i128::from(dt_ms);
        let den = i128::from(self.ki_den.max(1)) * i128::from(self.ki_time_scale_ms.max(1));
        saturate_i64(num / den)
    }
}

#[derive(Debug, Clone)]
pub struct PiController {
    gains: Gains,
    integrator: i64,
    prev_timestamp: u32,
    initialized: bool,
}

impl PiController {
    pub fn new(gains: Gains) -> Self {
        Self {
            gains,
            integrator: 0,
            prev_timestamp: 0,
            initialized: false,
        }
    }

    /// Forget all history; the next `compute` only records its timestamp.
    pub fn reset(&mut self) {
        self.integrator = 0;
        self.prev_timestamp = 0;
        self.initialized = false;
    }

    /// One control step. `timestamp_ms` is the sample's wrapping millisecond tick.
    pub fn compute(&mut self, reference: i32, measured: i32, timestamp_ms: u32) -> i32 {
        if !self.initialized {
            self.prev_timestamp = timestamp_ms;
            self.initialized = true;
            return 0;
        }

        let dt = timestamp_ms.wrapping_sub(self.prev_timestamp);
        if dt == 0 {
            return 0;
        }

        let error = i64::from(reference) - i64::from(measured);
        let proportional = self.gains.proportional(error);
        self.integrator = self
            .integrator
            .saturating_add(self.gains.integral_increment(error, dt));

        let raw = proportional.saturating_add(self.integrator);
        let max = i64::from(CONTROL_MAX);
        let min = i64::from(CONTROL_MIN);
        let output = if raw > max {
            // Back-calculate so P + I sits exactly on the bound.
            self.integrator = max.saturating_sub(proportional);
            max
        } else if raw < min {
            self.integrator = min.saturating_sub(proportional);
            min
        } else {
            raw
        };

        self.prev_timestamp = timestamp_ms;
        output as i32
    }

    pub fn integrator(&self) -> i64 {
        self.integrator
    }

    pub fn previous_timestamp(&self) -> u32 {
        self.prev_timestamp
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn gains(&self) -> &Gains {
        &self.gains
    }
}

impl Default for PiController {
    fn default() -> Self {
        Self::new(Gains::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_records_baseline_only() {
        let mut pi = PiController::default();
        assert_eq!(pi.compute(2000, -5000, 1234), 0);
        assert!(pi.is_initialized());
        assert_eq!(pi.previous_timestamp(), 1234);
        assert_eq!(pi.integrator(), 0);
    }

    #[test]
    fn fractional_proportional_gain() {
        let gains = Gains {
            kp: 3,
            kp_den: 2,
            ki: 0,
            ..Gains::default()
        };
        let mut pi = PiController::new(gains);
        pi.compute(0, 0, 0);
        assert_eq!(pi.compute(100, 0, 10), 150);
    }

    #[test]
    fn dt_wraps_across_u32() {
        let mut pi = PiController::new(Gains::new(0, 1000));
        pi.compute(0, 0, u32::MAX - 4);
        // dt = 10 ms across the wrap: 1000 * 100 * 10 / 1000
        assert_eq!(pi.compute(100, 0, 5), 1000);
        assert_eq!(pi.integrator(), 1000);
    }

    #[test]
    fn negative_saturation_rewrites_integrator() {
        let mut pi = PiController::default();
        pi.compute(0, 0, 0);
        let out = pi.compute(-10_000, 0, 10);
        assert_eq!(out, CONTROL_MIN);
        let p = -300_000i64 * 10_000;
        assert_eq!(pi.integrator(), i64::from(CONTROL_MIN) - p);
    }
}
