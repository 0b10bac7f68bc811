//! Velocity from a free-running 16-bit quadrature count.

use crate::fixed_point::{div_round_half_away, saturate_i32, wrapping_step_i16};

/// Milliseconds per minute; converts counts/ms into counts/min.
const MS_PER_MIN: i128 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimatorParams {
    /// Counts per mechanical revolution, after quadrature decoding.
    pub counts_per_rev: u32,
    /// EMA weight of the newest sample is `alpha_num / alpha_den`.
    pub alpha_num: u32,
    pub alpha_den: u32,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            counts_per_rev: 44,
            alpha_num: 1,
            alpha_den: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VelocityEstimator {
    params: EstimatorParams,
    prev_count: i16,
    prev_timestamp: u32,
    filtered: i32,
    initialized: bool,
}

impl VelocityEstimator {
    pub fn new(params: EstimatorParams) -> Self {
        let alpha_den = params.alpha_den.max(1);
        let params = EstimatorParams {
            counts_per_rev: params.counts_per_rev.max(1),
            alpha_num: params.alpha_num.clamp(1, alpha_den),
            alpha_den,
        };
        Self {
            params,
            prev_count: 0,
            prev_timestamp: 0,
            filtered: 0,
            initialized: false,
        }
    }

    pub fn reset(&mut self) {
        self.prev_count = 0;
        self.prev_timestamp = 0;
        self.filtered = 0;
        self.initialized = false;
    }

    /// Feed one counter reading; returns the filtered velocity in RPM.
    pub fn sample(&mut self, raw_count: i16, timestamp_ms: u32) -> i32 {
        if !self.initialized {
            self.prev_count = raw_count;
            self.prev_timestamp = timestamp_ms;
            self.filtered = 0;
            self.initialized = true;
            return 0;
        }

        let dt = timestamp_ms.wrapping_sub(self.prev_timestamp);
        if dt == 0 {
            return self.filtered;
        }

        let diff = wrapping_step_i16(self.prev_count, raw_count);
        let inst = div_round_half_away(
            i128::from(diff) * MS_PER_MIN,
            i128::from(self.params.counts_per_rev) * i128::from(dt),
        );
        let inst = saturate_i32(inst as i64);

        self.filtered = if self.params.alpha_num == self.params.alpha_den {
            inst
        } else {
            let a = i128::from(self.params.alpha_num);
            let d = i128::from(self.params.alpha_den);
            let mixed = a * i128::from(inst) + (d - a) * i128::from(self.filtered);
            saturate_i32(div_round_half_away(mixed, d) as i64)
        };

        self.prev_count = raw_count;
        self.prev_timestamp = timestamp_ms;
        self.filtered
    }

    pub fn filtered(&self) -> i32 {
        self.filtered
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn params(&self) -> &EstimatorParams {
        &self.params
    }
}

impl Default for VelocityEstimator {
    fn default() -> Self {
        Self::new(EstimatorParams::default())
    }
}
