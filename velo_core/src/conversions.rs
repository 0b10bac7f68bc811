//! `From` implementations bridging `velo_config` types to `velo_core` types.

use std::time::Duration;

use crate::controller::Gains;
use crate::coordinator::Timing;
use crate::estimator::EstimatorParams;
use crate::reference::{ReferenceGenerator, ResetPolicy};

// ── Gains ────────────────────────────────────────────────────────────────────

impl From<&velo_config::ControllerCfg> for Gains {
    fn from(c: &velo_config::ControllerCfg) -> Self {
        Self {
            kp: c.kp,
            kp_den: c.kp_den,
            ki: c.ki,
            ki_den: c.ki_den,
            ki_time_scale_ms: c.ki_time_scale_ms,
        }
    }
}

// ── EstimatorParams ──────────────────────────────────────────────────────────

impl From<&velo_config::EstimatorCfg> for EstimatorParams {
    fn from(c: &velo_config::EstimatorCfg) -> Self {
        Self {
            counts_per_rev: c.counts_per_rev,
            alpha_num: c.alpha_num,
            alpha_den: c.alpha_den,
        }
    }
}

// ── Timing ───────────────────────────────────────────────────────────────────

impl From<&velo_config::TimingCfg> for Timing {
    fn from(c: &velo_config::TimingCfg) -> Self {
        Self {
            control_period: Duration::from_millis(c.control_period_ms),
            reference_period: Duration::from_millis(c.reference_period_ms),
            connect_timeout: Duration::from_millis(c.connect_timeout_ms),
            backoff: Duration::from_millis(c.backoff_ms),
        }
    }
}

// ── Reference ────────────────────────────────────────────────────────────────

impl From<&velo_config::ReferenceCfg> for ResetPolicy {
    fn from(c: &velo_config::ReferenceCfg) -> Self {
        if c.reset_on_connect {
            Self::ResetOnConnect
        } else {
            Self::Keep
        }
    }
}

impl From<&velo_config::ReferenceCfg> for ReferenceGenerator {
    fn from(c: &velo_config::ReferenceCfg) -> Self {
        Self::new(c.initial, ResetPolicy::from(c))
    }
}
