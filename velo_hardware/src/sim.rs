//! Simulated DC motor with a quadrature encoder.
//!
//! One shared rotor model: `SimMotor` sets the duty, `SimEncoder` reads the
//! accumulated count. The rotor follows the commanded speed with a first-order
//! lag and is integrated lazily, on every access, from the plant's clock.
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use velo_traits::{BoxError, Clock, Encoder, MonotonicClock, Motor};

use crate::error::HwError;

/// Control units corresponding to 100% duty (2^30).
const FULL_SCALE: f64 = (1u64 << 30) as f64;

#[derive(Debug, Clone, Copy)]
pub struct PlantParams {
    /// Free-running speed at full duty (RPM).
    pub max_rpm: f64,
    /// Rotor time constant.
    pub time_constant: Duration,
    /// Encoder counts per revolution.
    pub counts_per_rev: u32,
}

impl Default for PlantParams {
    fn default() -> Self {
        Self {
            max_rpm: 6000.0,
            time_constant: Duration::from_millis(80),
            counts_per_rev: 44,
        }
    }
}

#[derive(Debug)]
struct Rotor {
    params: PlantParams,
    enabled: bool,
    duty: f64,
    last_command: i32,
    rpm: f64,
    /// Whole counts, wrapping like the 16-bit hardware counter.
    count: i16,
    /// Sub-count remainder carried between updates.
    frac: f64,
    last_update: Instant,
}

impl Rotor {
    fn advance(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.last_update = now;
        if dt <= 0.0 {
            return;
        }
        let target = if self.enabled {
            self.duty * self.params.max_rpm
        } else {
            0.0
        };
        let tau = self.params.time_constant.as_secs_f64().max(1e-6);
        self.rpm += (target - self.rpm) * (1.0 - (-dt / tau).exp());

        let counts = self.rpm / 60.0 * f64::from(self.params.counts_per_rev) * dt + self.frac;
        let whole = counts.trunc();
        self.frac = counts - whole;
        // `as i64 as i16` truncates to the low 16 bits: hardware wraparound.
        self.count = self.count.wrapping_add((whole as i64) as i16);
    }
}

/// Handle to the shared rotor; cheap to clone across threads.
#[derive(Clone)]
pub struct SimPlant {
    rotor: Arc<Mutex<Rotor>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl SimPlant {
    pub fn new(params: PlantParams) -> Self {
        Self::with_clock(params, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(params: PlantParams, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let rotor = Rotor {
            params,
            enabled: false,
            duty: 0.0,
            last_command: 0,
            rpm: 0.0,
            count: 0,
            frac: 0.0,
            last_update: clock.now(),
        };
        Self {
            rotor: Arc::new(Mutex::new(rotor)),
            clock,
        }
    }

    pub fn motor(&self) -> SimMotor {
        SimMotor {
            plant: self.clone(),
        }
    }

    pub fn encoder(&self) -> SimEncoder {
        SimEncoder {
            plant: self.clone(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Rotor>, HwError> {
        let mut rotor = self
            .rotor
            .lock()
            .map_err(|_| HwError::Device("plant lock poisoned".into()))?;
        rotor.advance(self.clock.now());
        Ok(rotor)
    }

    /// Current rotor speed (RPM); 0.0 if the model is unavailable.
    pub fn rpm(&self) -> f64 {
        self.lock().map(|r| r.rpm).unwrap_or(0.0)
    }

    /// Last command applied through `SimMotor::actuate`.
    pub fn last_command(&self) -> i32 {
        self.lock().map(|r| r.last_command).unwrap_or(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().map(|r| r.enabled).unwrap_or(false)
    }
}

pub struct SimMotor {
    plant: SimPlant,
}

impl Motor for SimMotor {
    fn enable(&mut self) -> Result<(), BoxError> {
        self.plant.lock()?.enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> Result<(), BoxError> {
        self.plant.lock()?.enabled = false;
        Ok(())
    }

    fn actuate(&mut self, control: i32) -> Result<(), BoxError> {
        let mut rotor = self.plant.lock()?;
        rotor.last_command = control;
        rotor.duty = (f64::from(control) / FULL_SCALE).clamp(-1.0, 1.0);
        tracing::trace!(control, duty = rotor.duty, "sim actuate");
        Ok(())
    }
}

pub struct SimEncoder {
    plant: SimPlant,
}

impl Encoder for SimEncoder {
    fn read_count(&mut self) -> Result<i16, BoxError> {
        Ok(self.plant.lock()?.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velo_traits::clock::test_clock::TestClock;

    fn plant_with(clock: &TestClock) -> SimPlant {
        SimPlant::with_clock(PlantParams::default(), Arc::new(clock.clone()))
    }

    #[test]
    fn disabled_bridge_ignores_duty() {
        let clock = TestClock::new();
        let plant = plant_with(&clock);
        let mut motor = plant.motor();
        motor.actuate(1 << 29).unwrap();
        clock.advance(Duration::from_secs(1));
        assert_eq!(plant.rpm(), 0.0);
        assert_eq!(plant.last_command(), 1 << 29);
    }

    #[rstest::rstest]
    #[case::idle(0, 0.0)]
    #[case::quarter(1 << 28, 1500.0)]
    #[case::half(1 << 29, 3000.0)]
    #[case::full(1 << 30, 6000.0)]
    #[case::beyond_full_clamps(i32::MAX, 6000.0)]
    #[case::half_reverse(-(1 << 29), -3000.0)]
    #[case::beyond_reverse_clamps(i32::MIN, -6000.0)]
    fn duty_settles_at_proportional_speed(#[case] control: i32, #[case] rpm: f64) {
        let clock = TestClock::new();
        let plant = plant_with(&clock);
        let mut motor = plant.motor();
        motor.enable().unwrap();
        motor.actuate(control).unwrap();
        for _ in 0..200 {
            clock.advance(Duration::from_millis(10));
            let _ = plant.rpm();
        }
        assert!((plant.rpm() - rpm).abs() < 1.0, "rpm {}", plant.rpm());
        assert_eq!(plant.last_command(), control);
    }

    #[test]
    fn reverse_duty_counts_down() {
        let clock = TestClock::new();
        let plant = plant_with(&clock);
        let mut motor = plant.motor();
        let mut encoder = plant.encoder();
        motor.enable().unwrap();
        motor.actuate(-(1 << 30)).unwrap();
        clock.advance(Duration::from_secs(1));
        assert!(encoder.read_count().unwrap() < 0);
    }
}
