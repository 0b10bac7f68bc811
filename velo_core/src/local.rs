//! Standalone single-node loop.
//!
//! Encoder, PI law and motor on one board: every control period the control
//! task samples, computes and actuates in one step, while a second task flips
//! the reference. There is no transport and no session, so nothing here can
//! time out; the loop ends on shutdown or on the first hardware error.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{self as xch, select};
use velo_traits::{Clock, Encoder, MonotonicClock, Motor};

use crate::controller::PiController;
use crate::coordinator::{TaskKind, ThreadTuner, Timing, spawn_task};
use crate::error::{BuildError, LinkError};
use crate::estimator::VelocityEstimator;
use crate::hw_error::map_hw_error;
use crate::reference::ReferenceGenerator;

/// What one local run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalStats {
    /// Completed sample/compute/actuate steps.
    pub steps: u64,
    /// Reference sign flips.
    pub toggles: u64,
    pub last_velocity: i32,
    pub last_control: i32,
}

enum Wake {
    Tick,
    Stop,
}

pub struct LocalLoop<E, M> {
    encoder: E,
    motor: M,
    estimator: VelocityEstimator,
    controller: PiController,
    reference: Arc<ReferenceGenerator>,
    timing: Timing,
    clock: Arc<dyn Clock + Send + Sync>,
    tuner: Option<ThreadTuner>,
}

impl<E: Encoder, M: Motor> LocalLoop<E, M> {
    /// Only `control_period` and `reference_period` of `timing` are used.
    pub fn new(
        encoder: E,
        motor: M,
        estimator: VelocityEstimator,
        controller: PiController,
        reference: ReferenceGenerator,
        timing: Timing,
    ) -> Result<Self, BuildError> {
        timing.validate()?;
        Ok(Self {
            encoder,
            motor,
            estimator,
            controller,
            reference: Arc::new(reference),
            timing,
            clock: Arc::new(MonotonicClock::new()),
            tuner: None,
        })
    }

    pub fn thread_tuner(mut self, tuner: ThreadTuner) -> Self {
        self.tuner = Some(tuner);
        self
    }

    pub fn reference(&self) -> Arc<ReferenceGenerator> {
        Arc::clone(&self.reference)
    }

    pub fn estimator(&self) -> &VelocityEstimator {
        &self.estimator
    }

    pub fn controller(&self) -> &PiController {
        &self.controller
    }

    /// Run until `shutdown` is set. The control task is the calling thread.
    ///
    /// The motor is zeroed and disabled on every way out, and the estimator
    /// and controller are reset so a second `run` starts cold.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<LocalStats, LinkError> {
        self.estimator.reset();
        self.controller.reset();
        self.reference.reset();
        if let Err(e) = self.enable_motor() {
            self.make_safe();
            return Err(e);
        }

        let (stop_tx, stop_rx) = xch::bounded::<()>(0);
        let reference = Arc::clone(&self.reference);
        let period = self.timing.reference_period;
        let toggler = match spawn_task(TaskKind::Reference, self.tuner.clone(), move || {
            toggle_loop(&reference, period, &stop_rx)
        }) {
            Ok(handle) => handle,
            Err(e) => {
                self.make_safe();
                return Err(e);
            }
        };
        if let Some(tune) = &self.tuner {
            tune(TaskKind::Control);
        }
        tracing::info!(
            period_ms = self.timing.control_period.as_millis() as u64,
            reference_period_ms = period.as_millis() as u64,
            "local loop started"
        );

        let result = self.control_loop(shutdown);
        self.make_safe();
        drop(stop_tx);
        let toggles = toggler.join().unwrap_or_else(|e| {
            tracing::error!(task = %TaskKind::Reference, ?e, "task panicked");
            0
        });
        self.estimator.reset();
        self.controller.reset();

        match result {
            Ok(stats) => {
                tracing::info!(steps = stats.steps, toggles, "local loop stopped");
                Ok(LocalStats { toggles, ..stats })
            }
            Err(e) => {
                tracing::warn!(kind = e.kind(), error = %e, "local loop failed");
                Err(e)
            }
        }
    }

    fn control_loop(&mut self, shutdown: &AtomicBool) -> Result<LocalStats, LinkError> {
        let ticker = xch::tick(self.timing.control_period);
        let epoch: Instant = self.clock.now();
        let mut stats = LocalStats::default();
        while !shutdown.load(Ordering::Relaxed) {
            if ticker.recv().is_err() {
                break;
            }
            let count = self
                .encoder
                .read_count()
                .map_err(|e| map_hw_error(e.as_ref()))?;
            let timestamp_ms = self.clock.tick_ms(epoch);
            let velocity = self.estimator.sample(count, timestamp_ms);
            let setpoint = self.reference.current();
            let control = self.controller.compute(setpoint, velocity, timestamp_ms);
            self.motor
                .actuate(control)
                .map_err(|e| map_hw_error(e.as_ref()))?;
            tracing::trace!(count, velocity, setpoint, control, timestamp_ms, "local step");

            stats.steps += 1;
            stats.last_velocity = velocity;
            stats.last_control = control;
        }
        Ok(stats)
    }

    fn enable_motor(&mut self) -> Result<(), LinkError> {
        self.motor.actuate(0).map_err(|e| map_hw_error(e.as_ref()))?;
        self.motor.enable().map_err(|e| map_hw_error(e.as_ref()))
    }

    fn make_safe(&mut self) {
        if let Err(e) = self.motor.actuate(0) {
            tracing::error!(error = %e, "failed to zero motor output");
        }
        if let Err(e) = self.motor.disable() {
            tracing::error!(error = %e, "failed to disable motor");
        }
    }
}

fn toggle_loop(reference: &ReferenceGenerator, period: Duration, stop: &xch::Receiver<()>) -> u64 {
    let ticker = xch::tick(period);
    let mut toggles = 0;
    loop {
        let wake = select! {
            recv(stop) -> _ => Wake::Stop,
            recv(ticker) -> _ => Wake::Tick,
        };
        if matches!(wake, Wake::Stop) {
            break;
        }
        let value = reference.toggle();
        toggles += 1;
        tracing::debug!(reference = value, "reference toggled");
    }
    toggles
}
