//! The two node roles: sensing/actuation and compute.
//!
//! Per-session state (encoder + estimator, PI controller) lives behind a mutex
//! the role keeps a handle to. Tasks lock it once per step, and `stop` resets
//! it after joining them, so a task that panics mid-step cannot take the state
//! down with it.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{self as xch, select};
use velo_traits::{Clock, Encoder, MonotonicClock, Motor, Transport};

use crate::controller::PiController;
use crate::coordinator::{NodeRole, SessionCtx, TaskKind};
use crate::error::LinkError;
use crate::estimator::VelocityEstimator;
use crate::hw_error::map_hw_error;
use crate::reference::ReferenceGenerator;
use crate::session::SessionWatch;
use crate::slot::Mailbox;
use crate::wire::{self, CommandRecord, SampleRecord};

type SharedClock = Arc<dyn Clock + Send + Sync>;

/// Join a task thread, logging instead of propagating a panic.
fn join_task(handle: Option<JoinHandle<()>>, kind: TaskKind) {
    if let Some(Err(e)) = handle.map(JoinHandle::join) {
        tracing::error!(task = %kind, ?e, "task panicked");
    }
}

/// Lock even if a task panicked while holding the lock: the safe-state path
/// and the next session must always get through.
fn lock_or_recover<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Sensing / actuation ──────────────────────────────────────────────────────

struct Sensing<E> {
    encoder: E,
    estimator: VelocityEstimator,
}

/// Apply a command, but only while the session is still Connected.
/// The check happens under the motor lock, so nothing lands after `force_safe`.
fn drive<M: Motor>(motor: &Mutex<M>, watch: &SessionWatch, control: i32) -> Result<(), LinkError> {
    let mut m = lock_or_recover(motor);
    if !watch.is_connected() {
        tracing::trace!(control, "command outside session dropped");
        return Ok(());
    }
    m.actuate(control).map_err(|e| map_hw_error(e.as_ref()))
}

fn zero_output<M: Motor>(motor: &Mutex<M>) {
    if let Err(e) = lock_or_recover(motor).actuate(0) {
        tracing::error!(error = %e, "failed to zero motor output");
    }
}

enum Wake {
    Tick,
    Stop,
}

enum Reply {
    Command(CommandRecord),
    Late,
    Stop,
}

pub struct SensorActuatorRole<E, M> {
    sensing: Arc<Mutex<Sensing<E>>>,
    motor: Arc<Mutex<M>>,
    clock: SharedClock,
    epoch: Instant,
    control: Option<JoinHandle<()>>,
    comm: Option<JoinHandle<()>>,
}

impl<E, M> SensorActuatorRole<E, M>
where
    E: Encoder + Send + 'static,
    M: Motor + Send + 'static,
{
    pub fn new(encoder: E, motor: M, estimator: VelocityEstimator) -> Self {
        Self::with_clock(encoder, motor, estimator, Arc::new(MonotonicClock::new()))
    }

    /// Timestamps in sample records are `clock.tick_ms(epoch)`, with the epoch
    /// taken here.
    pub fn with_clock(
        encoder: E,
        motor: M,
        estimator: VelocityEstimator,
        clock: SharedClock,
    ) -> Self {
        let epoch = clock.now();
        Self {
            sensing: Arc::new(Mutex::new(Sensing { encoder, estimator })),
            motor: Arc::new(Mutex::new(motor)),
            clock,
            epoch,
            control: None,
            comm: None,
        }
    }

    /// Snapshot of the estimator between control steps.
    pub fn estimator(&self) -> VelocityEstimator {
        lock_or_recover(&self.sensing).estimator.clone()
    }

    fn enable_motor(&self) -> Result<(), LinkError> {
        let mut m = lock_or_recover(&self.motor);
        m.actuate(0).map_err(|e| map_hw_error(e.as_ref()))?;
        m.enable().map_err(|e| map_hw_error(e.as_ref()))
    }
}

fn sense_loop<E: Encoder, M: Motor>(
    sensing: Arc<Mutex<Sensing<E>>>,
    motor: Arc<Mutex<M>>,
    samples: Mailbox<SampleRecord>,
    commands: Mailbox<CommandRecord>,
    clock: SharedClock,
    epoch: Instant,
    ctx: SessionCtx,
) {
    let ticker = xch::tick(ctx.timing.control_period);
    let response = ctx.timing.response_timeout();
    loop {
        let wake = select! {
            recv(ctx.stop_signal()) -> _ => Wake::Stop,
            recv(ticker) -> _ => Wake::Tick,
        };
        if matches!(wake, Wake::Stop) || !ctx.watch.is_connected() {
            break;
        }

        // A command that arrives after its deadline belongs to an old sample.
        commands.clear();
        let (count, velocity, timestamp_ms) = {
            let mut sensing = lock_or_recover(&sensing);
            let count = match sensing.encoder.read_count() {
                Ok(c) => c,
                Err(e) => {
                    zero_output(&motor);
                    ctx.report(map_hw_error(e.as_ref()));
                    break;
                }
            };
            let timestamp_ms = clock.tick_ms(epoch);
            (count, sensing.estimator.sample(count, timestamp_ms), timestamp_ms)
        };
        tracing::trace!(count, velocity, timestamp_ms, "sample");
        samples.publish(SampleRecord {
            velocity,
            timestamp_ms,
        });

        let reply = select! {
            recv(ctx.stop_signal()) -> _ => Reply::Stop,
            recv(commands.receiver()) -> cmd => cmd.map_or(Reply::Stop, Reply::Command),
            recv(xch::after(response)) -> _ => Reply::Late,
        };
        match reply {
            Reply::Command(cmd) => {
                if let Err(e) = drive(&motor, &ctx.watch, cmd.control) {
                    zero_output(&motor);
                    ctx.report(e);
                    break;
                }
            }
            Reply::Late => {
                zero_output(&motor);
                ctx.report(LinkError::Timeout);
                break;
            }
            Reply::Stop => break,
        }
    }
}

fn sensor_comm_loop(
    link: Arc<dyn Transport>,
    samples: Mailbox<SampleRecord>,
    commands: Mailbox<CommandRecord>,
    ctx: SessionCtx,
) {
    let response = ctx.timing.response_timeout();
    loop {
        let next = select! {
            recv(ctx.stop_signal()) -> _ => None,
            recv(samples.receiver()) -> s => s.ok(),
            recv(xch::after(response)) -> _ => {
                ctx.report(LinkError::State("no sample from control task".into()));
                None
            }
        };
        let Some(sample) = next else { break };
        if !ctx.watch.is_connected() {
            break;
        }
        if let Err(e) = wire::send_record(&*link, &sample, response) {
            ctx.report(e);
            break;
        }
        match wire::recv_record::<CommandRecord, _>(&*link, response) {
            Ok(cmd) => {
                commands.publish(cmd);
            }
            Err(e) => {
                if !ctx.is_stopped() {
                    ctx.report(e);
                }
                break;
            }
        }
    }
}

impl<E, M> NodeRole for SensorActuatorRole<E, M>
where
    E: Encoder + Send + 'static,
    M: Motor + Send + 'static,
{
    fn name(&self) -> &'static str {
        "sensor"
    }

    fn start(&mut self, link: Arc<dyn Transport>, ctx: SessionCtx) -> Result<(), LinkError> {
        self.enable_motor()?;
        lock_or_recover(&self.sensing).estimator.reset();

        let samples = Mailbox::new();
        let commands = Mailbox::new();

        let control = {
            let (sensing, motor) = (Arc::clone(&self.sensing), Arc::clone(&self.motor));
            let (samples, commands) = (samples.clone(), commands.clone());
            let (clock, epoch, task_ctx) = (Arc::clone(&self.clock), self.epoch, ctx.clone());
            ctx.spawn(TaskKind::Control, move || {
                sense_loop(sensing, motor, samples, commands, clock, epoch, task_ctx)
            })?
        };
        self.control = Some(control);

        let task_ctx = ctx.clone();
        self.comm = Some(ctx.spawn(TaskKind::Comm, move || {
            sensor_comm_loop(link, samples, commands, task_ctx)
        })?);
        Ok(())
    }

    fn force_safe(&mut self) {
        let mut m = lock_or_recover(&self.motor);
        if let Err(e) = m.actuate(0) {
            tracing::error!(error = %e, "failed to zero motor output");
        }
        if let Err(e) = m.disable() {
            tracing::error!(error = %e, "failed to disable motor");
        }
        tracing::debug!("motor forced safe");
    }

    fn stop(&mut self) {
        join_task(self.comm.take(), TaskKind::Comm);
        join_task(self.control.take(), TaskKind::Control);
        lock_or_recover(&self.sensing).estimator.reset();
    }
}

// ── Compute ──────────────────────────────────────────────────────────────────

pub struct ComputeRole {
    controller: Arc<Mutex<PiController>>,
    reference: Arc<ReferenceGenerator>,
    comm: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl ComputeRole {
    pub fn new(controller: PiController, reference: ReferenceGenerator) -> Self {
        Self {
            controller: Arc::new(Mutex::new(controller)),
            reference: Arc::new(reference),
            comm: None,
            ticker: None,
        }
    }

    /// Snapshot of the controller between control steps.
    pub fn controller(&self) -> PiController {
        lock_or_recover(&self.controller).clone()
    }

    pub fn reference(&self) -> Arc<ReferenceGenerator> {
        Arc::clone(&self.reference)
    }
}

fn compute_loop(
    link: Arc<dyn Transport>,
    controller: Arc<Mutex<PiController>>,
    reference: Arc<ReferenceGenerator>,
    ctx: SessionCtx,
) {
    let response = ctx.timing.response_timeout();
    let deadline = ctx.timing.command_deadline();
    while !ctx.is_stopped() {
        let mut sample = match wire::recv_record::<SampleRecord, _>(&*link, response) {
            Ok(s) => s,
            Err(e) => {
                if !ctx.is_stopped() {
                    ctx.report(e);
                }
                break;
            }
        };
        // Several samples queued up: only the newest one matters.
        let mut stale = 0u32;
        loop {
            match wire::try_recv_record::<SampleRecord, _>(&*link, response) {
                Ok(Some(newer)) => {
                    sample = newer;
                    stale += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    if !ctx.is_stopped() {
                        ctx.report(e);
                    }
                    return;
                }
            }
        }
        if stale > 0 {
            tracing::debug!(stale, "dropped stale samples");
        }
        if !ctx.watch.is_connected() {
            continue;
        }

        let setpoint = reference.current();
        let control =
            lock_or_recover(&controller).compute(setpoint, sample.velocity, sample.timestamp_ms);
        tracing::trace!(
            setpoint,
            velocity = sample.velocity,
            timestamp_ms = sample.timestamp_ms,
            control,
            "control step"
        );
        if let Err(e) = wire::send_record(&*link, &CommandRecord { control }, deadline) {
            ctx.report(e);
            break;
        }
    }
}

fn reference_loop(reference: Arc<ReferenceGenerator>, ctx: SessionCtx) {
    let ticker = xch::tick(ctx.timing.reference_period);
    loop {
        let wake = select! {
            recv(ctx.stop_signal()) -> _ => Wake::Stop,
            recv(ticker) -> _ => Wake::Tick,
        };
        if matches!(wake, Wake::Stop) {
            break;
        }
        if let Some(value) = reference.tick(ctx.watch.get()) {
            tracing::debug!(reference = value, "reference toggled");
        }
    }
}

impl NodeRole for ComputeRole {
    fn name(&self) -> &'static str {
        "compute"
    }

    fn start(&mut self, link: Arc<dyn Transport>, ctx: SessionCtx) -> Result<(), LinkError> {
        lock_or_recover(&self.controller).reset();
        self.reference.on_connect();

        let controller = Arc::clone(&self.controller);
        let (reference, task_ctx) = (Arc::clone(&self.reference), ctx.clone());
        self.comm = Some(ctx.spawn(TaskKind::Comm, move || {
            compute_loop(link, controller, reference, task_ctx)
        })?);

        let (reference, task_ctx) = (Arc::clone(&self.reference), ctx.clone());
        self.ticker = Some(ctx.spawn(TaskKind::Reference, move || {
            reference_loop(reference, task_ctx)
        })?);
        Ok(())
    }

    fn force_safe(&mut self) {
        // No actuator on this node; the peer zeroes its own output on timeout.
        tracing::trace!("compute node has no actuator to force");
    }

    fn stop(&mut self) {
        join_task(self.ticker.take(), TaskKind::Reference);
        join_task(self.comm.take(), TaskKind::Comm);
        lock_or_recover(&self.controller).reset();
    }
}
