//! Connection lifecycle shared by both node roles.
//!
//! The coordinator runs on the lifecycle task (the caller's thread). Per
//! session it:
//! 1. drives Disconnected -> Connecting and asks the connector for a link;
//! 2. on success moves to Connected and lets the role reset its state and
//!    spawn its periodic tasks;
//! 3. waits for the first fault any task reports (or a shutdown request);
//! 4. moves to Lost, forces the actuator safe, cancels the tasks (stop
//!    channel dropped, link closed so blocked I/O returns), joins them and
//!    lets the role reset again;
//! 5. moves to Disconnected and starts over.
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use velo_traits::{Connector, Transport};

use crate::error::{BuildError, LinkError};
use crate::hw_error::map_link_error;
use crate::session::{SessionMachine, SessionState, SessionWatch, Transition};
use crate::util;

/// Longest the lifecycle task sleeps before re-checking the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);
/// Faults beyond the first few in one session carry no extra information.
const FAULT_QUEUE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub control_period: Duration,
    pub reference_period: Duration,
    pub connect_timeout: Duration,
    pub backoff: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            control_period: Duration::from_millis(10),
            reference_period: Duration::from_millis(4000),
            connect_timeout: Duration::from_millis(1000),
            backoff: Duration::from_millis(500),
        }
    }
}

impl Timing {
    /// How long a node waits for its peer's next record.
    pub fn response_timeout(&self) -> Duration {
        util::response_timeout(self.control_period)
    }

    /// How long the compute node may take to put a command on the wire.
    pub fn command_deadline(&self) -> Duration {
        util::command_deadline(self.control_period)
    }

    pub(crate) fn validate(&self) -> Result<(), BuildError> {
        // The command deadline is one millisecond shorter than the period.
        if self.control_period < Duration::from_millis(2) {
            return Err(BuildError::InvalidConfig("control period must be >= 2 ms"));
        }
        if self.reference_period <= self.control_period {
            return Err(BuildError::InvalidConfig(
                "reference period must be longer than the control period",
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(BuildError::InvalidConfig("connect timeout must be > 0"));
        }
        Ok(())
    }
}

/// The periodic tasks a node runs, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Control,
    Comm,
    Reference,
    Lifecycle,
}

impl TaskKind {
    pub fn thread_name(self) -> &'static str {
        match self {
            Self::Control => "velo-control",
            Self::Comm => "velo-comm",
            Self::Reference => "velo-reference",
            Self::Lifecycle => "velo-lifecycle",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.thread_name())
    }
}

/// Called first thing on every spawned task thread (e.g. to apply SCHED_FIFO).
pub type ThreadTuner = Arc<dyn Fn(TaskKind) + Send + Sync>;

/// What one session's tasks share. Each task gets its own clone.
#[derive(Clone)]
pub struct SessionCtx {
    pub watch: SessionWatch,
    pub timing: Timing,
    stop: xch::Receiver<()>,
    faults: xch::Sender<LinkError>,
    tuner: Option<ThreadTuner>,
}

impl SessionCtx {
    /// Becomes ready (disconnected) when the session ends; use in `select!`.
    pub fn stop_signal(&self) -> &xch::Receiver<()> {
        &self.stop
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.stop.try_recv(), Err(xch::TryRecvError::Disconnected))
    }

    /// Report a fault to the lifecycle task. Never blocks.
    pub fn report(&self, fault: LinkError) {
        tracing::warn!(kind = fault.kind(), %fault, "session fault");
        let _ = self.faults.try_send(fault);
    }

    /// Spawn a named task thread, running the tuner hook first.
    pub fn spawn<T, F>(&self, kind: TaskKind, f: F) -> Result<JoinHandle<T>, LinkError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        spawn_task(kind, self.tuner.clone(), f)
    }
}

/// Spawn a named task thread; `tuner` runs on it before `f`.
pub fn spawn_task<T, F>(
    kind: TaskKind,
    tuner: Option<ThreadTuner>,
    f: F,
) -> Result<JoinHandle<T>, LinkError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    thread::Builder::new()
        .name(kind.thread_name().into())
        .spawn(move || {
            if let Some(tune) = tuner {
                tune(kind);
            }
            f()
        })
        .map_err(|e| LinkError::State(format!("spawn {kind}: {e}")))
}

/// One node's side of the control loop.
pub trait NodeRole {
    fn name(&self) -> &'static str;

    /// Session is Connected: reset per-session state, then spawn the tasks.
    fn start(&mut self, link: Arc<dyn Transport>, ctx: SessionCtx) -> Result<(), LinkError>;

    /// Session is Lost: put the actuator in its safe state now.
    fn force_safe(&mut self);

    /// Join the session's tasks (already cancelled) and reset state.
    fn stop(&mut self);
}

pub struct Coordinator<R, C> {
    role: R,
    connector: C,
    machine: SessionMachine,
    timing: Timing,
    shutdown: Arc<AtomicBool>,
    tuner: Option<ThreadTuner>,
    max_sessions: Option<u64>,
}

impl<R: NodeRole, C: Connector> Coordinator<R, C> {
    pub fn builder() -> CoordinatorBuilder<R, C> {
        CoordinatorBuilder::default()
    }

    /// Run sessions until shutdown is requested (or `max_sessions` is reached).
    pub fn run(&mut self) -> crate::error::Result<()> {
        tracing::info!(
            role = self.role.name(),
            period_ms = self.timing.control_period.as_millis() as u64,
            rate_hz = util::rate_hz(self.timing.control_period),
            "coordinator started"
        );
        while !self.shutdown_requested() {
            if self
                .max_sessions
                .is_some_and(|max| self.machine.sessions() >= max)
            {
                break;
            }
            self.machine.begin_connect()?;
            match self.connector.establish(self.timing.connect_timeout) {
                Ok(link) => {
                    if !self.run_session(link)? {
                        // Role could not even start: don't spin on a fresh link.
                        self.backoff();
                    }
                }
                Err(e) => {
                    let fault = map_link_error(e.as_ref());
                    tracing::debug!(reason = %fault, "connect attempt failed");
                    self.machine.connect_failed(fault)?;
                    self.backoff();
                }
            }
        }
        tracing::info!(sessions = self.machine.sessions(), "coordinator stopped");
        Ok(())
    }

    /// Returns whether the role managed to start its tasks.
    fn run_session(&mut self, link: C::Link) -> Result<bool, LinkError> {
        let link: Arc<dyn Transport> = Arc::new(link);
        self.machine.connected()?;

        let (stop_tx, stop_rx) = xch::bounded::<()>(0);
        let (fault_tx, fault_rx) = xch::bounded(FAULT_QUEUE);
        let ctx = SessionCtx {
            watch: self.machine.watch(),
            timing: self.timing,
            stop: stop_rx,
            faults: fault_tx,
            tuner: self.tuner.clone(),
        };

        let (fault, started) = match self.role.start(Arc::clone(&link), ctx) {
            Ok(()) => (self.supervise(&fault_rx), true),
            Err(e) => {
                tracing::warn!(kind = e.kind(), error = %e, "role failed to start");
                (Some(e), false)
            }
        };

        let lost_at = Instant::now();
        self.machine.lost(fault)?;
        self.role.force_safe();
        drop(stop_tx);
        link.close();
        self.role.stop();
        tracing::debug!(
            teardown_us = lost_at.elapsed().as_micros() as u64,
            "session torn down"
        );
        self.machine.disconnected()?;
        Ok(started)
    }

    /// Block until a task reports a fault. `None` means shutdown was requested.
    fn supervise(&self, faults: &xch::Receiver<LinkError>) -> Option<LinkError> {
        let poll = self.timing.control_period.min(SHUTDOWN_POLL);
        loop {
            match faults.recv_timeout(poll) {
                Ok(fault) => return Some(fault),
                Err(xch::RecvTimeoutError::Timeout) => {
                    if self.shutdown_requested() {
                        return None;
                    }
                }
                Err(xch::RecvTimeoutError::Disconnected) => {
                    return Some(LinkError::State("session tasks exited".into()));
                }
            }
        }
    }

    fn backoff(&self) {
        let deadline = Instant::now() + self.timing.backoff;
        while !self.shutdown_requested() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SHUTDOWN_POLL));
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn watch(&self) -> SessionWatch {
        self.machine.watch()
    }

    pub fn sessions(&self) -> u64 {
        self.machine.sessions()
    }

    pub fn last_fault(&self) -> Option<&LinkError> {
        self.machine.last_fault()
    }

    /// Set this flag to make `run` wind down the current session and return.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn role(&self) -> &R {
        &self.role
    }

    pub fn into_role(self) -> R {
        self.role
    }
}

pub struct CoordinatorBuilder<R, C> {
    role: Option<R>,
    connector: Option<C>,
    timing: Timing,
    shutdown: Option<Arc<AtomicBool>>,
    observer: Option<xch::Sender<Transition>>,
    tuner: Option<ThreadTuner>,
    max_sessions: Option<u64>,
}

impl<R, C> Default for CoordinatorBuilder<R, C> {
    fn default() -> Self {
        Self {
            role: None,
            connector: None,
            timing: Timing::default(),
            shutdown: None,
            observer: None,
            tuner: None,
            max_sessions: None,
        }
    }
}

impl<R: NodeRole, C: Connector> CoordinatorBuilder<R, C> {
    pub fn role(mut self, role: R) -> Self {
        self.role = Some(role);
        self
    }

    pub fn connector(mut self, connector: C) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Share an externally owned shutdown flag (e.g. set from a Ctrl-C handler).
    pub fn shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn observer(mut self, tx: xch::Sender<Transition>) -> Self {
        self.observer = Some(tx);
        self
    }

    pub fn thread_tuner(mut self, tuner: ThreadTuner) -> Self {
        self.tuner = Some(tuner);
        self
    }

    /// Return from `run` once this many sessions have come and gone.
    pub fn max_sessions(mut self, n: u64) -> Self {
        self.max_sessions = Some(n);
        self
    }

    pub fn build(self) -> Result<Coordinator<R, C>, BuildError> {
        let role = self.role.ok_or(BuildError::MissingRole)?;
        let connector = self.connector.ok_or(BuildError::MissingConnector)?;
        self.timing.validate()?;
        if self.max_sessions == Some(0) {
            return Err(BuildError::InvalidConfig("max_sessions must be >= 1"));
        }

        let mut machine = SessionMachine::new();
        if let Some(tx) = self.observer {
            machine = machine.with_observer(tx);
        }
        Ok(Coordinator {
            role,
            connector,
            machine,
            timing: self.timing,
            shutdown: self.shutdown.unwrap_or_default(),
            tuner: self.tuner,
            max_sessions: self.max_sessions,
        })
    }
}
