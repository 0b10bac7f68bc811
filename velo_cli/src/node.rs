//! Node assembly: config mapping, simulated plant, transport, and the run loop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use velo_config::Config;
use velo_core::error::LinkError;
use velo_core::{
    ComputeRole, Coordinator, LocalLoop, NodeRole, PiController, ReferenceGenerator,
    SensorActuatorRole, SessionState, TaskKind, Timing, Transition, VelocityEstimator,
};
use velo_hardware::sim::PlantParams;
use velo_hardware::{SimPlant, TcpAcceptor, TcpConnector};
use velo_traits::Connector;

use crate::cli::RunOpts;
use crate::rt;

/// Granularity of the `--run-ms` timer's shutdown check.
const TIMER_POLL: Duration = Duration::from_millis(50);
/// Transition events buffered for the session log before new ones are dropped.
const OBSERVER_QUEUE: usize = 64;

/// What a node run did, printed when it stops.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub node: &'static str,
    pub sessions: u64,
    /// Lost sessions per fault kind; "shutdown" for orderly local stops.
    pub losses: BTreeMap<&'static str, u64>,
    pub last_fault: Option<String>,
    /// Control steps, for the local node (which has no sessions).
    pub steps: Option<u64>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "node": self.node,
            "sessions": self.sessions,
            "losses": self.losses,
            "last_fault": self.last_fault,
            "steps": self.steps,
            "elapsed_ms": self.elapsed_ms,
        })
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.steps {
            Some(steps) => write!(
                f,
                "{} node stopped: steps={steps} elapsed_ms={}",
                self.node, self.elapsed_ms
            )?,
            None => write!(
                f,
                "{} node stopped: sessions={} elapsed_ms={}",
                self.node, self.sessions, self.elapsed_ms
            )?,
        }
        for (kind, n) in &self.losses {
            write!(f, " lost[{kind}]={n}")?;
        }
        if let Some(fault) = &self.last_fault {
            write!(f, " last_fault=\"{fault}\"")?;
        }
        Ok(())
    }
}

pub fn plant_params(cfg: &Config) -> PlantParams {
    PlantParams {
        max_rpm: f64::from(cfg.simulation.max_rpm),
        time_constant: Duration::from_millis(cfg.simulation.time_constant_ms),
        counts_per_rev: cfg.estimator.counts_per_rev,
    }
}

/// Sensing/actuation node: simulated plant, dials the compute node.
pub fn run_sensor(
    cfg: &Config,
    peer: &str,
    opts: &RunOpts,
    shutdown: Arc<AtomicBool>,
) -> eyre::Result<RunSummary> {
    let plant = SimPlant::new(plant_params(cfg));
    let estimator = VelocityEstimator::new((&cfg.estimator).into());
    let role = SensorActuatorRole::new(plant.encoder(), plant.motor(), estimator);
    tracing::info!(%peer, "sensor node starting");
    let summary = run_node(role, TcpConnector::new(peer), cfg, opts, shutdown)?;
    tracing::info!(
        rpm = plant.rpm(),
        last_command = plant.last_command(),
        enabled = plant.is_enabled(),
        "plant at stop"
    );
    Ok(summary)
}

/// Compute node: PI controller plus reference, accepts one sensor at a time.
pub fn run_compute(
    cfg: &Config,
    listen: &str,
    opts: &RunOpts,
    shutdown: Arc<AtomicBool>,
) -> eyre::Result<RunSummary> {
    let acceptor = TcpAcceptor::bind(listen, Duration::from_millis(cfg.timing.accept_poll_ms))
        .map_err(|e| LinkError::Config(e.to_string()))?;
    tracing::info!(addr = %acceptor.local_addr()?, "compute node listening");
    let role = ComputeRole::new(
        PiController::new((&cfg.controller).into()),
        ReferenceGenerator::from(&cfg.reference),
    );
    run_node(role, acceptor, cfg, opts, shutdown)
}

/// Sensing, PI and actuation on one node against the simulated plant.
pub fn run_local(
    cfg: &Config,
    opts: &RunOpts,
    shutdown: Arc<AtomicBool>,
) -> eyre::Result<RunSummary> {
    let started = Instant::now();
    let plant = SimPlant::new(plant_params(cfg));
    let mut local = LocalLoop::new(
        plant.encoder(),
        plant.motor(),
        VelocityEstimator::new((&cfg.estimator).into()),
        PiController::new((&cfg.controller).into()),
        ReferenceGenerator::from(&cfg.reference),
        Timing::from(&cfg.timing),
    )?;
    if let Some(tuner) = rt::setup(opts.rt, opts.rt_lock, &cfg.rt) {
        local = local.thread_tuner(tuner);
    }
    let timer = opts
        .run_ms
        .map(|ms| spawn_run_timer(Duration::from_millis(ms), Arc::clone(&shutdown)))
        .transpose()?;

    tracing::info!("local node starting");
    let result = local.run(&shutdown);
    shutdown.store(true, Ordering::Relaxed);
    if let Some(t) = timer {
        let _ = t.join();
    }
    tracing::info!(
        rpm = plant.rpm(),
        last_command = plant.last_command(),
        enabled = plant.is_enabled(),
        "plant at stop"
    );
    let stats = result?;

    Ok(RunSummary {
        node: "local",
        steps: Some(stats.steps),
        elapsed_ms: started.elapsed().as_millis() as u64,
        ..RunSummary::default()
    })
}

fn run_node<R, C>(
    role: R,
    connector: C,
    cfg: &Config,
    opts: &RunOpts,
    shutdown: Arc<AtomicBool>,
) -> eyre::Result<RunSummary>
where
    R: NodeRole,
    C: Connector,
{
    let started = Instant::now();
    let node = role.name();
    let (obs_tx, obs_rx) = xch::bounded(OBSERVER_QUEUE);

    let mut builder = Coordinator::builder()
        .role(role)
        .connector(connector)
        .timing(Timing::from(&cfg.timing))
        .shutdown(Arc::clone(&shutdown))
        .observer(obs_tx);
    if let Some(tuner) = rt::setup(opts.rt, opts.rt_lock, &cfg.rt) {
        // The coordinator itself runs on this thread.
        tuner(TaskKind::Lifecycle);
        builder = builder.thread_tuner(tuner);
    }
    let mut coordinator = builder.build()?;

    let log = spawn_session_log(obs_rx)?;
    let timer = opts
        .run_ms
        .map(|ms| spawn_run_timer(Duration::from_millis(ms), Arc::clone(&shutdown)))
        .transpose()?;

    let result = coordinator.run();
    // A natural return (e.g. an error) must also release the timer.
    shutdown.store(true, Ordering::Relaxed);

    let sessions = coordinator.sessions();
    let last_fault = coordinator.last_fault().map(ToString::to_string);
    // Dropping the coordinator closes the observer channel and ends the log thread.
    drop(coordinator);
    let losses = log.join().unwrap_or_default();
    if let Some(t) = timer {
        let _ = t.join();
    }
    result?;

    Ok(RunSummary {
        node,
        sessions,
        losses,
        last_fault,
        steps: None,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

fn spawn_session_log(
    rx: xch::Receiver<Transition>,
) -> std::io::Result<JoinHandle<BTreeMap<&'static str, u64>>> {
    thread::Builder::new()
        .name("velo-session-log".into())
        .spawn(move || {
            let mut losses = BTreeMap::new();
            for t in rx {
                if t.to == SessionState::Lost {
                    let kind = t.fault.as_ref().map_or("shutdown", LinkError::kind);
                    *losses.entry(kind).or_insert(0) += 1;
                }
                tracing::debug!(session = t.session, from = %t.from, to = %t.to, "transition observed");
            }
            losses
        })
}

fn spawn_run_timer(limit: Duration, shutdown: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("velo-run-timer".into())
        .spawn(move || {
            let deadline = Instant::now() + limit;
            while !shutdown.load(Ordering::Relaxed) {
                let now = Instant::now();
                if now >= deadline {
                    tracing::info!(run_ms = limit.as_millis() as u64, "run time reached");
                    shutdown.store(true, Ordering::Relaxed);
                    break;
                }
                thread::sleep((deadline - now).min(TIMER_POLL));
            }
        })
}

/// Effective settings after defaults and validation, as printed by `self-check`.
pub fn effective_settings(cfg: &Config) -> serde_json::Value {
    let timing = Timing::from(&cfg.timing);
    let gains = velo_core::Gains::from(&cfg.controller);
    let reference = ReferenceGenerator::from(&cfg.reference);
    serde_json::json!({
        "node": { "peer": cfg.node.peer, "listen": cfg.node.listen },
        "timing": {
            "control_period_ms": cfg.timing.control_period_ms,
            "rate_hz": velo_core::util::rate_hz(timing.control_period),
            "response_timeout_ms": timing.response_timeout().as_millis() as u64,
            "command_deadline_ms": timing.command_deadline().as_millis() as u64,
            "reference_period_ms": cfg.timing.reference_period_ms,
            "connect_timeout_ms": cfg.timing.connect_timeout_ms,
            "backoff_ms": cfg.timing.backoff_ms,
        },
        "controller": {
            "kp": gains.kp, "kp_den": gains.kp_den,
            "ki": gains.ki, "ki_den": gains.ki_den,
            "ki_time_scale_ms": gains.ki_time_scale_ms,
        },
        "estimator": {
            "counts_per_rev": cfg.estimator.counts_per_rev,
            "alpha": format!("{}/{}", cfg.estimator.alpha_num, cfg.estimator.alpha_den),
        },
        "reference": {
            "initial": reference.initial(),
            "policy": format!("{:?}", reference.policy()),
        },
        "simulation": {
            "max_rpm": cfg.simulation.max_rpm,
            "time_constant_ms": cfg.simulation.time_constant_ms,
        },
    })
}

/// Exercise the simulated plant briefly: enable, half duty, read the encoder.
pub fn check_plant(cfg: &Config) -> eyre::Result<i16> {
    use velo_traits::{Encoder, Motor};
    let plant = SimPlant::new(plant_params(cfg));
    let mut motor = plant.motor();
    let mut encoder = plant.encoder();
    motor.actuate(0).map_err(|e| eyre::eyre!("sim motor: {e}"))?;
    motor.enable().map_err(|e| eyre::eyre!("sim motor: {e}"))?;
    let count = encoder
        .read_count()
        .map_err(|e| eyre::eyre!("sim encoder: {e}"))?;
    motor.actuate(0).map_err(|e| eyre::eyre!("sim motor: {e}"))?;
    motor.disable().map_err(|e| eyre::eyre!("sim motor: {e}"))?;
    Ok(count)
}
