#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the velocity-control nodes.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//! - Every section has defaults matching the reference deployment, so an
//!   empty file (or no file at all) yields a runnable configuration.
use serde::Deserialize;
use std::path::Path;

/// Default TCP port the compute node listens on.
pub const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NodeCfg {
    /// Address the sensing/actuation node connects to.
    pub peer: String,
    /// Address the compute node listens on.
    pub listen: String,
}

impl Default for NodeCfg {
    fn default() -> Self {
        Self {
            peer: format!("192.168.0.10:{DEFAULT_PORT}"),
            listen: format!("0.0.0.0:{DEFAULT_PORT}"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimingCfg {
    /// Control period (ms): one sample out, one command back.
    pub control_period_ms: u64,
    /// Reference toggle period (ms).
    pub reference_period_ms: u64,
    /// Max time a single connect/accept attempt may take (ms).
    pub connect_timeout_ms: u64,
    /// Delay between failed connection attempts (ms).
    pub backoff_ms: u64,
    /// Poll interval while waiting for an inbound connection (ms).
    pub accept_poll_ms: u64,
}

impl Default for TimingCfg {
    fn default() -> Self {
        Self {
            control_period_ms: 10,
            reference_period_ms: 4000,
            connect_timeout_ms: 1000,
            backoff_ms: 500,
            accept_poll_ms: 100,
        }
    }
}

/// PI gains as integer ratios.
///
/// Kp = kp / kp_den  [control units / RPM]
/// Ki = ki / ki_den  [control units / (RPM * time unit)], where one time unit
/// is `ki_time_scale_ms` milliseconds (1000 = per second).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ControllerCfg {
    pub kp: i64,
    pub kp_den: i64,
    pub ki: i64,
    pub ki_den: i64,
    pub ki_time_scale_ms: i64,
}

impl Default for ControllerCfg {
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

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EstimatorCfg {
    /// Encoder counts per mechanical revolution (pulses * 4 for quadrature).
    pub counts_per_rev: u32,
    /// EMA weight of the newest sample is alpha_num / alpha_den.
    /// Equal values disable smoothing.
    pub alpha_num: u32,
    pub alpha_den: u32,
}

impl Default for EstimatorCfg {
    fn default() -> Self {
        Self {
            counts_per_rev: 44,
            alpha_num: 1,
            alpha_den: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReferenceCfg {
    /// Setpoint (RPM) at the start of a session.
    pub initial: i32,
    /// Restore `initial` whenever a new session is established.
    pub reset_on_connect: bool,
}

impl Default for ReferenceCfg {
    fn default() -> Self {
        Self {
            initial: 2000,
            reset_on_connect: true,
        }
    }
}

/// Parameters of the simulated motor used when no hardware is attached.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimulationCfg {
    /// Speed reached at full duty (RPM).
    pub max_rpm: u32,
    /// First-order time constant of the rotor (ms).
    pub time_constant_ms: u64,
}

impl Default for SimulationCfg {
    fn default() -> Self {
        Self {
            max_rpm: 6000,
            time_constant_ms: 80,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// SCHED_FIFO priorities applied per task when real-time mode is on.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RtCfg {
    pub control_priority: i32,
    pub comm_priority: i32,
    pub reference_priority: i32,
    pub lifecycle_priority: i32,
}

impl Default for RtCfg {
    fn default() -> Self {
        Self {
            control_priority: 80,
            comm_priority: 70,
            reference_priority: 40,
            lifecycle_priority: 30,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub node: NodeCfg,
    pub timing: TimingCfg,
    pub controller: ControllerCfg,
    pub estimator: EstimatorCfg,
    pub reference: ReferenceCfg,
    pub simulation: SimulationCfg,
    pub logging: Logging,
    pub rt: RtCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read, parse and validate a config file.
pub fn load_file(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {}: {}", path.display(), e))?;
    let cfg = load_toml(&text).map_err(|e| eyre::eyre!("parse config {}: {}", path.display(), e))?;
    cfg.validate()?;
    Ok(cfg)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Node
        if self.node.peer.trim().is_empty() {
            eyre::bail!("node.peer must not be empty");
        }
        if self.node.listen.trim().is_empty() {
            eyre::bail!("node.listen must not be empty");
        }

        // Timing
        let t = &self.timing;
        // The compute node's send deadline is one millisecond under the period.
        if t.control_period_ms < 2 {
            eyre::bail!("timing.control_period_ms must be >= 2");
        }
        if t.control_period_ms > 10_000 {
            eyre::bail!("timing.control_period_ms is unreasonably large (>10s)");
        }
        if t.reference_period_ms <= t.control_period_ms {
            eyre::bail!("timing.reference_period_ms must be greater than timing.control_period_ms");
        }
        if t.connect_timeout_ms == 0 {
            eyre::bail!("timing.connect_timeout_ms must be >= 1");
        }
        if t.accept_poll_ms == 0 {
            eyre::bail!("timing.accept_poll_ms must be >= 1");
        }

        // Controller
        let c = &self.controller;
        if c.kp_den <= 0 || c.ki_den <= 0 {
            eyre::bail!("controller.kp_den and controller.ki_den must be > 0");
        }
        if c.ki_time_scale_ms <= 0 {
            eyre::bail!("controller.ki_time_scale_ms must be > 0");
        }
        if c.kp < 0 || c.ki < 0 {
            eyre::bail!("controller gains must be >= 0");
        }
        let gain_cap = i64::from(i32::MAX);
        if c.kp > gain_cap || c.ki > gain_cap || c.kp_den > gain_cap || c.ki_den > gain_cap {
            eyre::bail!("controller gains must fit in 31 bits");
        }

        // Estimator
        let e = &self.estimator;
        if e.counts_per_rev == 0 {
            eyre::bail!("estimator.counts_per_rev must be >= 1");
        }
        if e.alpha_den == 0 || e.alpha_num == 0 {
            eyre::bail!("estimator.alpha_num and estimator.alpha_den must be >= 1");
        }
        if e.alpha_num > e.alpha_den {
            eyre::bail!("estimator.alpha_num must be <= estimator.alpha_den");
        }

        // Simulation
        if self.simulation.time_constant_ms == 0 {
            eyre::bail!("simulation.time_constant_ms must be >= 1");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly, got {rot:?}");
        }

        // RT
        let r = &self.rt;
        for (name, p) in [
            ("rt.control_priority", r.control_priority),
            ("rt.comm_priority", r.comm_priority),
            ("rt.reference_priority", r.reference_priority),
            ("rt.lifecycle_priority", r.lifecycle_priority),
        ] {
            if !(1..=99).contains(&p) {
                eyre::bail!("{name} must be in 1..=99");
            }
        }

        Ok(())
    }
}
