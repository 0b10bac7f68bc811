#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Networked PI velocity control (hardware-agnostic).
//!
//! The sensing/actuation node samples a quadrature encoder, ships the
//! velocity to the compute node, and applies the command that comes back.
//! Hardware and the byte stream are reached only through `velo_traits`.
//!
//! ## Architecture
//!
//! - **Control**: fixed-point PI law with anti-windup (`controller`)
//! - **Sensing**: wrap-safe velocity estimate with optional EMA (`estimator`)
//! - **Setpoint**: square-wave reference gated on the session (`reference`)
//! - **Wire**: fixed-size little-endian records (`wire`)
//! - **Session**: lifecycle state machine and its lock-free watch (`session`)
//! - **Coordinator**: per-session task orchestration (`coordinator`, `roles`)
//! - **Local**: single-board sample/compute/actuate loop, no transport (`local`)
//!
//! ## Fixed-Point Arithmetic
//!
//! Control output is a signed duty in units of 2^-30 within
//! `[CONTROL_MIN, CONTROL_MAX]`; velocities are whole RPM. See `fixed_point`.

pub mod controller;
pub mod conversions;
pub mod coordinator;
pub mod error;
pub mod estimator;
pub mod fixed_point;
pub mod hw_error;
pub mod local;
pub mod mocks;
pub mod reference;
pub mod roles;
pub mod session;
pub mod slot;
pub mod util;
pub mod wire;

pub use controller::{Gains, PiController};
pub use coordinator::{
    Coordinator, CoordinatorBuilder, NodeRole, SessionCtx, TaskKind, ThreadTuner, Timing,
};
pub use error::{BuildError, LinkError, Report, Result};
pub use estimator::{EstimatorParams, VelocityEstimator};
pub use local::{LocalLoop, LocalStats};
pub use fixed_point::{CONTROL_MAX, CONTROL_MIN};
pub use reference::{ReferenceGenerator, ResetPolicy};
pub use roles::{ComputeRole, SensorActuatorRole};
pub use session::{SessionMachine, SessionState, SessionWatch, Transition};
pub use wire::{CommandRecord, SampleRecord};
