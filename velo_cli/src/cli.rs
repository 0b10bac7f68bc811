//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

/// Held until exit so buffered file logs are flushed; see `main::flush_logs`.
pub static FILE_GUARD: Mutex<Option<tracing_appender::non_blocking::WorkerGuard>> =
    Mutex::new(None);
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

/// Config file picked up when `--config` is not given.
pub const DEFAULT_CONFIG: &str = "etc/velo.toml";

#[derive(Parser, Debug)]
#[command(name = "velo", version, about = "Networked PI motor velocity control")]
pub struct Cli {
    /// Path to config TOML [default: etc/velo.toml if present, else built-in defaults]
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    #[inline]
    pub fn os_default() -> Self {
        if cfg!(target_os = "linux") {
            Self::Current
        } else {
            Self::None
        }
    }
}

/// Flags shared by the node subcommands.
#[derive(clap::Args, Debug, Clone)]
pub struct RunOpts {
    /// Stop after this many milliseconds (default: run until Ctrl-C)
    #[arg(long, value_name = "MS")]
    pub run_ms: Option<u64>,

    /// Enable real-time mode (per-task SCHED_FIFO, mlockall)
    #[arg(
        long,
        action = ArgAction::SetTrue,
        long_help = "Enable real-time mode on supported OSes.\n\nLinux: every task thread is promoted to SCHED_FIFO with the priority from the [rt] config section, and the address space is locked into RAM. Needs CAP_SYS_NICE/CAP_IPC_LOCK (or root) and a sufficient 'ulimit -l'.\n\nOther OSes: only memory locking is attempted."
    )]
    pub rt: bool,

    /// Select memory locking mode for --rt: none, current, or all
    #[arg(long, value_enum, value_name = "MODE")]
    pub rt_lock: Option<RtLock>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the sensing/actuation node against the simulated motor
    Sensor {
        /// Compute node address (overrides node.peer)
        #[arg(long, value_name = "ADDR")]
        peer: Option<String>,
        #[command(flatten)]
        run: RunOpts,
    },
    /// Run the compute node (PI controller and reference)
    Compute {
        /// Listen address (overrides node.listen)
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,
        #[command(flatten)]
        run: RunOpts,
    },
    /// Run sensing, control and actuation on one node, without a network
    Local {
        #[command(flatten)]
        run: RunOpts,
    },
    /// Load and validate the config, then print the effective settings
    SelfCheck,
}
