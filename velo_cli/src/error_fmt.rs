//! Human-readable error descriptions, exit codes and structured JSON errors.

use thiserror::Error;
use velo_core::error::{BuildError, LinkError};

/// Failures raised by the CLI itself, before any node runs.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("read config {path}: {reason}")]
    ConfigRead { path: String, reason: String },
    #[error("invalid configuration in {path}: {reason}")]
    ConfigInvalid { path: String, reason: String },
    #[error("logging setup failed: {0}")]
    Logging(String),
}

/// Stable process exit codes. Clap reports usage errors with 2 on its own.
pub mod exit {
    pub const OK: i32 = 0;
    pub const GENERIC: i32 = 1;
    pub const CONFIG: i32 = 3;
    pub const TIMEOUT: i32 = 4;
    pub const TRANSPORT: i32 = 5;
    pub const HARDWARE: i32 = 6;
    pub const STATE: i32 = 7;
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(ce) = err.downcast_ref::<CliError>() {
        return match ce {
            CliError::ConfigRead { path, reason } => format!(
                "What happened: Could not read config file {path} ({reason}).\nLikely causes: Wrong --config path or missing permissions.\nHow to fix: Pass an existing file with --config, or omit it to use etc/velo.toml."
            ),
            CliError::ConfigInvalid { path, reason } => format!(
                "What happened: Invalid configuration in {path}: {reason}.\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun `velo self-check`. See etc/velo.toml for a sample."
            ),
            CliError::Logging(reason) => format!(
                "What happened: Logging could not be set up ({reason}).\nLikely causes: Unwritable logging.file directory.\nHow to fix: Fix [logging] in the config or remove logging.file."
            ),
        };
    }

    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingRole | BuildError::MissingConnector => format!(
                "What happened: The node could not be assembled ({be}).\nLikely causes: Internal wiring error.\nHow to fix: Re-run with --log-level=debug and report the output."
            ),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid timing configuration ({msg}).\nLikely causes: Zero or inconsistent values in [timing].\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(le) = err.downcast_ref::<LinkError>() {
        return match le {
            LinkError::Timeout => "What happened: The peer did not answer in time.\nLikely causes: Peer not running, network congestion, or a control period too short for the link.\nHow to fix: Check that both nodes run and raise timing.control_period_ms if needed.".to_string(),
            LinkError::Transport(_) | LinkError::ShortTransfer { .. } => format!(
                "What happened: The link to the peer failed ({le}).\nLikely causes: Peer restarted or the network dropped.\nHow to fix: Check the network; the node reconnects on its own while running."
            ),
            LinkError::Hardware(_) => format!(
                "What happened: Motor or encoder access failed ({le}).\nLikely causes: Driver not initialized or wiring issues.\nHow to fix: Verify the hardware, then restart the sensor node."
            ),
            LinkError::Config(_) => format!(
                "What happened: A configured address could not be used ({le}).\nLikely causes: Typo in node.peer/node.listen or the port is already in use.\nHow to fix: Fix [node] in the config or pass --peer/--listen."
            ),
            LinkError::State(_) => format!(
                "What happened: Internal session error ({le}).\nLikely causes: A bug in session handling.\nHow to fix: Re-run with --log-level=debug and report the output."
            ),
        };
    }

    if let Some(te) = err.downcast_ref::<toml::de::Error>() {
        return format!(
            "What happened: The config file is not valid TOML.\nDetails: {}\nHow to fix: Correct the syntax and rerun.",
            te.message()
        );
    }

    // Generic fallback
    let msg = err.to_string();
    let cause = err
        .chain()
        .nth(1)
        .map(|src| format!(" Cause: {src}"))
        .unwrap_or_default();
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<CliError>().is_some()
        || err.downcast_ref::<BuildError>().is_some()
        || err.downcast_ref::<toml::de::Error>().is_some()
    {
        return exit::CONFIG;
    }
    match err.downcast_ref::<LinkError>() {
        Some(LinkError::Timeout) => exit::TIMEOUT,
        Some(LinkError::Transport(_) | LinkError::ShortTransfer { .. }) => exit::TRANSPORT,
        Some(LinkError::Hardware(_)) => exit::HARDWARE,
        Some(LinkError::Config(_)) => exit::CONFIG,
        Some(LinkError::State(_)) => exit::STATE,
        None => exit::GENERIC,
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(le) = err.downcast_ref::<LinkError>() {
        return le.kind();
    }
    if err.downcast_ref::<CliError>().is_some()
        || err.downcast_ref::<BuildError>().is_some()
        || err.downcast_ref::<toml::de::Error>().is_some()
    {
        return "config";
    }
    "error"
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}
