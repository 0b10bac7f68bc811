#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `velo`: run either node of the networked velocity controller, or both
//! halves of the loop on one node.

mod cli;
mod error_fmt;
mod node;
mod rt;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};
use velo_config::Config;

use crate::cli::{Cli, Commands, DEFAULT_CONFIG, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{CliError, exit, exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let code = match run(cli) {
        Ok(()) => exit::OK,
        Err(err) => {
            tracing::error!(error = %err, "velo failed");
            if JSON_MODE.get().copied().unwrap_or(false) {
                println!("{}", format_error_json(&err));
            }
            eprintln!("{}", humanize(&err));
            exit_code_for_error(&err)
        }
    };
    flush_logs();
    std::process::exit(code);
}

fn run(cli: Cli) -> eyre::Result<()> {
    let (cfg, source) = load_config(cli.config.as_deref())?;
    init_tracing(&cli, &cfg)?;
    tracing::debug!(config = %source, "config loaded");

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
            tracing::warn!(error = %e, "Ctrl-C handler not installed");
        }
    }

    let summary = match &cli.cmd {
        Commands::Sensor { peer, run } => {
            let peer = peer.as_deref().unwrap_or(cfg.node.peer.as_str());
            node::run_sensor(&cfg, peer, run, shutdown)?
        }
        Commands::Compute { listen, run } => {
            let listen = listen.as_deref().unwrap_or(cfg.node.listen.as_str());
            node::run_compute(&cfg, listen, run, shutdown)?
        }
        Commands::Local { run } => node::run_local(&cfg, run, shutdown)?,
        Commands::SelfCheck => return self_check(&cfg, &source, cli.json),
    };

    if cli.json {
        println!("{}", summary.to_json());
    } else {
        println!("{summary}");
    }
    Ok(())
}

fn self_check(cfg: &Config, source: &str, json: bool) -> eyre::Result<()> {
    let count = node::check_plant(cfg).wrap_err("simulated plant check")?;
    let settings = node::effective_settings(cfg);
    if json {
        println!(
            "{}",
            serde_json::json!({ "ok": true, "config": source, "settings": settings, "encoder_count": count })
        );
    } else {
        println!("config: {source}");
        println!("{}", serde_json::to_string_pretty(&settings)?);
        println!("self-check ok");
    }
    Ok(())
}

/// An explicit `--config` must exist; otherwise `etc/velo.toml` is used if
/// present, falling back to built-in defaults.
fn load_config(explicit: Option<&Path>) -> eyre::Result<(Config, String)> {
    let path: PathBuf = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let p = PathBuf::from(DEFAULT_CONFIG);
            if !p.exists() {
                return Ok((Config::default(), "built-in defaults".into()));
            }
            p
        }
    };
    let shown = path.display().to_string();
    let text = std::fs::read_to_string(&path).map_err(|e| CliError::ConfigRead {
        path: shown.clone(),
        reason: e.to_string(),
    })?;
    let cfg = velo_config::load_toml(&text).wrap_err_with(|| format!("parse config {shown}"))?;
    cfg.validate().map_err(|e| CliError::ConfigInvalid {
        path: shown.clone(),
        reason: e.to_string(),
    })?;
    Ok((cfg, shown))
}

/// Console to stderr (pretty or JSON lines) plus an optional JSON file sink.
/// `RUST_LOG` overrides `--log-level` for the console.
fn init_tracing(cli: &Cli, cfg: &Config) -> Result<(), CliError> {
    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(&cli.log_level)
            .map_err(|e| CliError::Logging(format!("--log-level {}: {e}", cli.log_level)))?,
    };
    let console: Box<dyn Layer<Registry> + Send + Sync> = if cli.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_thread_names(true)
            .boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> =
        vec![console.with_filter(console_filter).boxed()];

    if let Some(file) = cfg.logging.file.as_deref() {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| CliError::Logging(format!("logging.file {file:?} has no file name")))?;
        std::fs::create_dir_all(dir)
            .map_err(|e| CliError::Logging(format!("create {}: {e}", dir.display())))?;
        let appender = match cfg.logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        if let Ok(mut slot) = FILE_GUARD.lock() {
            *slot = Some(guard);
        }
        let level = cfg.logging.level.as_deref().unwrap_or("info");
        let file_filter = EnvFilter::try_new(level)
            .map_err(|e| CliError::Logging(format!("logging.level {level}: {e}")))?;
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_thread_names(true)
                .with_writer(writer)
                .with_filter(file_filter)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| CliError::Logging(e.to_string()))
}

/// Drop the non-blocking writer's guard so buffered lines reach the file.
fn flush_logs() {
    if let Ok(mut slot) = FILE_GUARD.lock() {
        slot.take();
    }
}
