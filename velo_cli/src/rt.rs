//! Real-time scheduling helpers (per-thread SCHED_FIFO on Linux; mlockall on Linux/macOS).
//!
//! Memory locking is process-wide and applied once. Scheduling is applied per
//! task thread through the coordinator's `ThreadTuner`, so the control task can
//! outrank communication, and both outrank the reference toggle.

use std::sync::{Arc, OnceLock};

use velo_config::RtCfg;
use velo_core::{TaskKind, ThreadTuner};

use crate::cli::RtLock;

/// Lock memory (once per process) and return the per-thread tuner.
/// Returns `None` when real-time mode is off.
pub fn setup(rt: bool, lock: Option<RtLock>, cfg: &RtCfg) -> Option<ThreadTuner> {
    static LOCK_ONCE: OnceLock<()> = OnceLock::new();
    if !rt {
        return None;
    }
    let lock = lock.unwrap_or_else(RtLock::os_default);
    LOCK_ONCE.get_or_init(|| match lock_memory(lock) {
        Ok(()) => tracing::info!(mode = ?lock, "memory lock applied"),
        Err(err) => tracing::warn!(error = %err, "mlockall failed"),
    });
    Some(thread_tuner(cfg))
}

/// Priority each task runs at, from the `[rt]` section.
pub fn priority_for(cfg: &RtCfg, kind: TaskKind) -> i32 {
    match kind {
        TaskKind::Control => cfg.control_priority,
        TaskKind::Comm => cfg.comm_priority,
        TaskKind::Reference => cfg.reference_priority,
        TaskKind::Lifecycle => cfg.lifecycle_priority,
    }
}

pub fn thread_tuner(cfg: &RtCfg) -> ThreadTuner {
    let cfg = cfg.clone();
    Arc::new(move |kind| {
        let prio = priority_for(&cfg, kind);
        match set_fifo(prio) {
            Ok(applied) => tracing::debug!(task = %kind, prio = applied, "SCHED_FIFO applied"),
            Err(err) => tracing::warn!(task = %kind, prio, error = %err, "SCHED_FIFO not applied"),
        }
    })
}

#[cfg(target_os = "linux")]
fn set_fifo(prio: i32) -> std::io::Result<i32> {
    let (min, max) = unsafe {
        let min = libc::sched_get_priority_min(libc::SCHED_FIFO);
        let max = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if min < 0 || max < 0 { (1, 99) } else { (min, max) }
    };
    let prio = prio.clamp(min, max);
    let param = libc::sched_param {
        sched_priority: prio,
    };
    // pthread_* return the error number instead of setting errno.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc != 0 {
        return Err(std::io::Error::from_raw_os_error(rc));
    }
    Ok(prio)
}

#[cfg(not(target_os = "linux"))]
fn set_fifo(_prio: i32) -> std::io::Result<i32> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "SCHED_FIFO is only available on Linux",
    ))
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn lock_memory(lock: RtLock) -> eyre::Result<()> {
    use libc::{MCL_CURRENT, MCL_FUTURE, mlockall};

    fn is_retryable(err: &std::io::Error) -> bool {
        matches!(err.raw_os_error(), Some(code) if code == libc::EPERM || code == libc::ENOMEM)
    }

    fn memlock_limit_hint() -> Option<String> {
        let mut rlim = std::mem::MaybeUninit::<libc::rlimit>::uninit();
        let rc = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, rlim.as_mut_ptr()) };
        if rc != 0 {
            return None;
        }
        let r = unsafe { rlim.assume_init() };
        Some(if r.rlim_cur == libc::RLIM_INFINITY {
            "memlock limit: unlimited".to_string()
        } else {
            format!("memlock limit: {} KiB", r.rlim_cur / 1024)
        })
    }

    fn lock_with(flags: libc::c_int) -> std::io::Result<()> {
        if unsafe { mlockall(flags) } != 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    let err = match lock {
        RtLock::None => return Ok(()),
        RtLock::Current => match lock_with(MCL_CURRENT) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        },
        RtLock::All => match lock_with(MCL_CURRENT | MCL_FUTURE) {
            Ok(()) => return Ok(()),
            Err(e) if is_retryable(&e) => match lock_with(MCL_CURRENT) {
                Ok(()) => {
                    tracing::warn!(error = %e, "mlockall(current|future) failed; locked current pages only");
                    return Ok(());
                }
                Err(e2) => e2,
            },
            Err(e) => e,
        },
    };

    let mut msg = format!("mlockall({lock:?}) failed: {err}");
    if is_retryable(&err) {
        if let Some(h) = memlock_limit_hint() {
            msg.push_str(&format!("; {h}"));
        }
        msg.push_str("; hint: needs CAP_IPC_LOCK (or root) and sufficient 'ulimit -l'");
    }
    Err(eyre::eyre!(msg))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn lock_memory(lock: RtLock) -> eyre::Result<()> {
    if lock == RtLock::None {
        return Ok(());
    }
    eyre::bail!("memory locking is not supported on this OS")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rt_off_yields_no_tuner() {
        assert!(setup(false, Some(RtLock::All), &RtCfg::default()).is_none());
    }

    #[test]
    fn priorities_follow_config() {
        let cfg = RtCfg {
            control_priority: 90,
            comm_priority: 60,
            reference_priority: 20,
            lifecycle_priority: 10,
        };
        assert_eq!(priority_for(&cfg, TaskKind::Control), 90);
        assert_eq!(priority_for(&cfg, TaskKind::Comm), 60);
        assert_eq!(priority_for(&cfg, TaskKind::Reference), 20);
        assert_eq!(priority_for(&cfg, TaskKind::Lifecycle), 10);
    }
}
