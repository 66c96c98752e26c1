//! Host process helpers: liveness probes and signal delivery.

use std::str::FromStr;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::ExecutorError;

/// Signal delivered when a requested signal name is not recognised.
pub const FALLBACK_SIGNAL: Signal = Signal::SIGINT;

/// Check whether a process exists by sending it signal 0.
///
/// Any error, including `EPERM`, counts as "not alive".
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    kill(Pid::from_raw(raw), None).is_ok()
}

/// Resolve a symbolic signal name such as `SIGTERM` or `term`.
///
/// Returns `None` for names the host does not know.
#[must_use]
pub fn lookup_signal(name: &str) -> Option<Signal> {
    let upper = name.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return None;
    }
    Signal::from_str(&upper)
        .or_else(|_| Signal::from_str(&format!("SIG{upper}")))
        .ok()
}

/// Resolve a signal name, falling back to [`FALLBACK_SIGNAL`].
///
/// The boolean is `false` when the fallback was used.
#[must_use]
pub fn resolve_signal(name: &str) -> (Signal, bool) {
    match lookup_signal(name) {
        Some(sig) => (sig, true),
        None => (FALLBACK_SIGNAL, false),
    }
}

/// Deliver `signal` to `pid`.
///
/// # Errors
/// Returns [`ExecutorError::Signal`] if the pid is invalid or `kill(2)` fails.
pub fn send_signal(pid: u32, signal: Signal) -> Result<(), ExecutorError> {
    let raw = i32::try_from(pid)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| ExecutorError::Signal {
            pid,
            reason: "invalid pid".to_owned(),
        })?;
    kill(Pid::from_raw(raw), signal).map_err(|e| ExecutorError::Signal {
        pid,
        reason: e.to_string(),
    })
}
