//! Platform-agnostic process control functions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::GRACEFUL_SHUTDOWN_TIMEOUT;
use crate::error::{AppError, Result};

/// Check if a process is alive by PID.
#[cfg(target_os = "windows")]
pub fn is_process_alive(pid: u32) -> bool {
    let filter = format!("PID eq {pid}");
    std::process::Command::new("tasklist")
        .args(["/FI", &filter, "/NH"])
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}

/// Check if a process is alive by PID. Uses the zero signal, so any failure
/// (including EPERM for processes we do not own) counts as not alive.
#[cfg(not(target_os = "windows"))]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    kill(Pid::from_raw(raw), None).is_ok()
}

#[cfg(target_os = "windows")]
pub(super) fn graceful_signal(pid: u32) -> Result<()> {
    force_kill(pid)
}

/// Send SIGTERM to the worker's process group when it leads one, otherwise to
/// the process alone.
#[cfg(not(target_os = "windows"))]
pub(super) fn graceful_signal(pid: u32) -> Result<()> {
    use nix::sys::signal::Signal;

    signal_worker(pid, Signal::SIGTERM)
}

#[cfg(target_os = "windows")]
pub fn force_kill(pid: u32) -> Result<()> {
    let output = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output()
        .map_err(|e| AppError::internal(format!("Failed to run taskkill: {e}")))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(AppError::internal(format!(
            "taskkill failed for pid {}: {}",
            pid,
            stderr.trim()
        )))
    }
}

#[cfg(not(target_os = "windows"))]
pub fn force_kill(pid: u32) -> Result<()> {
    use nix::sys::signal::Signal;

    signal_worker(pid, Signal::SIGKILL)
}

#[cfg(not(target_os = "windows"))]
fn signal_worker(pid: u32, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::sys::signal::{kill, killpg};
    use nix::unistd::{getpgid, Pid};

    let raw = i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .ok_or_else(|| AppError::internal(format!("Invalid pid {pid}")))?;
    let target = Pid::from_raw(raw);

    // Workers are spawned as group leaders; never signal a group we merely belong to.
    match getpgid(Some(target)) {
        Ok(pgid) if pgid == target => killpg(pgid, signal).map_err(|e| {
            AppError::internal(format!(
                "Failed to send {signal} to process group {}: {e}",
                pgid.as_raw()
            ))
        }),
        _ => kill(target, signal).map_err(|e| {
            AppError::internal(format!("Failed to send {signal} to pid {pid}: {e}"))
        }),
    }
}

/// Best-effort termination: SIGTERM, falling back to SIGKILL. Failures are
/// logged, never returned.
pub fn terminate(pid: u32) {
    if !is_process_alive(pid) {
        return;
    }
    if let Err(e) = graceful_signal(pid) {
        log::warn!("Graceful signal failed for PID {pid}: {e}, force killing");
        if let Err(e) = force_kill(pid) {
            log::warn!("Failed to kill PID {pid}: {e}");
        }
    }
}

/// Send graceful signal to each PID, wait up to the timeout for all to exit,
/// then force kill any that remain. Blocking.
pub fn graceful_shutdown(pids: &[u32]) {
    let mut failed_signal_pids = Vec::new();

    for &pid in pids {
        if is_process_alive(pid) {
            if let Err(e) = graceful_signal(pid) {
                log::warn!(
                    "Graceful signal failed for PID {pid}: {e}, will force kill immediately"
                );
                failed_signal_pids.push(pid);
            }
        }
    }

    for &pid in &failed_signal_pids {
        if is_process_alive(pid) {
            if let Err(e) = force_kill(pid) {
                log::error!("Failed to force kill PID {pid}: {e}");
            }
        }
    }

    let signalled: Vec<u32> = pids
        .iter()
        .copied()
        .filter(|pid| !failed_signal_pids.contains(pid))
        .collect();

    if signalled.iter().all(|&pid| !is_process_alive(pid)) {
        return;
    }

    let deadline = Instant::now() + GRACEFUL_SHUTDOWN_TIMEOUT;
    while Instant::now() < deadline {
        if signalled.iter().all(|&pid| !is_process_alive(pid)) {
            return;
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    for &pid in &signalled {
        if is_process_alive(pid) {
            log::warn!(
                "PID {pid} did not exit within {}s, force killing",
                GRACEFUL_SHUTDOWN_TIMEOUT.as_secs()
            );
            if let Err(e) = force_kill(pid) {
                log::error!("Failed to force kill PID {pid}: {e}");
            }
        }
    }
}

/// Bind-then-release probe. Catches ports held by unrelated processes.
pub fn port_is_bindable(port: u16) -> bool {
    std::net::TcpListener::bind(("0.0.0.0", port)).is_ok()
}

/// Poll until something accepts TCP connections on `localhost:port`.
///
/// Gives up early once `exited` is set.
pub async fn wait_for_port(
    port: u16,
    timeout: Duration,
    exited: &AtomicBool,
) -> std::result::Result<(), String> {
    let start = Instant::now();
    let mut interval = Duration::from_millis(100);
    let max_interval = Duration::from_millis(500);

    loop {
        if exited.load(Ordering::SeqCst) {
            return Err("Worker process exited before accepting connections".to_string());
        }
        let attempt = tokio::time::timeout(
            Duration::from_secs(1),
            tokio::net::TcpStream::connect(("localhost", port)),
        )
        .await;
        if let Ok(Ok(_stream)) = attempt {
            return Ok(());
        }

        if start.elapsed() >= timeout {
            return Err(format!(
                "Port {} not ready within {}s",
                port,
                timeout.as_secs()
            ));
        }

        tokio::time::sleep(interval).await;
        interval = (interval * 2).min(max_interval);
    }
}
