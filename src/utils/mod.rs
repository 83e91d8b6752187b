//! Common utilities shared across the manager
//!
//! - [`clock`] - time sources and interval gating for periodic checks
//! - [`retry`] - bounded retry for store access

pub mod clock;
pub mod retry;

use std::path::Path;

/// Check whether a process with the given pid is currently running
///
/// Uses `/proc` where it exists and falls back to `kill -0` elsewhere.
pub fn is_pid_running(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    if Path::new("/proc/self").exists() {
        return Path::new(&format!("/proc/{pid}")).exists();
    }
    std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
