//! PID liveness probes and process-group termination.

use std::time::Duration;
use tracing::debug;

/// Grace period between SIGTERM and SIGKILL.
pub const TERM_GRACE: Duration = Duration::from_secs(1);

/// Is the process alive?
///
/// Uses the null signal: `ESRCH` means dead, `EPERM` means alive but owned
/// by another user (treated as alive). On Linux, a zombie counts as dead
/// even though the null-signal probe succeeds.
#[cfg(unix)]
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill(2) with signal 0 performs only the permission/existence
    // check and is safe for any pid value.
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if ret == 0 {
        return !is_zombie(pid);
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => false,
        Some(libc::EPERM) => true,
        _ => false,
    }
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: i32) -> bool {
    false
}

/// Linux exposes per-process state in /proc; state "Z" is a zombie that the
/// null-signal probe still reports as alive.
#[cfg(target_os = "linux")]
fn is_zombie(pid: i32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // The state char follows the parenthesized command name, which may
    // itself contain spaces and parens.
    stat.rsplit(')')
        .next()
        .and_then(|rest| rest.split_whitespace().next())
        .map(|state| state == "Z")
        .unwrap_or(false)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: i32) -> bool {
    false
}

/// Send a signal to the process group led by `pgid`. ESRCH (group already
/// gone) is success.
#[cfg(unix)]
pub fn signal_group(pgid: i32, signal: i32) {
    if pgid <= 0 {
        return;
    }
    // SAFETY: killpg(2) is safe to call with any pgid and a valid signal.
    let ret = unsafe { libc::killpg(pgid as libc::pid_t, signal) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!(pgid, signal, error = %err, "killpg failed");
        }
    }
}

#[cfg(not(unix))]
pub fn signal_group(_pgid: i32, _signal: i32) {}

/// Send a signal to a single process. ESRCH is success.
#[cfg(unix)]
pub fn signal_pid(pid: i32, signal: i32) {
    if pid <= 0 {
        return;
    }
    // SAFETY: kill(2) is safe with any pid and a valid signal number.
    let ret = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!(pid, signal, error = %err, "kill failed");
        }
    }
}

#[cfg(not(unix))]
pub fn signal_pid(_pid: i32, _signal: i32) {}

/// Two-step group termination: SIGTERM, a short grace period, then SIGKILL.
/// Used by the timeout path, which knows the child's group directly.
#[cfg(unix)]
pub fn terminate_group(pgid: i32) {
    signal_group(pgid, libc::SIGTERM);
    std::thread::sleep(TERM_GRACE);
    signal_group(pgid, libc::SIGKILL);
}

#[cfg(not(unix))]
pub fn terminate_group(_pgid: i32) {}

/// Termination ladder for a whole job: the launcher process plus the child's
/// process group, SIGTERM first, SIGKILL after the grace period. The
/// launcher is signalled individually (it leads a group of one); the child's
/// group fans out to its descendants.
#[cfg(unix)]
pub fn terminate_job(launcher: Option<i32>, child_group: Option<i32>) {
    if let Some(pid) = launcher {
        signal_pid(pid, libc::SIGTERM);
    }
    if let Some(pgid) = child_group {
        signal_group(pgid, libc::SIGTERM);
    }
    std::thread::sleep(TERM_GRACE);
    if let Some(pid) = launcher {
        signal_pid(pid, libc::SIGKILL);
    }
    if let Some(pgid) = child_group {
        signal_group(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
pub fn terminate_job(_launcher: Option<i32>, _child_group: Option<i32>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_pid_is_alive() {
        assert!(pid_alive(std::process::id() as i32));
    }

    #[test]
    fn nonpositive_pids_are_dead() {
        assert!(!pid_alive(0));
        assert!(!pid_alive(-5));
    }

    #[test]
    fn absent_pid_is_dead() {
        // PID_MAX on Linux defaults to 4194304; values beyond it never exist.
        assert!(!pid_alive(99_999_999));
    }

    #[cfg(unix)]
    #[test]
    fn exited_child_is_dead_after_reap() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        child.wait().unwrap();
        assert!(!pid_alive(pid));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unreaped_child_is_a_zombie_and_counts_as_dead() {
        let child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        // Wait for the process to exit without reaping it.
        for _ in 0..100 {
            if is_zombie(pid) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!pid_alive(pid));
        drop(child);
    }

    #[cfg(unix)]
    #[test]
    fn signalling_a_gone_group_is_harmless() {
        signal_group(99_999_999, libc::SIGTERM);
        signal_pid(99_999_999, libc::SIGTERM);
    }
}
