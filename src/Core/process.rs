// Process identity, liveness and the monotonic clock used for heartbeats.

use std::io;

/// Pid of the calling process.
pub fn current_pid() -> i64 {
    std::process::id() as i64
}

/// Whether a process with `pid` exists. Non-positive pids are unknown and
/// reported alive.
#[cfg(unix)]
pub fn process_alive(pid: i64) -> bool {
    if pid <= 0 {
        return true;
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
pub fn process_alive(_pid: i64) -> bool {
    true
}

/// Milliseconds on the system-wide monotonic clock. Comparable across processes
/// on the same host, unlike `Instant`.
#[cfg(unix)]
pub fn monotonic_millis() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return 0;
    }
    ts.tv_sec as u64 * 1_000 + ts.tv_nsec as u64 / 1_000_000
}

#[cfg(not(unix))]
pub fn monotonic_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
