//! OS-level liveness check used by the heartbeat reaper (§4.6.2).

/// Best-effort check for whether `pid` still names a running process.
/// Linux-only precision via `/proc`; elsewhere we conservatively report
/// "alive" and rely on `clientInactiveSeconds` TTL reaping instead.
#[cfg(target_os = "linux")]
pub fn pid_is_alive(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
pub fn pid_is_alive(_pid: u32) -> bool {
    true
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(pid_is_alive(std::process::id()));
    }

    #[test]
    fn pid_zero_is_not_a_real_process() {
        assert!(!pid_is_alive(0));
    }
}
