use std::time::Duration;

/// False for a missing pid or a zombie. Without `/proc` every pid counts as gone.
pub fn is_running(pid: &str) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid.trim())) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .map(|rest| !rest.trim_start().starts_with(['Z', 'X']))
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Polls until the pid is gone, since SIGKILL delivery is not synchronous.
pub async fn wait_until_gone(pid: &str) -> bool {
    for _ in 0..40 {
        if !is_running(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}
