//! Process utilities for the local execution surface.

/// Kill every process in the group led by `pgid` with SIGKILL.
///
/// Reaches whatever a shell started, not just the shell itself.
///
/// # Returns
/// * `true` - Group was killed or doesn't exist
/// * `false` - Failed to kill (permission denied)
pub fn kill_process_group(pgid: u32) -> bool {
    unsafe { libc::kill(-(pgid as i32), libc::SIGKILL) == 0 || !is_process_alive(pgid) }
}

/// Check if a process with the given PID exists.
///
/// Uses `libc::kill(pid, 0)` which sends a null signal to check existence.
pub fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// Make package-manager installs non-interactive.
///
/// Rewrites `pkg install` and `apt install` to pass `-y` unless the command
/// already carries it.
pub fn normalize_non_interactive(command: &str) -> String {
    let mut normalized = command.to_string();
    for manager in ["pkg install", "apt install"] {
        if normalized.contains(manager) && !normalized.contains("-y") {
            normalized = normalized.replace(manager, &format!("{} -y", manager));
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_process_alive_current() {
        let current_pid = std::process::id();
        assert!(is_process_alive(current_pid));
    }

    #[test]
    fn test_is_process_alive_invalid() {
        // High PIDs unlikely to exist
        assert!(!is_process_alive(999999999));
        assert!(!is_process_alive(888888888));
    }

    #[test]
    fn test_kill_missing_group_reports_success() {
        assert!(kill_process_group(999999999));
    }

    #[test]
    fn test_normalize_adds_yes_flag() {
        assert_eq!(
            normalize_non_interactive("pkg install python"),
            "pkg install -y python"
        );
        assert_eq!(
            normalize_non_interactive("apt update && apt install clang"),
            "apt update && apt install -y clang"
        );
    }

    #[test]
    fn test_normalize_keeps_existing_flag() {
        assert_eq!(
            normalize_non_interactive("pkg install -y python"),
            "pkg install -y python"
        );
        assert_eq!(normalize_non_interactive("ls -la"), "ls -la");
    }
}
