//! Process-group helpers for the host backend.
//!
//! Every host command is spawned as the leader of a fresh process group so a
//! single `killpg` reaches the whole subtree: a shell, its pipeline, and any
//! grandchildren. Killing only the leaf would leave piped children alive.

use std::io;

use tokio::process::Command;

/// Make the spawned child lead a new process group.
#[cfg(unix)]
pub fn new_process_group(command: &mut Command) {
    command.process_group(0);
}

#[cfg(not(unix))]
pub fn new_process_group(_command: &mut Command) {}

/// SIGKILL the process group led by `pid`. A group that is already gone is
/// not an error.
#[cfg(unix)]
pub fn kill_process_group(pid: u32) -> io::Result<()> {
    let result = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if result == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn kill_process_group(_pid: u32) -> io::Result<()> {
    Ok(())
}

/// Zero-signal liveness check. Zombies count as dead.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    // kill with signal 0 checks existence without delivering anything
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    let exists = result == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
    exists && !is_zombie(pid)
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            let (_, rest) = stat.rsplit_once(')')?;
            rest.trim_start().chars().next()
        })
        .map(|state| state == 'Z')
        .unwrap_or(false)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: u32) -> bool {
    false
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    false
}

/// Exit code for a status, mapping signal deaths to `128 + signal`.
pub fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
