//! Child process helpers shared by the job runner and the session manager.
//!
//! Children are started in their own process group so that signals reach anything
//! they spawn, not just the direct child.

use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Put the command's child into a fresh process group.
pub(crate) fn isolate_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(not(unix))]
    let _ = cmd;
}

/// Send `signal` to every process in the group led by `pgid`.
#[cfg(unix)]
pub(crate) fn signal_group(pgid: Option<u32>, signal: libc::c_int) {
    let Some(pgid) = pgid else {
        return;
    };
    // SAFETY: killpg takes plain integers and has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, signal) };
    if rc != 0 {
        debug!(
            pgid,
            signal,
            "killpg failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

/// Kill whatever is left of a process group after its leader exited.
pub(crate) fn sweep_group(pgid: Option<u32>) {
    #[cfg(unix)]
    signal_group(pgid, libc::SIGKILL);
    #[cfg(not(unix))]
    let _ = pgid;
}

/// Forcibly kill the child (and its group) and reap it.
pub(crate) async fn kill_and_reap(child: &mut Child) {
    let pgid = child.id();
    sweep_group(pgid);
    if let Err(err) = child.kill().await {
        // Already reaped children report an error here; nothing left to do.
        debug!(?pgid, "kill after group signal: {}", err);
    }
}

/// Ask the child to terminate, escalating to SIGKILL after `grace`. Always reaps.
pub(crate) async fn terminate(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    let pgid = child.id();

    #[cfg(unix)]
    {
        signal_group(pgid, libc::SIGTERM);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                sweep_group(pgid);
                return Some(status);
            }
            Ok(Err(err)) => warn!(?pgid, "error waiting for process: {}", err),
            Err(_) => debug!(?pgid, "process ignored SIGTERM, killing"),
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    kill_and_reap(child).await;
    match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(err)) => {
            warn!(?pgid, "error reaping process: {}", err);
            None
        }
        Err(_) => {
            warn!(?pgid, "timeout waiting for process to exit");
            None
        }
    }
}

/// Run a command to completion, capturing its output, killing it after `limit`.
pub(crate) async fn output_with_timeout(
    cmd: &mut Command,
    limit: Duration,
) -> Result<Output, String> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    match tokio::time::timeout(limit, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err(format!("timed out after {}s", limit.as_secs())),
    }
}

/// Signal number that terminated the process, if any.
pub(crate) fn exit_signal(status: &ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}
