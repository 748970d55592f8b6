use anyhow::{Context as _, Result};
use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use signal_hook::consts::signal::SIGCHLD;
use signal_hook::iterator::Signals;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread;
use tracing::{debug, warn};

/// One reaped child: its pid and the exit status the process table records.
/// Termination by signal maps to the conventional `128 + signo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildEvent {
    pub pid: Pid,
    pub status: i32,
}

const EVENT_QUEUE_DEPTH: usize = 256;

/// Starts the completion reaper: a watcher thread that wakes on SIGCHLD,
/// collects every terminated child without blocking, and pushes one event
/// per child into a bounded channel.
///
/// All `waitpid` calls in the shell happen on this thread; the control
/// thread only ever drains the returned receiver. Failure to install the
/// watcher is fatal to shell startup.
pub fn start() -> Result<Receiver<ChildEvent>> {
    let (tx, rx) = sync_channel(EVENT_QUEUE_DEPTH);
    let mut signals =
        Signals::new([SIGCHLD]).context("failed to install the SIGCHLD watcher")?;

    thread::Builder::new()
        .name("reaper".to_string())
        .spawn(move || {
            for _ in signals.forever() {
                if !reap_pending(&tx) {
                    break;
                }
            }
        })
        .context("failed to spawn the reaper thread")?;

    Ok(rx)
}

/// Reaps every child that has already terminated. Returns `false` once the
/// receiving side is gone and the thread should stop.
fn reap_pending(tx: &SyncSender<ChildEvent>) -> bool {
    loop {
        match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, status)) => {
                debug!("reaped pid {pid} status {status}");
                if tx.send(ChildEvent { pid, status }).is_err() {
                    return false;
                }
            }
            Ok(WaitStatus::Signaled(pid, signal, _)) => {
                debug!("reaped pid {pid} killed by {signal}");
                let status = 128 + signal as i32;
                if tx.send(ChildEvent { pid, status }).is_err() {
                    return false;
                }
            }
            // No more terminated children right now.
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => return true,
            Err(Errno::EINTR) => continue,
            Ok(other) => {
                // Stop/continue notifications; job-control signals are not
                // handled by this shell.
                debug!("ignoring wait status {other:?}");
            }
            Err(err) => {
                warn!("waitpid failed in reaper: {err}");
                return true;
            }
        }
    }
}
