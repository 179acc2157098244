//! Process-group termination for jailed processes.
//!
//! The child calls `setsid()` before exec, so its pid is also the id of a
//! fresh process group holding every descendant. Killing the group catches
//! anything forked before RLIMIT_NPROC took effect.

use crate::config::types::{JailError, Result};
use log::{debug, warn};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{getpgid, Pid};
use std::process::{Command, Stdio};

/// How to deliver SIGKILL to a process group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupKiller {
    /// The group belongs to us: `killpg(pgid, SIGKILL)`
    Direct,
    /// The group belongs to the sandbox user: `sudo pkill -9 -g <pgid>`
    Sudo,
}

impl GroupKiller {
    pub fn for_user(user: Option<&str>) -> Self {
        if user.is_some() {
            GroupKiller::Sudo
        } else {
            GroupKiller::Direct
        }
    }

    pub fn kill_group(self, pgid: Pid) -> Result<()> {
        match self {
            GroupKiller::Direct => match killpg(pgid, Signal::SIGKILL) {
                Ok(()) => Ok(()),
                // Group already gone
                Err(nix::errno::Errno::ESRCH) => {
                    debug!("Process group {} already exited", pgid);
                    Ok(())
                }
                Err(e) => Err(JailError::Process(format!("killpg({}): {}", pgid, e))),
            },
            GroupKiller::Sudo => {
                let status = Command::new("sudo")
                    .args(["pkill", "-9", "-g"])
                    .arg(pgid.as_raw().to_string())
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .map_err(|e| JailError::Process(format!("sudo pkill: {}", e)))?;
                // pkill exits 1 when nothing matched, which is fine.
                if !status.success() && status.code() != Some(1) {
                    warn!("sudo pkill -9 -g {} exited with {}", pgid, status);
                }
                Ok(())
            }
        }
    }
}

/// Resolve the process group of `pid`.
pub fn process_group_of(pid: Pid) -> Result<Pid> {
    getpgid(Some(pid)).map_err(|e| JailError::Process(format!("getpgid({}): {}", pid, e)))
}
