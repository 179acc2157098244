//! Wall-clock watchdog.
//!
//! One thread per armed call waits on a cancellation channel with a timeout.
//! Disarming before the deadline wakes it immediately; reaching the deadline
//! kills the child's whole process group.

use crate::kernel::signal::{process_group_of, GroupKiller};
use crate::observability::audit::events;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::warn;
use nix::unistd::Pid;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct Watchdog {
    cancel: Sender<()>,
    handle: JoinHandle<bool>,
}

impl Watchdog {
    /// Start the timer for the child `pid`, which leads its own process group.
    pub fn arm(slug: &str, pid: u32, limit: Duration, killer: GroupKiller) -> Self {
        let (cancel, cancelled) = bounded::<()>(1);
        let pid = Pid::from_raw(pid as i32);
        // setsid() ran before exec, so the group id is the pid; ask anyway.
        let pgid = process_group_of(pid).unwrap_or(pid);
        let slug = slug.to_string();

        let handle = thread::spawn(move || match cancelled.recv_timeout(limit) {
            // Disarmed, or the executor dropped its end.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
            Err(RecvTimeoutError::Timeout) => {
                events::watchdog_kill(&slug, pgid.as_raw(), limit.as_secs_f64());
                if let Err(e) = killer.kill_group(pgid) {
                    warn!("Watchdog could not kill process group {}: {}", pgid, e);
                }
                true
            }
        });

        Self { cancel, handle }
    }

    /// Stop the timer. Returns true if it had already fired.
    pub fn disarm(self) -> bool {
        let _ = self.cancel.try_send(());
        self.handle.join().unwrap_or(false)
    }
}
