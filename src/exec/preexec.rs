//! Pre-Exec Ordering Enforcement
//!
//! The child-side setup sequence is fixed:
//! 1. setsid() so the child leads a fresh process group
//! 2. RLIMIT_NPROC=(0,0)
//! 3. RLIMIT_CPU, RLIMIT_AS (when set) and RLIMIT_FSIZE (always)
//! 4. exec payload
//!
//! Each step consumes the prior state, so skipping or reordering a step does
//! not compile. The chain runs inside `Command::pre_exec`, after fork, so no
//! step may allocate, lock or log.

use crate::kernel::rlimits::{apply_rlimits, deny_process_creation, RlimitPlan};
use std::io;
use std::marker::PhantomData;

/// Type-state marker: fresh child, no setup done yet
pub struct FreshChild;

/// Type-state marker: child leads its own session and process group
pub struct SessionLeader;

/// Type-state marker: child may no longer create processes
pub struct ForkDenied;

/// Type-state marker: all limits applied, ready for exec
pub struct ExecReady;

/// Child-side setup with type-state tracking
pub struct PreExec<S> {
    plan: RlimitPlan,
    _state: PhantomData<S>,
}

impl<S> PreExec<S> {
    fn advance<T>(self) -> PreExec<T> {
        PreExec {
            plan: self.plan,
            _state: PhantomData,
        }
    }
}

impl PreExec<FreshChild> {
    pub fn new(plan: RlimitPlan) -> Self {
        Self {
            plan,
            _state: PhantomData,
        }
    }

    /// Step 1: new session, which makes group-wide kill possible later.
    pub fn start_session(self) -> io::Result<PreExec<SessionLeader>> {
        nix::unistd::setsid()?;
        Ok(self.advance())
    }
}

impl PreExec<SessionLeader> {
    /// Step 2: no forking inside the sandbox.
    pub fn deny_process_creation(self) -> io::Result<PreExec<ForkDenied>> {
        deny_process_creation()?;
        Ok(self.advance())
    }
}

impl PreExec<ForkDenied> {
    /// Step 3: CPU, address space, file size.
    pub fn apply_limits(self) -> io::Result<PreExec<ExecReady>> {
        apply_rlimits(&self.plan)?;
        Ok(self.advance())
    }
}

impl PreExec<ExecReady> {
    /// Terminal state; `Command` performs the exec itself.
    pub fn finish(self) -> io::Result<()> {
        Ok(())
    }
}

/// Whole chain, suitable for `CommandExt::pre_exec`.
pub fn run_chain(plan: RlimitPlan) -> io::Result<()> {
    PreExec::new(plan)
        .start_session()?
        .deny_process_creation()?
        .apply_limits()?
        .finish()
}
