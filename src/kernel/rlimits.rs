//! Resource limits for jailed processes.
//!
//! | Limit          | Source      | Applied when        |
//! |----------------|-------------|---------------------|
//! | `RLIMIT_NPROC` | fixed 0     | always              |
//! | `RLIMIT_CPU`   | `CPU`       | limit is nonzero    |
//! | `RLIMIT_AS`    | `VMEM`      | limit is nonzero    |
//! | `RLIMIT_FSIZE` | `FSIZE`     | always, 0 included  |
//!
//! Everything here runs in the child between fork and exec, so it must not
//! allocate, lock or log.

use crate::config::types::ResourceLimits;
use nix::sys::resource::{setrlimit, Resource};

/// rlimit values resolved in the parent so the child only copies integers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RlimitPlan {
    pub cpu_seconds: Option<u64>,
    pub vmem_bytes: Option<u64>,
    pub fsize_bytes: u64,
}

impl From<&ResourceLimits> for RlimitPlan {
    fn from(limits: &ResourceLimits) -> Self {
        Self {
            cpu_seconds: limits.cpu_seconds,
            vmem_bytes: limits.vmem_bytes,
            fsize_bytes: limits.fsize.as_rlimit(),
        }
    }
}

#[inline]
fn set_both(resource: Resource, value: u64) -> nix::Result<()> {
    setrlimit(resource, value, value)
}

/// RLIMIT_NPROC=(0,0): the process may not fork at all.
///
/// Not enforced for root, which is why sudo can still start the payload
/// after the limit is in place.
pub fn deny_process_creation() -> nix::Result<()> {
    set_both(Resource::RLIMIT_NPROC, 0)
}

/// Apply CPU, address-space and file-size limits in that order.
pub fn apply_rlimits(plan: &RlimitPlan) -> nix::Result<()> {
    if let Some(cpu) = plan.cpu_seconds {
        set_both(Resource::RLIMIT_CPU, cpu)?;
    }
    if let Some(vmem) = plan.vmem_bytes {
        set_both(Resource::RLIMIT_AS, vmem)?;
    }
    // Zero is meaningful here: no writes at all.
    set_both(Resource::RLIMIT_FSIZE, plan.fsize_bytes)
}
