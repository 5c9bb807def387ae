//! Calling-thread CPU affinity: snapshot, narrow, restore.
//!
//! [`AffinityGuard`] captures the thread's mask on creation and puts it back
//! when dropped, so every exit path (error returns and unwinding included)
//! leaves the thread as it found it.

use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
use nix::unistd::Pid;
use tracing::{debug, error};

use crate::engine::cpumask::CpuMask;
use crate::error::{Error, Result};

/// Pid 0 addresses the calling thread.
fn this_thread() -> Pid {
    Pid::from_raw(0)
}

/// Read the calling thread's affinity mask.
pub fn current() -> Result<CpuMask> {
    let set = sched_getaffinity(this_thread()).map_err(Error::AffinityRead)?;
    Ok(CpuMask::from_cpuset(&set))
}

/// Replace the calling thread's affinity mask.
pub fn apply(mask: &CpuMask) -> Result<()> {
    let set = mask.to_cpuset()?;
    sched_setaffinity(this_thread(), &set).map_err(Error::AffinityWrite)
}

pub struct AffinityGuard {
    original: CpuSet,
    restored: bool,
}

impl AffinityGuard {
    /// Snapshot the calling thread's affinity.
    pub fn snapshot() -> Result<Self> {
        let original = sched_getaffinity(this_thread()).map_err(Error::AffinityRead)?;
        Ok(Self {
            original,
            restored: false,
        })
    }

    pub fn original(&self) -> CpuMask {
        CpuMask::from_cpuset(&self.original)
    }

    /// Restrict the calling thread to `mask` until the guard is released.
    pub fn narrow(&self, mask: &CpuMask) -> Result<()> {
        debug!(mask = ?mask, "Narrowing thread affinity");
        apply(mask)
    }

    /// Restore the snapshot now and report the outcome.
    pub fn restore(mut self) -> Result<()> {
        self.restored = true;
        sched_setaffinity(this_thread(), &self.original).map_err(Error::AffinityWrite)
    }
}

impl Drop for AffinityGuard {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(e) = sched_setaffinity(this_thread(), &self.original) {
            error!(error = %e, "Failed to reset thread affinity");
        }
    }
}
