//! Instance identity guard.
//!
//! One live platform per process. The claim is taken before global init
//! touches anything and released when the instance terminates (or when a
//! failed init unwinds). Handles are checked before any subsystem call.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::lifecycle::Instance;

static CLAIMED: AtomicBool = AtomicBool::new(false);

/// Bumped by every successful claim. Handles are pids and repeat across
/// instances of one process; generations do not.
static GENERATION: AtomicU64 = AtomicU64::new(0);

/// Process-wide single-instance token. Dropping it releases the claim.
#[derive(Debug)]
pub(crate) struct InstanceClaim {
    generation: u64,
}

impl InstanceClaim {
    pub(crate) fn acquire() -> Result<Self> {
        CLAIMED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::AlreadyInitialized)?;
        let generation = GENERATION.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(Self { generation })
    }

    /// Unique per claim within this process.
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for InstanceClaim {
    fn drop(&mut self) {
        CLAIMED.store(false, Ordering::Release);
    }
}

/// Returns `true` while a platform instance is live in this process.
pub fn instance_claimed() -> bool {
    CLAIMED.load(Ordering::Acquire)
}

/// Check a presented handle against the live instance.
pub(crate) fn verify(presented: Instance, live: Instance) -> Result<()> {
    if presented == live {
        Ok(())
    } else {
        Err(Error::BadInstance { presented, live })
    }
}
