//! Subsystem Trait - the contract every platform subsystem implements
//!
//! The lifecycle controller never looks inside a subsystem. It only decides
//! *when* each one is brought up and torn down. Each subsystem either fully
//! initializes or reports failure after cleaning up its own partial state; the
//! controller never calls `term_*` for a subsystem whose `init_*` failed.
//!
//! # Contract:
//! - `init_global` / `term_global` run once per process from the coordinating
//!   thread. `init_global` may record discoveries in the [`GlobalRecord`].
//! - `init_local` / `term_local` run on every participating thread and must be
//!   safe to call concurrently from different threads.

pub mod sysinfo;

pub use sysinfo::{HostSystemInfo, SystemInfo};

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use tracing::{trace, warn};

use crate::lifecycle::{GlobalRecord, InitStage, ThreadRole};

pub trait Subsystem: Send + Sync {
    /// Bring the subsystem up for the whole process.
    fn init_global(&self, record: &mut GlobalRecord) -> Result<()>;

    /// Release everything `init_global` acquired.
    fn term_global(&self, record: &GlobalRecord) -> Result<()>;

    /// Per-thread activation. `role` is only meaningful to the thread registry.
    fn init_local(&self, _record: &GlobalRecord, _role: ThreadRole) -> Result<()> {
        Ok(())
    }

    fn term_local(&self, _record: &GlobalRecord) -> Result<()> {
        Ok(())
    }
}

/// Placeholder for a stage the host does not provide. Always succeeds.
#[derive(Debug, Clone, Copy)]
pub struct Inert {
    stage: InitStage,
}

impl Inert {
    pub fn new(stage: InitStage) -> Self {
        Self { stage }
    }
}

impl Subsystem for Inert {
    fn init_global(&self, _record: &mut GlobalRecord) -> Result<()> {
        trace!(stage = %self.stage, "inert init_global");
        Ok(())
    }

    fn term_global(&self, _record: &GlobalRecord) -> Result<()> {
        trace!(stage = %self.stage, "inert term_global");
        Ok(())
    }
}

const SLOTS: usize = InitStage::SUBSYSTEMS.len();

/// One subsystem per global stage, from cpu-mask to name-table.
#[derive(Clone)]
pub struct SubsystemSet {
    slots: [Arc<dyn Subsystem>; SLOTS],
}

impl SubsystemSet {
    /// Every stage backed by [`Inert`].
    pub fn inert() -> Self {
        Self::from_fn(|stage| Arc::new(Inert::new(stage)))
    }

    /// Build the set by asking `f` for each stage in bring-up order.
    pub fn from_fn<F>(mut f: F) -> Self
    where
        F: FnMut(InitStage) -> Arc<dyn Subsystem>,
    {
        Self {
            slots: std::array::from_fn(|i| f(InitStage::SUBSYSTEMS[i])),
        }
    }

    /// Replace the subsystem behind `stage`.
    ///
    /// The `None` and `All` markers have no subsystem and are ignored.
    pub fn with(mut self, stage: InitStage, subsystem: Arc<dyn Subsystem>) -> Self {
        match stage.slot() {
            Some(slot) => self.slots[slot] = subsystem,
            None => warn!(stage = %stage, "Stage marker has no subsystem slot, ignoring"),
        }
        self
    }

    pub fn get(&self, stage: InitStage) -> Option<&dyn Subsystem> {
        stage.slot().map(|slot| self.slots[slot].as_ref())
    }
}

impl Default for SubsystemSet {
    fn default() -> Self {
        Self::inert()
    }
}

impl fmt::Debug for SubsystemSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsystemSet")
            .field("stages", &InitStage::SUBSYSTEMS)
            .finish()
    }
}
