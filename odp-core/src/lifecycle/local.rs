//! Per-thread bring-up and teardown.
//!
//! Each thread that touches the platform runs [`Platform::init_local`] once
//! and [`Platform::term_local`] once. Progress lives in a thread-local slot,
//! so threads never contend on it.

use std::cell::RefCell;
use std::sync::atomic::Ordering;

use anyhow::anyhow;
use tracing::{debug, warn};

use super::global::Platform;
use super::stage::{unwind, Step};
use super::{Instance, LocalStage, ThreadRole};
use crate::config::LogLevel;
use crate::error::{Error, Result};

/// What this thread brought up, and for which instance.
#[derive(Debug, Clone, Copy)]
struct LocalSlot {
    instance: Instance,
    generation: u64,
    role: ThreadRole,
    completed: usize,
}

thread_local! {
    static LOCAL: RefCell<Option<LocalSlot>> = const { RefCell::new(None) };
}

/// Outcome of a successful local termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalExit {
    /// Threads still locally initialized after this one left.
    pub remaining: usize,
}

impl LocalExit {
    /// `true` when this was the last locally initialized thread.
    pub fn is_last(&self) -> bool {
        self.remaining == 0
    }
}

impl Platform {
    /// Bring the calling thread up for `instance` in the given role.
    ///
    /// The handle is checked before any subsystem is called. On failure the
    /// local stages that completed are torn down again and the thread is
    /// left uninitialized.
    pub fn init_local(&self, instance: Instance, role: ThreadRole) -> Result<()> {
        self.check_instance(instance)?;
        if self.take_stale_slot().is_none() && LOCAL.with(|slot| slot.borrow().is_some()) {
            return Err(Error::LocalAlreadyInitialized);
        }

        for (completed, stage) in LocalStage::SEQUENCE.iter().enumerate() {
            if let Err(err) = self.init_local_stage(*stage, role) {
                self.record.log(
                    LogLevel::Error,
                    &format!("{} local init failed: {}", stage.name(), err.report()),
                );
                if let Err(e) = unwind(
                    &LocalStage::SEQUENCE[..completed],
                    &|level, msg| self.record.log(level, msg),
                    |done| self.term_local_stage(done),
                ) {
                    self.record.log(
                        LogLevel::Error,
                        &format!("Local rollback after {} failure incomplete: {e}", stage.name()),
                    );
                }
                return Err(err);
            }
        }

        LOCAL.with(|slot| {
            *slot.borrow_mut() = Some(LocalSlot {
                instance,
                generation: self.generation,
                role,
                completed: LocalStage::SEQUENCE.len(),
            })
        });
        let threads = self.local_threads.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(role = %role, threads, "Thread locally initialized");
        Ok(())
    }

    /// Tear the calling thread down, newest stage first.
    ///
    /// Every local stage is attempted. On success reports how many threads
    /// remain locally initialized.
    pub fn term_local(&self) -> Result<LocalExit> {
        if self.take_stale_slot().is_some() {
            return Err(Error::LocalNotInitialized);
        }
        let slot = LOCAL
            .with(|slot| slot.borrow_mut().take())
            .ok_or(Error::LocalNotInitialized)?;

        if let Err(e) = self.check_instance(slot.instance) {
            LOCAL.with(|s| *s.borrow_mut() = Some(slot));
            return Err(e);
        }

        let remaining = match self.local_threads.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |n| n.checked_sub(1),
        ) {
            Ok(previous) => previous - 1,
            Err(_) => {
                warn!("Local thread count already zero at local term");
                0
            }
        };

        unwind(
            &LocalStage::SEQUENCE[..slot.completed],
            &|level, msg| self.record.log(level, msg),
            |stage| self.term_local_stage(stage),
        )?;

        debug!(role = %slot.role, remaining, "Thread locally terminated");
        Ok(LocalExit { remaining })
    }

    /// Role of the calling thread, if it is locally initialized.
    pub fn local_role(&self) -> Option<ThreadRole> {
        LOCAL.with(|slot| {
            slot.borrow()
                .filter(|s| s.generation == self.generation)
                .map(|s| s.role)
        })
    }

    /// Drop a slot left behind by an earlier platform instance.
    ///
    /// Its stages belonged to subsystems that are gone, so no hook runs.
    fn take_stale_slot(&self) -> Option<LocalSlot> {
        let stale = LOCAL.with(|slot| {
            let mut slot = slot.borrow_mut();
            if matches!(*slot, Some(s) if s.generation != self.generation) {
                slot.take()
            } else {
                None
            }
        })?;
        debug!(
            instance = %stale.instance,
            role = %stale.role,
            "Discarding local state of a terminated instance"
        );
        Some(stale)
    }

    fn init_local_stage(&self, stage: LocalStage, role: ThreadRole) -> Result<()> {
        let subsystem = stage
            .subsystem()
            .and_then(|s| self.subsystems.get(s))
            .ok_or_else(|| Error::Stage {
                step: stage.step_name(),
                source: anyhow!("no subsystem registered"),
            })?;
        subsystem
            .init_local(&self.record, role)
            .map_err(|source| Error::Stage {
                step: stage.step_name(),
                source,
            })
    }

    fn term_local_stage(&self, stage: LocalStage) -> anyhow::Result<()> {
        stage
            .subsystem()
            .and_then(|s| self.subsystems.get(s))
            .ok_or_else(|| anyhow!("no subsystem registered"))?
            .term_local(&self.record)
    }
}
