//! Global lifecycle state machine.
//!
//! [`Platform::init_global`] walks [`GLOBAL_SEQUENCE`] front to back and stops
//! at the first failure, tearing down the completed prefix in reverse before
//! reporting the original error. [`Platform::term_global`] tears the whole
//! sequence down in reverse. Teardown never short-circuits.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::anyhow;
use nix::unistd::getpid;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::identity::{self, InstanceClaim};
use super::stage::{global_steps_through, unwind, Step};
use super::{GlobalStep, InitStage, Instance, GLOBAL_SEQUENCE};
use crate::config::{AbortFn, InitOptions, LogFn, LogLevel, PlatformParams};
use crate::engine::bootstrap::{bootstrap_native_runtime, missing_params_help, BootstrapArgs};
use crate::engine::reclaim::reclaim;
use crate::error::{Error, Result};
use crate::native::NativeRuntime;
use crate::subsystem::{SubsystemSet, SystemInfo};

/// Process-wide lifecycle record.
///
/// Written by the global state machine and the subsystems it starts while
/// bring-up is in progress; read-only once the platform is live.
pub struct GlobalRecord {
    main_pid: u32,
    log_fn: LogFn,
    abort_fn: AbortFn,
    system_info: SystemInfo,
    stage: InitStage,
}

impl GlobalRecord {
    fn new(main_pid: u32, log_fn: LogFn, abort_fn: AbortFn) -> Self {
        Self {
            main_pid,
            log_fn,
            abort_fn,
            system_info: SystemInfo::default(),
            stage: InitStage::None,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::new(
            std::process::id(),
            crate::config::default_log_fn(),
            crate::config::default_abort_fn(),
        )
    }

    /// Pid of the process that ran global init.
    pub fn main_pid(&self) -> u32 {
        self.main_pid
    }

    /// Highest stage brought up so far.
    pub fn stage(&self) -> InitStage {
        self.stage
    }

    pub fn system_info(&self) -> &SystemInfo {
        &self.system_info
    }

    pub fn system_info_mut(&mut self) -> &mut SystemInfo {
        &mut self.system_info
    }

    /// Emit through the active log sink.
    pub fn log(&self, level: LogLevel, msg: &str) {
        (self.log_fn)(level, msg)
    }
}

impl fmt::Debug for GlobalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalRecord")
            .field("main_pid", &self.main_pid)
            .field("system_info", &self.system_info)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

/// Snapshot of the platform for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformStatus {
    pub instance: Instance,
    pub main_pid: u32,
    pub live: bool,
    pub stage: InitStage,
    pub system_info: SystemInfo,
    pub local_threads: usize,
}

/// The live platform instance.
///
/// Owns the lifecycle record and the collaborators it drives. Shared by
/// reference (or `Arc`) with every thread that runs local init.
pub struct Platform {
    pub(super) record: GlobalRecord,
    pub(super) instance: Instance,
    pub(super) subsystems: SubsystemSet,
    pub(super) native: Arc<dyn NativeRuntime>,
    pub(super) live: AtomicBool,
    pub(super) local_threads: AtomicUsize,
    pub(super) generation: u64,
    claim: Mutex<Option<InstanceClaim>>,
}

impl Platform {
    /// Bring every global subsystem up and return the live instance.
    ///
    /// `params` supplies the native runtime arguments; without it they are
    /// read from `ODP_PLATFORM_PARAMS`. On failure no instance exists and
    /// every step that had completed has been torn down.
    pub fn init_global(options: InitOptions, params: Option<PlatformParams>) -> Result<(Self, Instance)> {
        let claim = InstanceClaim::acquire()?;
        let main_pid = getpid().as_raw() as u32;

        let InitOptions {
            log_fn,
            abort_fn,
            tmp_dir,
            subsystems,
            native_runtime,
        } = options;
        let mut record = GlobalRecord::new(main_pid, log_fn, abort_fn);

        let swept = reclaim(&tmp_dir, main_pid);
        debug!(dir = %tmp_dir.display(), removed = swept.removed, "Stale files reclaimed");

        for (completed, step) in GLOBAL_SEQUENCE.iter().enumerate() {
            let started = Instant::now();
            if let Err(err) = init_step(
                *step,
                &subsystems,
                native_runtime.as_ref(),
                params.as_ref(),
                &mut record,
            ) {
                if matches!(err, Error::MissingPlatformParams { .. }) {
                    record.log(LogLevel::Error, &missing_params_help());
                }
                record.log(
                    LogLevel::Error,
                    &format!("{} init failed: {}", step.step_name(), err.report()),
                );

                let rollback = unwind(
                    &GLOBAL_SEQUENCE[..completed],
                    &|level, msg| record.log(level, msg),
                    |done| term_step(done, &subsystems, native_runtime.as_ref(), &record),
                );
                if let Err(e) = rollback {
                    record.log(
                        LogLevel::Error,
                        &format!("Rollback after {} failure incomplete: {e}", step.step_name()),
                    );
                }
                return Err(err);
            }

            debug!(
                step = step.step_name(),
                duration_us = started.elapsed().as_micros() as u64,
                "Init step complete"
            );

            if let Some(stage) = step.stage() {
                record.stage = stage;
                if stage == InitStage::SystemInfo {
                    if let Some(dir) = record.system_info.huge_page_dir.clone() {
                        let swept = reclaim(&dir, main_pid);
                        debug!(dir = %dir.display(), removed = swept.removed, "Stale huge page files reclaimed");
                    }
                }
            }
        }

        record.stage = InitStage::All;
        let instance = Instance::from_pid(main_pid);
        info!(instance = %instance, native = native_runtime.name(), "Platform initialized");

        let platform = Self {
            record,
            instance,
            subsystems,
            native: native_runtime,
            live: AtomicBool::new(true),
            local_threads: AtomicUsize::new(0),
            generation: claim.generation(),
            claim: Mutex::new(Some(claim)),
        };
        Ok((platform, instance))
    }

    /// Tear every global subsystem down, newest first.
    ///
    /// All steps are attempted; the call fails if any of them failed. The
    /// instance is gone afterwards either way.
    pub fn term_global(&self, instance: Instance) -> Result<()> {
        self.check_instance(instance)?;
        if !self.live.swap(false, Ordering::AcqRel) {
            return Err(Error::NotInitialized);
        }

        let threads = self.local_threads.load(Ordering::Acquire);
        if threads > 0 {
            self.record.log(
                LogLevel::Print,
                &format!("{threads} thread(s) still locally initialized at global term"),
            );
        }

        let result = unwind(
            &GLOBAL_SEQUENCE[..global_steps_through(InitStage::All)],
            &|level, msg| self.record.log(level, msg),
            |step| term_step(step, &self.subsystems, self.native.as_ref(), &self.record),
        );

        self.claim
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        match &result {
            Ok(()) => info!(instance = %instance, "Platform terminated"),
            Err(e) => warn!(instance = %instance, error = %e, "Platform terminated with errors"),
        }
        result
    }

    /// Reject `presented` unless it is the handle of this live instance.
    ///
    /// Runs before any subsystem is touched.
    pub(super) fn check_instance(&self, presented: Instance) -> Result<()> {
        if !self.live.load(Ordering::Acquire) {
            self.record.log(LogLevel::Error, "Platform not initialized.");
            return Err(Error::NotInitialized);
        }
        identity::verify(presented, self.instance).map_err(|e| {
            self.record.log(LogLevel::Error, "Bad instance.");
            e
        })
    }

    pub fn instance(&self) -> Instance {
        self.instance
    }

    pub fn record(&self) -> &GlobalRecord {
        &self.record
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn status(&self) -> PlatformStatus {
        let live = self.is_live();
        PlatformStatus {
            instance: self.instance,
            main_pid: self.record.main_pid,
            live,
            stage: if live { self.record.stage } else { InitStage::None },
            system_info: self.record.system_info.clone(),
            local_threads: self.local_threads.load(Ordering::Acquire),
        }
    }

    /// Report `reason` through the log sink and hand over to the abort handler.
    pub fn abort(&self, reason: &str) -> ! {
        self.record.log(LogLevel::Abort, reason);
        (self.record.abort_fn)();
        std::process::abort()
    }
}

impl Drop for Platform {
    fn drop(&mut self) {
        if self.is_live() {
            warn!(instance = %self.instance, "Platform dropped without term_global");
        }
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("instance", &self.instance)
            .field("record", &self.record)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

fn init_step(
    step: GlobalStep,
    subsystems: &SubsystemSet,
    native: &dyn NativeRuntime,
    params: Option<&PlatformParams>,
    record: &mut GlobalRecord,
) -> Result<()> {
    match step {
        GlobalStep::Subsystem(stage) => {
            let subsystem = subsystems.get(stage).ok_or_else(|| Error::Stage {
                step: stage.name(),
                source: anyhow!("no subsystem registered"),
            })?;
            subsystem
                .init_global(record)
                .map_err(|source| Error::Stage {
                    step: stage.name(),
                    source,
                })
        }
        GlobalStep::NativeRuntime => {
            let args = BootstrapArgs::resolve(params)?;
            bootstrap_native_runtime(native, &args)
        }
    }
}

fn term_step(
    step: GlobalStep,
    subsystems: &SubsystemSet,
    native: &dyn NativeRuntime,
    record: &GlobalRecord,
) -> anyhow::Result<()> {
    match step {
        GlobalStep::Subsystem(stage) => subsystems
            .get(stage)
            .ok_or_else(|| anyhow!("no subsystem registered"))?
            .term_global(record),
        GlobalStep::NativeRuntime => native.cleanup(),
    }
}
