//! Stage enumerations, bring-up sequences and the shared reverse teardown.
//!
//! Bring-up order is data, not control flow: each scope has one ordered slice
//! of steps. A failed bring-up tears down `sequence[..completed]` in reverse;
//! a full termination tears down the whole slice.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::LogLevel;
use crate::error::{Error, Result};

/// Highest global subsystem brought up so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStage {
    None,
    CpuMask,
    Time,
    SystemInfo,
    SharedMemory,
    ThreadRegistry,
    Pool,
    Queue,
    Scheduler,
    PacketIo,
    Timer,
    Crypto,
    Classification,
    TrafficManager,
    NameTable,
    All,
}

impl InitStage {
    /// Stages backed by a subsystem, in bring-up order.
    pub const SUBSYSTEMS: [InitStage; 14] = [
        InitStage::CpuMask,
        InitStage::Time,
        InitStage::SystemInfo,
        InitStage::SharedMemory,
        InitStage::ThreadRegistry,
        InitStage::Pool,
        InitStage::Queue,
        InitStage::Scheduler,
        InitStage::PacketIo,
        InitStage::Timer,
        InitStage::Crypto,
        InitStage::Classification,
        InitStage::TrafficManager,
        InitStage::NameTable,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::CpuMask => "cpumask",
            Self::Time => "time",
            Self::SystemInfo => "system_info",
            Self::SharedMemory => "shm",
            Self::ThreadRegistry => "thread",
            Self::Pool => "pool",
            Self::Queue => "queue",
            Self::Scheduler => "schedule",
            Self::PacketIo => "packet_io",
            Self::Timer => "timer",
            Self::Crypto => "crypto",
            Self::Classification => "classification",
            Self::TrafficManager => "traffic_manager",
            Self::NameTable => "name_table",
            Self::All => "all",
        }
    }

    /// Index into [`Self::SUBSYSTEMS`]; `None` for the two markers.
    pub(crate) fn slot(self) -> Option<usize> {
        match self {
            Self::None | Self::All => None,
            stage => Some(stage as usize - 1),
        }
    }
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-thread progress through local bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalStage {
    None,
    SharedMemory,
    ThreadRegistry,
    PacketIo,
    Pool,
    Scheduler,
    All,
}

impl LocalStage {
    /// Local bring-up order.
    pub const SEQUENCE: [LocalStage; 5] = [
        LocalStage::SharedMemory,
        LocalStage::ThreadRegistry,
        LocalStage::PacketIo,
        LocalStage::Pool,
        LocalStage::Scheduler,
    ];

    /// Global stage whose subsystem also owns this local stage.
    pub fn subsystem(self) -> Option<InitStage> {
        match self {
            Self::SharedMemory => Some(InitStage::SharedMemory),
            Self::ThreadRegistry => Some(InitStage::ThreadRegistry),
            Self::PacketIo => Some(InitStage::PacketIo),
            Self::Pool => Some(InitStage::Pool),
            Self::Scheduler => Some(InitStage::Scheduler),
            Self::None | Self::All => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::All => "all",
            stage => stage.subsystem().map_or("none", InitStage::name),
        }
    }
}

impl fmt::Display for LocalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One forward step of global bring-up.
///
/// The native runtime bootstrap is a step without a stage marker of its own:
/// it runs right after cpu-mask and is torn down right before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalStep {
    Subsystem(InitStage),
    NativeRuntime,
}

impl GlobalStep {
    pub fn stage(self) -> Option<InitStage> {
        match self {
            Self::Subsystem(stage) => Some(stage),
            Self::NativeRuntime => None,
        }
    }
}

/// Global bring-up order.
pub const GLOBAL_SEQUENCE: [GlobalStep; 15] = [
    GlobalStep::Subsystem(InitStage::CpuMask),
    GlobalStep::NativeRuntime,
    GlobalStep::Subsystem(InitStage::Time),
    GlobalStep::Subsystem(InitStage::SystemInfo),
    GlobalStep::Subsystem(InitStage::SharedMemory),
    GlobalStep::Subsystem(InitStage::ThreadRegistry),
    GlobalStep::Subsystem(InitStage::Pool),
    GlobalStep::Subsystem(InitStage::Queue),
    GlobalStep::Subsystem(InitStage::Scheduler),
    GlobalStep::Subsystem(InitStage::PacketIo),
    GlobalStep::Subsystem(InitStage::Timer),
    GlobalStep::Subsystem(InitStage::Crypto),
    GlobalStep::Subsystem(InitStage::Classification),
    GlobalStep::Subsystem(InitStage::TrafficManager),
    GlobalStep::Subsystem(InitStage::NameTable),
];

/// Anything that can appear in a bring-up sequence.
pub trait Step: Copy {
    fn step_name(&self) -> &'static str;
}

impl Step for GlobalStep {
    fn step_name(&self) -> &'static str {
        match self {
            Self::Subsystem(stage) => stage.name(),
            Self::NativeRuntime => "native_runtime",
        }
    }
}

impl Step for LocalStage {
    fn step_name(&self) -> &'static str {
        self.name()
    }
}

/// Number of leading [`GLOBAL_SEQUENCE`] steps covered by a stage marker.
///
/// `All` covers everything. A marker covers the native runtime step once a
/// stage after cpu-mask has been reached.
pub fn global_steps_through(reached: InitStage) -> usize {
    match reached {
        InitStage::None => 0,
        InitStage::All => GLOBAL_SEQUENCE.len(),
        stage => GLOBAL_SEQUENCE
            .iter()
            .position(|step| *step == GlobalStep::Subsystem(stage))
            .map_or(0, |idx| idx + 1),
    }
}

/// Tear down `completed` in reverse order.
///
/// Every step is attempted even when a later one failed. Failures are
/// reported through `log` and collected into one [`Error::Teardown`].
pub fn unwind<S, F>(completed: &[S], log: &dyn Fn(LogLevel, &str), mut term: F) -> Result<()>
where
    S: Step,
    F: FnMut(S) -> anyhow::Result<()>,
{
    let mut failed = Vec::new();
    for step in completed.iter().rev() {
        if let Err(e) = term(*step) {
            log(
                LogLevel::Error,
                &format!("{} term failed: {e:#}", step.step_name()),
            );
            failed.push(step.step_name());
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(Error::Teardown { failed })
    }
}
