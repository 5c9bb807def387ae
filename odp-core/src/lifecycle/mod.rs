//! Lifecycle - staged bring-up and teardown of the platform
//!
//! ```text
//! process:   init_global ──────────────────────────────────────── term_global
//! thread A:          init_local ─────────── term_local
//! thread B:               init_local ──────────── term_local
//! ```
//!
//! Global init brings every process-wide subsystem up in a fixed order and
//! hands back an [`Instance`]. Each worker thread then runs local init with
//! that handle. Shutdown mirrors bring-up. Any failure half-way through
//! bring-up unwinds exactly the steps that completed, newest first.

pub mod global;
pub mod identity;
pub mod local;
pub mod stage;

pub use global::{GlobalRecord, Platform, PlatformStatus};
pub use identity::instance_claimed;
pub use local::LocalExit;
pub use stage::{GlobalStep, InitStage, LocalStage, GLOBAL_SEQUENCE};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque handle to the live platform instance.
///
/// Equal to the identity (pid) of the process that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instance(u64);

impl Instance {
    pub fn from_pid(pid: u32) -> Self {
        Self(u64::from(pid))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a thread participates in processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadRole {
    /// Runs the fast path.
    Worker,
    /// Housekeeping and configuration.
    Control,
}

impl fmt::Display for ThreadRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Worker => write!(f, "worker"),
            Self::Control => write!(f, "control"),
        }
    }
}
