//! Init-time configuration.
//!
//! Two records flow into global initialization:
//! - [`InitOptions`]: host overrides (log sink, abort handler) plus the
//!   collaborators the controller drives.
//! - [`PlatformParams`]: arguments for the native packet-I/O runtime.
//!   When absent, the runtime arguments come from [`PLATFORM_PARAMS_ENV`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::native::{DynamicEal, NativeRuntime};
use crate::subsystem::{HostSystemInfo, SubsystemSet};
use crate::lifecycle::InitStage;

/// Environment variable holding the trailing native-runtime argument string.
pub const PLATFORM_PARAMS_ENV: &str = "ODP_PLATFORM_PARAMS";

/// Environment variable overriding the EAL shared-library path.
pub const EAL_LIBRARY_ENV: &str = "ODP_DPDK_EAL_LIB";

/// Temporary directory scanned for stale files at every global init.
pub const DEFAULT_TMP_DIR: &str = "/tmp";

/// Program name handed to the native runtime as `argv[0]`.
pub const NATIVE_PROGRAM_NAME: &str = "odpdpdk";

/// Severity passed to the log sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Print,
    Error,
    Abort,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Print => write!(f, "print"),
            Self::Error => write!(f, "error"),
            Self::Abort => write!(f, "abort"),
        }
    }
}

/// Logging sink installed for the lifetime of an instance.
pub type LogFn = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Process-abort handler. Expected not to return.
pub type AbortFn = Arc<dyn Fn() + Send + Sync>;

/// Default sink: forward to `tracing`.
pub fn default_log_fn() -> LogFn {
    Arc::new(|level, msg| match level {
        LogLevel::Debug => tracing::debug!("{msg}"),
        LogLevel::Print => tracing::info!("{msg}"),
        LogLevel::Error | LogLevel::Abort => tracing::error!(level = %level, "{msg}"),
    })
}

/// Default abort handler.
pub fn default_abort_fn() -> AbortFn {
    Arc::new(|| std::process::abort())
}

/// Options record accepted by global initialization.
#[derive(Clone)]
pub struct InitOptions {
    pub log_fn: LogFn,
    pub abort_fn: AbortFn,
    /// Directory swept for `odp-<pid>-*` leftovers before anything is allocated.
    pub tmp_dir: PathBuf,
    pub subsystems: SubsystemSet,
    pub native_runtime: Arc<dyn NativeRuntime>,
}

impl InitOptions {
    pub fn with_log_fn(mut self, log_fn: impl Fn(LogLevel, &str) + Send + Sync + 'static) -> Self {
        self.log_fn = Arc::new(log_fn);
        self
    }

    pub fn with_abort_fn(mut self, abort_fn: impl Fn() + Send + Sync + 'static) -> Self {
        self.abort_fn = Arc::new(abort_fn);
        self
    }

    pub fn with_tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = dir.into();
        self
    }

    pub fn with_subsystems(mut self, subsystems: SubsystemSet) -> Self {
        self.subsystems = subsystems;
        self
    }

    pub fn with_native_runtime(mut self, runtime: Arc<dyn NativeRuntime>) -> Self {
        self.native_runtime = runtime;
        self
    }
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            log_fn: default_log_fn(),
            abort_fn: default_abort_fn(),
            tmp_dir: PathBuf::from(DEFAULT_TMP_DIR),
            subsystems: SubsystemSet::inert()
                .with(InitStage::SystemInfo, Arc::new(HostSystemInfo::new())),
            native_runtime: Arc::new(DynamicEal::from_env()),
        }
    }
}

impl fmt::Debug for InitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitOptions")
            .field("tmp_dir", &self.tmp_dir)
            .field("native_runtime", &self.native_runtime.name())
            .finish_non_exhaustive()
    }
}

/// Platform-parameters record for the native runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformParams {
    /// Memory budget in megabytes, passed as `-m <memory>`.
    pub memory: Option<u32>,
    /// Trailing runtime arguments, e.g. `"-n 4 --no-huge"`.
    pub cmdline: Option<String>,
    /// Shared library providing the EAL. Overrides [`EAL_LIBRARY_ENV`].
    pub eal_library: Option<PathBuf>,
}

impl PlatformParams {
    pub fn new(cmdline: impl Into<String>) -> Self {
        Self {
            cmdline: Some(cmdline.into()),
            ..Self::default()
        }
    }

    pub fn with_memory(mut self, megabytes: u32) -> Self {
        self.memory = Some(megabytes);
        self
    }

    /// Load parameters from a JSON file.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read platform params from {:?}", path))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid platform params in {:?}", path))
    }
}
