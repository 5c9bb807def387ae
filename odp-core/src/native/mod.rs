//! Native Runtime - the embedded packet-I/O acceleration engine
//!
//! The platform delegates raw packet I/O to an embedded runtime (the DPDK
//! EAL) that is configured through a command-line style argument vector.
//! [`NativeRuntime`] is the seam the lifecycle controller drives; the
//! production backend [`DynamicEal`] loads the EAL shared library at runtime
//! with libloading so the platform builds and runs without DPDK installed.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use libc::{c_char, c_int};
use libloading::{Library, Symbol};
use tracing::{debug, info, warn};

use crate::config::{PlatformParams, EAL_LIBRARY_ENV};

/// Default soname of the EAL library.
pub const DEFAULT_EAL_LIBRARY: &str = "librte_eal.so";

/// The embedded runtime's own initializer and teardown.
pub trait NativeRuntime: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// Hand `argv` (program name first) to the runtime.
    ///
    /// Returns how many tokens the runtime consumed, program name included.
    fn init(&self, argv: &[String]) -> Result<usize>;

    /// Release everything `init` set up.
    fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// `int rte_eal_init(int argc, char **argv)`
type EalInitFn = unsafe extern "C" fn(c_int, *mut *mut c_char) -> c_int;

/// `int rte_eal_cleanup(void)`
type EalCleanupFn = unsafe extern "C" fn() -> c_int;

/// EAL backend loaded from a shared library on first use.
///
/// # Safety Model:
/// - The library stays loaded for the lifetime of the value; the EAL keeps
///   threads and hugepage mappings that reference its code.
/// - `rte_eal_init` may permute the pointer array it is given, so a fresh
///   array is built for every call and the backing strings outlive it.
pub struct DynamicEal {
    path: PathBuf,
    library: Mutex<Option<Arc<Library>>>,
}

impl DynamicEal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            library: Mutex::new(None),
        }
    }

    /// Library path from [`EAL_LIBRARY_ENV`], else [`DEFAULT_EAL_LIBRARY`].
    pub fn from_env() -> Self {
        let path = std::env::var_os(EAL_LIBRARY_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EAL_LIBRARY));
        Self::new(path)
    }

    /// Honor `eal_library` from platform params, falling back to [`Self::from_env`].
    pub fn for_params(params: Option<&PlatformParams>) -> Self {
        match params.and_then(|p| p.eal_library.as_deref()) {
            Some(path) => Self::new(path),
            None => Self::from_env(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Arc<Library>> {
        let mut slot = self
            .library
            .lock()
            .map_err(|_| anyhow!("EAL library slot poisoned"))?;
        if let Some(lib) = slot.as_ref() {
            return Ok(lib.clone());
        }

        info!("Loading native runtime from {:?}", self.path);
        let lib = unsafe {
            Library::new(&self.path)
                .with_context(|| format!("Failed to load library from {:?}", self.path))?
        };
        let lib = Arc::new(lib);
        *slot = Some(lib.clone());
        Ok(lib)
    }

    fn loaded(&self) -> Option<Arc<Library>> {
        self.library.lock().ok().and_then(|slot| slot.clone())
    }
}

impl NativeRuntime for DynamicEal {
    fn name(&self) -> &str {
        "dpdk-eal"
    }

    fn init(&self, argv: &[String]) -> Result<usize> {
        let lib = self.load()?;

        let owned = argv
            .iter()
            .map(|arg| CString::new(arg.as_str()).with_context(|| format!("NUL byte in {arg:?}")))
            .collect::<Result<Vec<_>>>()?;
        let mut ptrs: Vec<*mut c_char> = owned.iter().map(|s| s.as_ptr() as *mut c_char).collect();
        let argc = c_int::try_from(ptrs.len()).context("Too many runtime arguments")?;

        let rc = unsafe {
            let eal_init: Symbol<EalInitFn> = lib
                .get(b"rte_eal_init\0")
                .context("Library missing 'rte_eal_init' export")?;
            eal_init(argc, ptrs.as_mut_ptr())
        };
        drop(owned);

        if rc < 0 {
            bail!("Cannot init the DPDK EAL (rte_eal_init returned {rc})");
        }
        Ok(rc as usize + 1)
    }

    fn cleanup(&self) -> Result<()> {
        let Some(lib) = self.loaded() else {
            return Ok(());
        };

        let cleanup: Symbol<EalCleanupFn> = match unsafe { lib.get(b"rte_eal_cleanup\0") } {
            Ok(sym) => sym,
            Err(e) => {
                warn!(error = %e, "EAL has no cleanup entry point, leaving it running");
                return Ok(());
            }
        };

        let rc = unsafe { cleanup() };
        if rc < 0 {
            bail!("rte_eal_cleanup returned {rc}");
        }
        debug!("EAL cleaned up");
        Ok(())
    }
}
