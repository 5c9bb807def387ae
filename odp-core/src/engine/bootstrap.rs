//! Native runtime bootstrap.
//!
//! The embedded runtime pins its main thread according to the `-c` mask it is
//! started with. The platform wants it on the lowest CPU the calling thread is
//! allowed to run on, so the bootstrap:
//!
//! ```text
//! snapshot affinity ─► first CPU ─► "-c 0x…" ─► narrow ─► runtime.init(argv) ─► restore
//! ```
//!
//! Restoration happens on every exit path through [`AffinityGuard`].

use std::ffi::OsString;

use tracing::{debug, error};

use crate::config::{PlatformParams, NATIVE_PROGRAM_NAME, PLATFORM_PARAMS_ENV};
use crate::engine::affinity::AffinityGuard;
use crate::engine::cpumask::CpuMask;
use crate::error::{Error, Result};
use crate::native::NativeRuntime;

/// Resolved inputs for one bootstrap attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapArgs {
    /// Memory budget in megabytes (`-m`).
    pub memory: Option<u32>,
    /// Trailing runtime arguments, split on whitespace.
    pub cmdline: String,
}

impl BootstrapArgs {
    /// Resolve from platform params, falling back to [`PLATFORM_PARAMS_ENV`].
    pub fn resolve(params: Option<&PlatformParams>) -> Result<Self> {
        Self::resolve_with(params, |var| std::env::var_os(var))
    }

    /// Like [`Self::resolve`] with an explicit environment lookup.
    ///
    /// Supplied params win even when their `cmdline` is empty; the environment
    /// is only consulted when no params were given at all. A value that is not
    /// valid UTF-8 is rejected rather than treated as unset.
    pub fn resolve_with<F>(params: Option<&PlatformParams>, lookup: F) -> Result<Self>
    where
        F: FnOnce(&str) -> Option<OsString>,
    {
        if let Some(params) = params {
            return Ok(Self {
                memory: params.memory,
                cmdline: params.cmdline.clone().unwrap_or_default(),
            });
        }

        let raw = lookup(PLATFORM_PARAMS_ENV).ok_or(Error::MissingPlatformParams {
            var: PLATFORM_PARAMS_ENV,
        })?;
        let cmdline = raw.into_string().map_err(|_| Error::InvalidPlatformParams {
            var: PLATFORM_PARAMS_ENV,
        })?;
        Ok(Self {
            memory: None,
            cmdline,
        })
    }

    /// Build the argument vector: program name, `-c <mask>`, optional
    /// `-m <memory>`, then each token of the trailing command string.
    pub fn argv(&self, mask: &CpuMask) -> Result<Vec<String>> {
        let mut argv = vec![
            NATIVE_PROGRAM_NAME.to_string(),
            "-c".to_string(),
            mask.to_hex()?,
        ];
        if let Some(memory) = self.memory {
            argv.push("-m".to_string());
            argv.push(memory.to_string());
        }
        argv.extend(self.cmdline.split_whitespace().map(str::to_owned));
        Ok(argv)
    }
}

/// Guidance shown when no runtime arguments could be found.
pub fn missing_params_help() -> String {
    format!(
        "Neither platform params were provided to global init, nor was the {var} \
         environment variable set.\n\
         A string of DPDK command line arguments should be provided.\n\
         Example: export {var}=\"-n 4 --no-huge\"\n\
         Note: the -c argument is substituted automatically from the CPU mask.",
        var = PLATFORM_PARAMS_ENV
    )
}

/// One-CPU mask holding the lowest CPU of `allowed`.
pub fn first_cpu_mask(allowed: &CpuMask) -> Result<CpuMask> {
    let cpu = allowed
        .first()
        .ok_or_else(|| Error::CpuMask("thread affinity mask is empty".into()))?;
    CpuMask::single(cpu)
}

/// Start `runtime` pinned to the first CPU of the calling thread.
///
/// The thread's original affinity is restored whatever the outcome. A failed
/// restore is logged and does not change the result.
pub fn bootstrap_native_runtime(runtime: &dyn NativeRuntime, args: &BootstrapArgs) -> Result<()> {
    let guard = AffinityGuard::snapshot()?;
    let mask = first_cpu_mask(&guard.original())?;
    let argv = args.argv(&mask)?;
    for (i, arg) in argv.iter().enumerate() {
        debug!("arg[{i}]: {arg}");
    }

    let outcome = guard
        .narrow(&mask)
        .and_then(|()| runtime.init(&argv).map_err(Error::NativeRuntime));

    if let Err(e) = guard.restore() {
        error!(error = %e.report(), "Failed to reset thread affinity");
    }

    let consumed = outcome?;
    if consumed != argv.len() {
        debug!(
            passed = argv.len(),
            consumed,
            "Some {} args were not processed",
            runtime.name()
        );
    }
    debug!("{} init OK", runtime.name());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::affinity;
    use std::sync::Mutex;

    /// Records what the runtime saw while it ran.
    struct RecordingRuntime {
        fail: bool,
        seen_argv: Mutex<Vec<String>>,
        seen_affinity: Mutex<Option<CpuMask>>,
    }

    impl RecordingRuntime {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                seen_argv: Mutex::new(Vec::new()),
                seen_affinity: Mutex::new(None),
            }
        }
    }

    impl NativeRuntime for RecordingRuntime {
        fn name(&self) -> &str {
            "recording"
        }

        fn init(&self, argv: &[String]) -> anyhow::Result<usize> {
            *self.seen_argv.lock().unwrap() = argv.to_vec();
            *self.seen_affinity.lock().unwrap() = Some(affinity::current().unwrap());
            if self.fail {
                anyhow::bail!("EAL refused arguments");
            }
            Ok(argv.len())
        }
    }

    #[test]
    fn test_argv_layout() {
        let args = BootstrapArgs {
            memory: Some(512),
            cmdline: "  -n 4   --no-huge ".to_string(),
        };
        let argv = args.argv(&CpuMask::single(2).unwrap()).unwrap();
        assert_eq!(
            argv,
            vec!["odpdpdk", "-c", "0x4", "-m", "512", "-n", "4", "--no-huge"]
        );
    }

    #[test]
    fn test_argv_without_memory_or_cmdline() {
        let argv = BootstrapArgs::default()
            .argv(&CpuMask::single(0).unwrap())
            .unwrap();
        assert_eq!(argv, vec!["odpdpdk", "-c", "0x1"]);
    }

    #[test]
    fn test_params_take_precedence_over_env() {
        let params = PlatformParams::new("--no-huge").with_memory(64);
        let args = BootstrapArgs::resolve_with(Some(&params), |_| panic!("env consulted")).unwrap();
        assert_eq!(args.memory, Some(64));
        assert_eq!(args.cmdline, "--no-huge");
    }

    #[test]
    fn test_params_without_cmdline_do_not_fall_back() {
        let params = PlatformParams::default();
        let args = BootstrapArgs::resolve_with(Some(&params), |_| Some("-n 2".into())).unwrap();
        assert_eq!(args.cmdline, "");
    }

    #[test]
    fn test_env_fallback() {
        let args = BootstrapArgs::resolve_with(None, |var| {
            assert_eq!(var, PLATFORM_PARAMS_ENV);
            Some("-n 2".into())
        })
        .unwrap();
        assert_eq!(args.cmdline, "-n 2");
        assert_eq!(args.memory, None);
    }

    #[test]
    fn test_non_utf8_env_is_its_own_error() {
        use std::os::unix::ffi::OsStringExt;

        let err = BootstrapArgs::resolve_with(None, |_| {
            Some(OsString::from_vec(vec![b'-', b'n', 0xff]))
        })
        .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidPlatformParams { var } if var == PLATFORM_PARAMS_ENV
        ));
        assert!(err.to_string().contains("not valid UTF-8"));
    }

    #[test]
    fn test_missing_everything_is_config_error() {
        let err = BootstrapArgs::resolve_with(None, |_| None).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingPlatformParams { var } if var == PLATFORM_PARAMS_ENV
        ));
        assert!(missing_params_help().contains("export ODP_PLATFORM_PARAMS=\"-n 4 --no-huge\""));
    }

    #[test]
    fn test_runtime_runs_narrowed_and_affinity_is_restored() {
        let before = affinity::current().unwrap();
        let runtime = RecordingRuntime::new(false);

        bootstrap_native_runtime(&runtime, &BootstrapArgs::default()).unwrap();

        let first = before.first().unwrap();
        let seen = runtime.seen_affinity.lock().unwrap().clone().unwrap();
        assert_eq!(seen.iter().collect::<Vec<_>>(), vec![first]);
        assert_eq!(runtime.seen_argv.lock().unwrap()[2], CpuMask::single(first).unwrap().to_hex().unwrap());
        assert_eq!(affinity::current().unwrap(), before);
    }

    #[test]
    fn test_affinity_restored_after_runtime_failure() {
        let before = affinity::current().unwrap();
        let runtime = RecordingRuntime::new(true);

        let err = bootstrap_native_runtime(&runtime, &BootstrapArgs::default()).unwrap_err();
        assert!(matches!(err, Error::NativeRuntime(_)));
        assert_eq!(affinity::current().unwrap(), before);
    }
}
