//! FFI Bridge - C ABI for the platform lifecycle
//!
//! Applications written against the C API drive the same state machine as
//! Rust callers. The live platform is kept in a process-wide slot between
//! calls; the C side only ever holds the 64-bit instance handle.
//!
//! # Return convention:
//! - `FFI_SUCCESS` (0) on success
//! - `FFI_ERROR` (-1) on failure
//! - `odp_term_local` returns `FFI_LAST_THREAD` (1) when the calling thread
//!   was the last one locally initialized

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uint};
use std::sync::{Arc, RwLock};

use tracing::{error, warn};

use crate::config::{InitOptions, LogLevel, PlatformParams};
use crate::lifecycle::{Instance, Platform, ThreadRole};
use crate::native::DynamicEal;

/// C-compatible result code
pub type FfiResult = c_int;

pub const FFI_SUCCESS: FfiResult = 0;
pub const FFI_ERROR: FfiResult = -1;
pub const FFI_LAST_THREAD: FfiResult = 1;

/// Thread role codes accepted by `odp_init_local`.
pub const ODP_THREAD_WORKER: c_int = 0;
pub const ODP_THREAD_CONTROL: c_int = 1;

/// `void (*)(int level, const char *msg)`; level is 0 debug, 1 print,
/// 2 error, 3 abort.
pub type OdpLogFn = extern "C" fn(c_int, *const c_char);

/// `void (*)(void)`
pub type OdpAbortFn = extern "C" fn();

/// Host overrides for global init. Null members keep the defaults.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OdpInitParams {
    pub log_fn: Option<OdpLogFn>,
    pub abort_fn: Option<OdpAbortFn>,
}

/// Native runtime arguments.
///
/// `memory` of 0 leaves the memory budget to the runtime. `cmdline` may be
/// null.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OdpPlatformInit {
    pub memory: c_uint,
    pub cmdline: *const c_char,
}

static PLATFORM: RwLock<Option<Arc<Platform>>> = RwLock::new(None);

fn live_platform() -> Option<Arc<Platform>> {
    PLATFORM
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

fn level_code(level: LogLevel) -> c_int {
    match level {
        LogLevel::Debug => 0,
        LogLevel::Print => 1,
        LogLevel::Error => 2,
        LogLevel::Abort => 3,
    }
}

/// Build Rust init options from the C record.
///
/// # Safety
/// `params` must be null or point to a valid `OdpInitParams`.
unsafe fn options_from_c(params: *const OdpInitParams) -> InitOptions {
    let mut options = InitOptions::default();
    let Some(params) = params.as_ref() else {
        return options;
    };

    if let Some(log_fn) = params.log_fn {
        options = options.with_log_fn(move |level, msg| {
            let msg = CString::new(msg.replace('\0', " ")).unwrap_or_default();
            log_fn(level_code(level), msg.as_ptr());
        });
    }
    if let Some(abort_fn) = params.abort_fn {
        options = options.with_abort_fn(move || abort_fn());
    }
    options
}

/// Build platform params from the C record; `None` when the pointer is null.
///
/// # Safety
/// `platform` must be null or point to a valid `OdpPlatformInit` whose
/// `cmdline` is null or a NUL-terminated string.
unsafe fn platform_params_from_c(platform: *const OdpPlatformInit) -> Option<PlatformParams> {
    let platform = platform.as_ref()?;
    let cmdline = if platform.cmdline.is_null() {
        None
    } else {
        Some(CStr::from_ptr(platform.cmdline).to_string_lossy().into_owned())
    };
    Some(PlatformParams {
        memory: (platform.memory > 0).then_some(platform.memory),
        cmdline,
        eal_library: None,
    })
}

/// Run global init and publish the platform in the process slot.
fn install(
    instance_out: Option<&mut u64>,
    options: InitOptions,
    params: Option<PlatformParams>,
) -> FfiResult {
    let Some(instance_out) = instance_out else {
        error!("odp_init_global: null instance pointer");
        return FFI_ERROR;
    };

    match Platform::init_global(options, params) {
        Ok((platform, instance)) => {
            *PLATFORM
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(platform));
            *instance_out = instance.as_raw();
            FFI_SUCCESS
        }
        Err(e) => e.status(),
    }
}

/// Initialize the platform.
///
/// # Safety
/// `instance` must be valid for writes. `params` and `platform_params` must be
/// null or valid for reads.
#[no_mangle]
pub unsafe extern "C" fn odp_init_global(
    instance: *mut u64,
    params: *const OdpInitParams,
    platform_params: *const OdpPlatformInit,
) -> FfiResult {
    let options = options_from_c(params);
    let platform_params = platform_params_from_c(platform_params);
    let options = options.with_native_runtime(Arc::new(DynamicEal::for_params(
        platform_params.as_ref(),
    )));
    install(instance.as_mut(), options, platform_params)
}

/// Terminate the platform identified by `instance`.
#[no_mangle]
pub extern "C" fn odp_term_global(instance: u64) -> FfiResult {
    let Some(platform) = live_platform() else {
        warn!("odp_term_global: platform not initialized");
        return FFI_ERROR;
    };

    let result = platform.term_global(Instance::from_raw(instance));
    if !matches!(&result, Err(e) if e.is_identity()) {
        PLATFORM
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
    match result {
        Ok(()) => FFI_SUCCESS,
        Err(e) => e.status(),
    }
}

/// Initialize the calling thread.
#[no_mangle]
pub extern "C" fn odp_init_local(instance: u64, thread_type: c_int) -> FfiResult {
    let role = match thread_type {
        ODP_THREAD_WORKER => ThreadRole::Worker,
        ODP_THREAD_CONTROL => ThreadRole::Control,
        other => {
            error!(thread_type = other, "odp_init_local: unknown thread type");
            return FFI_ERROR;
        }
    };
    let Some(platform) = live_platform() else {
        warn!("odp_init_local: platform not initialized");
        return FFI_ERROR;
    };

    match platform.init_local(Instance::from_raw(instance), role) {
        Ok(()) => FFI_SUCCESS,
        Err(e) => e.status(),
    }
}

/// Terminate the calling thread.
#[no_mangle]
pub extern "C" fn odp_term_local() -> FfiResult {
    let Some(platform) = live_platform() else {
        warn!("odp_term_local: platform not initialized");
        return FFI_ERROR;
    };

    match platform.term_local() {
        Ok(exit) if exit.is_last() => FFI_LAST_THREAD,
        Ok(_) => FFI_SUCCESS,
        Err(e) => e.status(),
    }
}
