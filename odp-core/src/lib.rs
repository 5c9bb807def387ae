//! ODP Core - Platform lifecycle controller for ODP on DPDK
//!
//! Brings a packet-processing platform up and down in a fixed, declarative
//! order, and bootstraps the native DPDK runtime along the way.
//!
//! # Lifecycle:
//! - [`Platform::init_global`] once per process, yielding an [`Instance`]
//! - [`Platform::init_local`] / [`Platform::term_local`] on every thread
//! - [`Platform::term_global`] once, mirroring bring-up in reverse
//!
//! A failure part-way through bring-up unwinds exactly the steps that
//! completed. Teardown always attempts every step and reports all failures.
//!
//! The same operations are exported over the C ABI in [`ffi`].

pub mod config;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod lifecycle;
pub mod native;
pub mod subsystem;

pub use config::{InitOptions, LogLevel, PlatformParams};
pub use engine::{AffinityGuard, BootstrapArgs, CpuMask};
pub use error::{Error, Result};
pub use lifecycle::{
    GlobalRecord, InitStage, Instance, LocalExit, LocalStage, Platform, PlatformStatus, ThreadRole,
};
pub use native::{DynamicEal, NativeRuntime};
pub use subsystem::{HostSystemInfo, Subsystem, SubsystemSet, SystemInfo};

use tracing_subscriber::EnvFilter;

/// Install the default `tracing` subscriber.
///
/// Honors `RUST_LOG`; falls back to `info`. A subscriber that is already
/// installed is left alone.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
        tracing::info!("ODP core v{}", env!("CARGO_PKG_VERSION"));
    }
}
