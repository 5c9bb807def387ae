//! Engine module - leaf mechanics of the lifecycle controller
//!
//! CPU masks, thread affinity, stale-file reclamation and the native runtime
//! bootstrap. Nothing in here knows about stages or instances.

pub mod affinity;
pub mod bootstrap;
pub mod cpumask;
pub mod reclaim;

pub use affinity::AffinityGuard;
pub use bootstrap::{bootstrap_native_runtime, BootstrapArgs};
pub use cpumask::CpuMask;
pub use reclaim::{reclaim, ReclaimReport};
