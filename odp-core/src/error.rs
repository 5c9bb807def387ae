//! Error taxonomy for the lifecycle controller.
//!
//! Collaborators (subsystems and the native runtime) report opaque failures as
//! [`anyhow::Error`]; the controller wraps them with the name of the step that
//! failed. Everything that reaches a caller is one of the variants below.

use std::os::raw::c_int;

use thiserror::Error;

use crate::lifecycle::Instance;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// C status for a successful call.
pub const STATUS_OK: c_int = 0;
/// C status for a failed call.
pub const STATUS_ERROR: c_int = -1;

#[derive(Debug, Error)]
pub enum Error {
    /// The presented handle does not belong to the live instance.
    #[error("bad instance {presented}, live instance is {live}")]
    BadInstance { presented: Instance, live: Instance },

    #[error("platform is already initialized in this process")]
    AlreadyInitialized,

    #[error("platform is not initialized")]
    NotInitialized,

    /// Neither platform parameters nor the environment supplied runtime arguments.
    #[error("no native runtime arguments: pass platform params or set {var}")]
    MissingPlatformParams { var: &'static str },

    #[error("{var} is set but is not valid UTF-8")]
    InvalidPlatformParams { var: &'static str },

    #[error("failed to read thread affinity")]
    AffinityRead(#[source] nix::Error),

    #[error("failed to set thread affinity")]
    AffinityWrite(#[source] nix::Error),

    #[error("cpu mask error: {0}")]
    CpuMask(String),

    #[error("native runtime init failed")]
    NativeRuntime(#[source] anyhow::Error),

    /// A forward step failed; completed steps have already been rolled back.
    #[error("{step} init failed")]
    Stage {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// One or more teardown steps failed. Every step was still attempted.
    #[error("teardown failed for: {}", failed.join(", "))]
    Teardown { failed: Vec<&'static str> },

    #[error("this thread is already locally initialized")]
    LocalAlreadyInitialized,

    #[error("this thread is not locally initialized")]
    LocalNotInitialized,
}

impl Error {
    /// Collapse the error into the C status convention.
    ///
    /// Callers of the C entry points only ever see success or failure.
    pub fn status(&self) -> c_int {
        STATUS_ERROR
    }

    /// Render the error with its whole source chain on one line.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            source = std::error::Error::source(cause);
        }
        out
    }

    /// Returns `true` for handle/instance mismatches.
    pub fn is_identity(&self) -> bool {
        matches!(self, Self::BadInstance { .. } | Self::NotInitialized)
    }
}
