use std::collections::TryReserveError;
use std::io;
use std::path::{Path, PathBuf};

use crate::sandbox::Stage;

/// Result type for our error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can stop a run.
///
/// None of these are transient. Each one renders as a single line naming what was being done and
/// the path, stage, or capability involved; the binaries print it once and exit non-zero.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Memory for an owned value could not be reserved.
    #[error("unable to allocate memory for {what}: {source}")]
    AllocationFailure {
        what: &'static str,
        #[source]
        source: TryReserveError,
    },

    /// The compiled-in configuration is unusable, or a rendered path would not fit.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A check on a path or handle found something it must refuse: a symlink, the wrong file
    /// type, or a descriptor that may not be used.
    #[error("{}: {reason}", path.display())]
    SecurityViolation { path: PathBuf, reason: &'static str },

    /// A capability could not be raised, applied, or dropped.
    #[error("{context} [{capabilities}]: {reason}")]
    Privilege {
        context: &'static str,
        capabilities: String,
        reason: String,
    },

    /// A hardening stage could not be put in place.
    #[error("cannot {stage}: {source}")]
    SandboxSetup {
        stage: Stage,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Hardening was requested a second time in the same process.
    #[error("process has already been hardened")]
    AlreadyHardened,

    /// A filesystem operation on the target paths failed.
    #[error("{context} {}: {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Map an [`io::Error`] into [`Error::Io`] for `path`, for use with `map_err`.
    pub fn io<'a>(context: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> Error + 'a {
        move |source| Error::Io {
            context,
            path: path.to_owned(),
            source,
        }
    }

    /// Map any error into [`Error::SandboxSetup`] for `stage`, for use with `map_err`.
    pub fn setup<E>(stage: Stage) -> impl FnOnce(E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        move |source| Error::SandboxSetup {
            stage,
            source: source.into(),
        }
    }

    /// Map a failed reservation into [`Error::AllocationFailure`], for use with `map_err`.
    pub fn alloc(what: &'static str) -> impl FnOnce(TryReserveError) -> Error {
        move |source| Error::AllocationFailure { what, source }
    }

    /// The errno behind this error, if there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

// Define a macro, bail_violation!, which returns a security violation for a path:
//
// - `bail_violation!(path, "is a symlink, not allowed")`
macro_rules! bail_violation {
    ($path:expr, $reason:expr) => {
        return Err($crate::error::Error::SecurityViolation {
            path: ::std::path::PathBuf::from($path),
            reason: $reason,
        })
    };
}
pub(crate) use bail_violation;

// Define a macro, bail_config!, which returns an invalid-configuration error with a formatted
// message.
macro_rules! bail_config {
    ($($arg:tt)*) => {
        return Err($crate::error::Error::InvalidConfiguration(format!($($arg)*)))
    };
}
pub(crate) use bail_config;
