//! Resource limits applied while hardening.

use tracing::debug;

use crate::error::{Error, Result};
use crate::libc_util::{self, RlimitResource};
use crate::sandbox::Stage;

/// One hard limit. Soft and hard values are set equal.
#[derive(Debug, Clone, Copy)]
pub struct Limit {
    pub name: &'static str,
    pub resource: RlimitResource,
    pub value: libc::rlim_t,
}

/// Nothing here needs to fork, lock memory, queue messages, or write more than a keytab header.
///
/// The stack and data limits leave room for the language runtime and the log formatter; the
/// descriptor limit admits exactly stdin, stdout, stderr, one directory handle, and one file.
pub const LIMITS: [Limit; 8] = [
    Limit {
        name: "RLIMIT_NPROC",
        resource: libc::RLIMIT_NPROC,
        value: 0,
    },
    Limit {
        name: "RLIMIT_FSIZE",
        resource: libc::RLIMIT_FSIZE,
        value: 64,
    },
    Limit {
        name: "RLIMIT_MEMLOCK",
        resource: libc::RLIMIT_MEMLOCK,
        value: 0,
    },
    Limit {
        name: "RLIMIT_MSGQUEUE",
        resource: libc::RLIMIT_MSGQUEUE,
        value: 0,
    },
    Limit {
        name: "RLIMIT_STACK",
        resource: libc::RLIMIT_STACK,
        value: 256 * 1024,
    },
    Limit {
        name: "RLIMIT_NOFILE",
        resource: libc::RLIMIT_NOFILE,
        value: 5,
    },
    Limit {
        name: "RLIMIT_CPU",
        resource: libc::RLIMIT_CPU,
        value: 4,
    },
    Limit {
        name: "RLIMIT_DATA",
        resource: libc::RLIMIT_DATA,
        value: 8 * 1024 * 1024,
    },
];

/// Apply every entry of [`LIMITS`], stopping at the first failure.
pub fn apply() -> Result<()> {
    for limit in LIMITS {
        libc_util::set_rlimit(limit.resource, limit.value).map_err(|e| {
            Error::setup(Stage::ResourceLimits)(format!("{}: {e}", limit.name))
        })?;
        debug!(resource = limit.name, value = limit.value, "limit set");
    }
    Ok(())
}
