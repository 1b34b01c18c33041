//! One-shot process hardening.
//!
//! [`Sandbox::harden`] runs every stage exactly once, in a fixed order, before any keytab work
//! starts. Each stage is irreversible and any failure is fatal. Filesystem scoping has to come
//! before the syscall filter, because setting it up uses calls the filter forbids, and the
//! capability drop comes last so the earlier stages keep what they need.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use c_str_macro::c_str;
use tracing::{debug, span, Level};

use crate::capability;
use crate::config;
use crate::error::{Error, Result};
use crate::libc_util;
use crate::path::KeytabLayout;

pub mod limits;
pub mod scoping;
pub mod syscalls;

pub use scoping::ScopingSupport;

/// Set once the first hardening attempt starts. There is no second chance.
static HARDENED: AtomicBool = AtomicBool::new(false);

/// Hardening stages, in the only order they may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Point stdin at `/dev/null` and close every inherited descriptor above stderr.
    Stdio,
    CoreDumps,
    NoNewPrivileges,
    Environment,
    ResourceLimits,
    FilesystemScoping,
    SyscallFilter,
    CapabilityDrop,
}

impl Stage {
    /// Every stage, in order.
    pub const ALL: [Stage; 8] = [
        Stage::Stdio,
        Stage::CoreDumps,
        Stage::NoNewPrivileges,
        Stage::Environment,
        Stage::ResourceLimits,
        Stage::FilesystemScoping,
        Stage::SyscallFilter,
        Stage::CapabilityDrop,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Stdio => "isolate standard streams",
            Stage::CoreDumps => "disable core dumps",
            Stage::NoNewPrivileges => "set no_new_privs",
            Stage::Environment => "clear environment variables",
            Stage::ResourceLimits => "set resource limits",
            Stage::FilesystemScoping => "confine filesystem access",
            Stage::SyscallFilter => "install syscall allowlist",
            Stage::CapabilityDrop => "drop capabilities",
        })
    }
}

/// The hardening pipeline for one process.
#[derive(Debug)]
pub struct Sandbox {
    scoping_root: PathBuf,
    syscall_filter: bool,
    completed: Option<Stage>,
}

/// What hardening actually put in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hardened {
    pub scoping: ScopingSupport,
    pub syscall_filter: bool,
}

impl Sandbox {
    /// A pipeline that confines the process beneath the parent of the layout's base directory
    /// and installs the syscall allowlist if this build enables it.
    pub fn new(layout: &KeytabLayout) -> Sandbox {
        Sandbox {
            scoping_root: layout.scoping_root().to_owned(),
            syscall_filter: config::SYSCALL_FILTER,
            completed: None,
        }
    }

    /// The directory the process will be confined beneath.
    pub fn scoping_root(&self) -> &Path {
        &self.scoping_root
    }

    /// The last stage that has completed, if any.
    pub fn completed(&self) -> Option<Stage> {
        self.completed
    }

    /// Run every stage. May be called once per process; a second call fails without touching
    /// anything.
    pub fn harden(mut self) -> Result<Hardened> {
        let span = span!(Level::DEBUG, "harden");
        let _span_guard = span.enter();

        claim(&HARDENED)?;

        self.advance(Stage::Stdio, || {
            libc_util::redirect_fd(c_str!("/dev/null"), libc::STDIN_FILENO, libc::O_RDONLY)?;
            libc_util::close_from(libc::STDERR_FILENO + 1)
        })?;

        self.advance(Stage::CoreDumps, || libc_util::prctl(libc::PR_SET_DUMPABLE, 0))?;
        self.advance(Stage::NoNewPrivileges, || libc_util::prctl(libc::PR_SET_NO_NEW_PRIVS, 1))?;

        self.advance(Stage::Environment, libc_util::clear_env)?;

        self.step(Stage::ResourceLimits, limits::apply)?;

        let scoping = scoping::probe();
        debug!(?scoping, "filesystem scoping support");
        let scoping_root = self.scoping_root.clone();
        self.step(Stage::FilesystemScoping, || match scoping {
            ScopingSupport::Unsupported => {
                debug!("kernel has no filesystem scoping, skipping");
                Ok(())
            }
            ScopingSupport::Supported(version) => scoping::confine(&scoping_root, version),
        })?;

        let syscall_filter = self.syscall_filter;
        self.step(Stage::SyscallFilter, || {
            if syscall_filter {
                syscalls::install()
            } else {
                debug!("syscall allowlist disabled in this build, skipping");
                Ok(())
            }
        })?;

        self.step(Stage::CapabilityDrop, || capability::retain_only(&capability::RETAINED))?;

        Ok(Hardened {
            scoping,
            syscall_filter,
        })
    }

    /// Run a stage whose body reports plain OS errors.
    fn advance(&mut self, stage: Stage, body: impl FnOnce() -> std::io::Result<()>) -> Result<()> {
        self.step(stage, || body().map_err(Error::setup(stage)))
    }

    /// Run a stage, refusing to go backwards or repeat one.
    fn step(&mut self, stage: Stage, body: impl FnOnce() -> Result<()>) -> Result<()> {
        if self.completed.is_some_and(|done| done >= stage) {
            return Err(Error::setup(stage)("stage is out of order"));
        }

        let span = span!(Level::DEBUG, "stage", %stage);
        let _span_guard = span.enter();
        body()?;
        self.completed = Some(stage);
        debug!("done");
        Ok(())
    }
}

/// Take the one hardening attempt `flag` allows.
fn claim(flag: &AtomicBool) -> Result<()> {
    if flag.swap(true, Ordering::SeqCst) {
        return Err(Error::AlreadyHardened);
    }
    Ok(())
}
