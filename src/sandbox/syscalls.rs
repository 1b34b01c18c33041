//! The syscall allowlist.
//!
//! Once installed, any syscall not listed here kills the process. Calls that take a descriptor
//! are pinned to the descriptor numbers this program is known to use: hardening closes everything
//! above stderr and caps the table at five entries, so the per-user directory handle is always 3
//! and the keytab is always 4.

use std::collections::BTreeMap;

use seccompiler::{
    BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter,
    SeccompRule, TargetArch,
};
use tracing::debug;

use crate::config;
use crate::error::{Error, Result};
use crate::sandbox::Stage;

/// Descriptor of the per-user directory handle.
pub const DIR_FD: u64 = 3;
/// Descriptor of the keytab being written.
pub const KEYTAB_FD: u64 = 4;

const OUTPUT_FDS: &[u64] = &[
    libc::STDOUT_FILENO as u64,
    libc::STDERR_FILENO as u64,
    KEYTAB_FD,
];
const HANDLE_FDS: &[u64] = &[DIR_FD, KEYTAB_FD];

/// How an allowed syscall's arguments are constrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Args {
    Any,
    /// First argument is one of these descriptors.
    Fd(&'static [u64]),
    /// First argument is one of these descriptors and the second equals this value.
    FdAnd(&'static [u64], u64),
}

/// One entry of the allowlist.
#[derive(Debug, Clone, Copy)]
pub struct Allowed {
    pub name: &'static str,
    pub nr: libc::c_long,
    pub args: Args,
}

const fn any(name: &'static str, nr: libc::c_long) -> Allowed {
    Allowed {
        name,
        nr,
        args: Args::Any,
    }
}

/// Calls needed on every architecture.
pub const ALLOWLIST: &[Allowed] = &[
    // Signal return, heap, and runtime teardown.
    any("rt_sigreturn", libc::SYS_rt_sigreturn),
    any("brk", libc::SYS_brk),
    any("mmap", libc::SYS_mmap),
    any("munmap", libc::SYS_munmap),
    any("sigaltstack", libc::SYS_sigaltstack),
    any("clock_gettime", libc::SYS_clock_gettime),
    // Hash seeding for the first hash set a thread builds.
    any("getrandom", libc::SYS_getrandom),
    any("exit", libc::SYS_exit),
    any("exit_group", libc::SYS_exit_group),
    // Identity.
    any("getuid", libc::SYS_getuid),
    any("geteuid", libc::SYS_geteuid),
    any("getgid", libc::SYS_getgid),
    any("getegid", libc::SYS_getegid),
    // Diagnostics and the keytab header.
    Allowed {
        name: "write",
        nr: libc::SYS_write,
        args: Args::Fd(OUTPUT_FDS),
    },
    Allowed {
        name: "writev",
        nr: libc::SYS_writev,
        args: Args::Fd(OUTPUT_FDS),
    },
    // Path inspection and creation.
    any("openat", libc::SYS_openat),
    any("fstat", libc::SYS_fstat),
    any("newfstatat", libc::SYS_newfstatat),
    any("statx", libc::SYS_statx),
    any("mkdirat", libc::SYS_mkdirat),
    any("getdents64", libc::SYS_getdents64),
    any("fchown", libc::SYS_fchown),
    Allowed {
        name: "close",
        nr: libc::SYS_close,
        args: Args::Fd(HANDLE_FDS),
    },
    Allowed {
        name: "fsync",
        nr: libc::SYS_fsync,
        args: Args::Fd(&[KEYTAB_FD]),
    },
    Allowed {
        name: "fchmod",
        nr: libc::SYS_fchmod,
        args: Args::FdAnd(&[KEYTAB_FD], config::KEYTAB_FILE_MODE as u64),
    },
    // Debug builds of std check a descriptor is open before closing it.
    Allowed {
        name: "fcntl",
        nr: libc::SYS_fcntl,
        args: Args::FdAnd(HANDLE_FDS, libc::F_GETFD as u64),
    },
    // Capability brackets.
    any("capget", libc::SYS_capget),
    any("capset", libc::SYS_capset),
];

/// Path calls that only exist on older syscall tables.
#[cfg(target_arch = "x86_64")]
pub const LEGACY_ALLOWLIST: &[Allowed] = &[
    any("stat", libc::SYS_stat),
    any("lstat", libc::SYS_lstat),
    any("mkdir", libc::SYS_mkdir),
];
#[cfg(not(target_arch = "x86_64"))]
pub const LEGACY_ALLOWLIST: &[Allowed] = &[];

#[cfg(target_arch = "x86_64")]
const TARGET_ARCH: TargetArch = TargetArch::x86_64;
#[cfg(target_arch = "aarch64")]
const TARGET_ARCH: TargetArch = TargetArch::aarch64;

/// Every allowed call, common entries first.
pub fn allowlist() -> impl Iterator<Item = &'static Allowed> {
    ALLOWLIST.iter().chain(LEGACY_ALLOWLIST)
}

/// Compile the allowlist to a BPF program that kills the process on any other call.
pub fn compile() -> Result<BpfProgram> {
    let fail = Error::setup::<seccompiler::BackendError>;

    let mut rules: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();
    for allowed in allowlist() {
        let conditions = match allowed.args {
            Args::Any => Vec::new(),
            Args::Fd(fds) => fds
                .iter()
                .map(|&fd| SeccompRule::new(vec![arg_eq(0, fd)?]))
                .collect::<std::result::Result<Vec<_>, seccompiler::BackendError>>()
                .map_err(fail(Stage::SyscallFilter))?,
            Args::FdAnd(fds, value) => fds
                .iter()
                .map(|&fd| SeccompRule::new(vec![arg_eq(0, fd)?, arg_eq(1, value)?]))
                .collect::<std::result::Result<Vec<_>, seccompiler::BackendError>>()
                .map_err(fail(Stage::SyscallFilter))?,
        };
        if rules.insert(allowed.nr, conditions).is_some() {
            return Err(Error::setup(Stage::SyscallFilter)(format!(
                "{} listed twice",
                allowed.name
            )));
        }
    }

    let filter = SeccompFilter::new(
        rules,
        SeccompAction::KillProcess,
        SeccompAction::Allow,
        TARGET_ARCH,
    )
    .map_err(fail(Stage::SyscallFilter))?;
    let program: BpfProgram = filter.try_into().map_err(fail(Stage::SyscallFilter))?;
    Ok(program)
}

/// Compile and install the allowlist. Irreversible.
pub fn install() -> Result<()> {
    let program = compile()?;
    debug!(instructions = program.len(), "installing syscall allowlist");
    seccompiler::apply_filter(&program).map_err(Error::setup(Stage::SyscallFilter))
}

/// The 32-bit argument `index` equals `value`. Descriptors, modes and `fcntl` commands are all
/// 32 bits wide.
fn arg_eq(
    index: u8,
    value: u64,
) -> std::result::Result<SeccompCondition, seccompiler::BackendError> {
    SeccompCondition::new(index, SeccompCmpArgLen::Dword, SeccompCmpOp::Eq, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(name: &str) -> &'static Allowed {
        allowlist()
            .find(|allowed| allowed.name == name)
            .unwrap_or_else(|| panic!("{name} not allowed"))
    }

    #[test]
    fn compiles_without_installing() {
        let program = compile().unwrap();
        assert!(!program.is_empty());
    }

    #[test]
    fn no_call_is_listed_twice() {
        let all: Vec<_> = allowlist().collect();
        for (i, allowed) in all.iter().enumerate() {
            assert!(
                all[i + 1..].iter().all(|other| other.nr != allowed.nr),
                "{} listed twice",
                allowed.name
            );
        }
    }

    #[test]
    fn writes_are_pinned_to_output_descriptors() {
        assert_eq!(find("write").args, Args::Fd(&[1, 2, 4]));
        assert_eq!(find("fsync").args, Args::Fd(&[KEYTAB_FD]));
        assert_eq!(find("close").args, Args::Fd(&[DIR_FD, KEYTAB_FD]));
        assert_eq!(find("fchmod").args, Args::FdAnd(&[KEYTAB_FD], 0o600));
    }

    #[test]
    fn descriptor_checks_before_close_are_allowed() {
        // Dropping a handle in a debug build runs fcntl(fd, F_GETFD) first.
        let fcntl = find("fcntl");
        assert_eq!(fcntl.nr, libc::SYS_fcntl);
        assert_eq!(
            fcntl.args,
            Args::FdAnd(&[DIR_FD, KEYTAB_FD], libc::F_GETFD as u64)
        );
        match (find("close").args, fcntl.args) {
            (Args::Fd(closable), Args::FdAnd(checked, _)) => assert_eq!(closable, checked),
            other => panic!("unexpected constraints {other:?}"),
        }
    }

    #[test]
    fn process_creation_and_networking_are_absent() {
        for nr in [
            libc::SYS_clone,
            libc::SYS_execve,
            libc::SYS_socket,
            libc::SYS_connect,
            libc::SYS_ptrace,
            libc::SYS_unlinkat,
            libc::SYS_renameat2,
            libc::SYS_symlinkat,
        ] {
            assert!(allowlist().all(|allowed| allowed.nr != nr), "syscall {nr} allowed");
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn legacy_path_calls_on_x86_64() {
        assert_eq!(find("mkdir").nr, libc::SYS_mkdir);
        assert_eq!(find("lstat").nr, libc::SYS_lstat);
    }
}
