//! Filesystem scoping with Landlock.
//!
//! The process is confined beneath one directory with create, read and write rights only. Every
//! right the running kernel can restrict is handled, so anything not granted below that
//! directory is denied everywhere.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use landlock::{
    AccessFs, AccessNet, BitFlags, CompatLevel, Compatible, PathBeneath, Ruleset, RulesetAttr,
    RulesetCreatedAttr, RulesetStatus, Scope,
};
use tracing::debug;

use crate::error::{Error, Result};
use crate::sandbox::Stage;

/// `LANDLOCK_CREATE_RULESET_VERSION`: ask the kernel for its ABI version instead of creating a
/// ruleset.
const CREATE_RULESET_VERSION: libc::c_uint = 1 << 0;

/// What the running kernel offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopingSupport {
    /// No Landlock at all: not built in, or disabled at boot. The stage is skipped.
    Unsupported,
    /// Landlock with this ABI version (always at least 1).
    Supported(u32),
}

/// The rights handled and granted for one ABI version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPlan {
    /// Filesystem rights the ruleset restricts.
    pub handled_fs: BitFlags<AccessFs>,
    /// Filesystem rights granted beneath the scoping root.
    pub allowed_fs: BitFlags<AccessFs>,
    /// Network rights the ruleset restricts. None are ever granted.
    pub handled_net: BitFlags<AccessNet>,
    /// IPC scopes the process is cut off from.
    pub scopes: BitFlags<Scope>,
}

/// Ask the kernel which Landlock ABI it implements.
pub fn probe() -> ScopingSupport {
    let version = unsafe {
        libc::syscall(
            libc::SYS_landlock_create_ruleset,
            std::ptr::null::<libc::c_void>(),
            0 as libc::size_t,
            CREATE_RULESET_VERSION,
        )
    };
    match u32::try_from(version) {
        Ok(version @ 1..) => ScopingSupport::Supported(version),
        _ => ScopingSupport::Unsupported,
    }
}

/// Accumulate the rights to handle and grant for ABI `version`. Each newer version only adds.
pub fn plan(version: u32) -> AccessPlan {
    let mut plan = AccessPlan {
        handled_fs: AccessFs::Execute
            | AccessFs::WriteFile
            | AccessFs::ReadFile
            | AccessFs::ReadDir
            | AccessFs::RemoveDir
            | AccessFs::RemoveFile
            | AccessFs::MakeChar
            | AccessFs::MakeDir
            | AccessFs::MakeReg
            | AccessFs::MakeSock
            | AccessFs::MakeFifo
            | AccessFs::MakeBlock
            | AccessFs::MakeSym,
        allowed_fs: AccessFs::WriteFile
            | AccessFs::ReadFile
            | AccessFs::ReadDir
            | AccessFs::MakeDir
            | AccessFs::MakeReg,
        handled_net: BitFlags::empty(),
        scopes: BitFlags::empty(),
    };

    if version >= 2 {
        // Renaming or linking across directories.
        plan.handled_fs |= AccessFs::Refer;
    }
    if version >= 3 {
        plan.handled_fs |= AccessFs::Truncate;
        plan.allowed_fs |= AccessFs::Truncate;
    }
    if version >= 4 {
        plan.handled_net |= AccessNet::BindTcp | AccessNet::ConnectTcp;
    }
    if version >= 5 {
        plan.handled_fs |= AccessFs::IoctlDev;
    }
    if version >= 6 {
        plan.scopes |= Scope::AbstractUnixSocket | Scope::Signal;
    }
    plan
}

/// Confine this process beneath `root` for ABI `version`. Irreversible.
pub fn confine(root: &Path, version: u32) -> Result<()> {
    let plan = plan(version);
    debug!(version, ?plan, root = %root.display(), "confining filesystem access");

    let fail = Error::setup::<landlock::RulesetError>;

    let mut ruleset = Ruleset::default()
        .set_compatibility(CompatLevel::HardRequirement)
        .handle_access(plan.handled_fs)
        .map_err(fail(Stage::FilesystemScoping))?;
    if !plan.handled_net.is_empty() {
        ruleset = ruleset
            .handle_access(plan.handled_net)
            .map_err(fail(Stage::FilesystemScoping))?;
    }
    if !plan.scopes.is_empty() {
        ruleset = ruleset
            .scope(plan.scopes)
            .map_err(fail(Stage::FilesystemScoping))?;
    }

    let parent = open_root(root)?;
    let status = ruleset
        .create()
        .map_err(fail(Stage::FilesystemScoping))?
        .add_rule(PathBeneath::new(&parent, plan.allowed_fs))
        .map_err(fail(Stage::FilesystemScoping))?
        .restrict_self()
        .map_err(fail(Stage::FilesystemScoping))?;
    drop(parent);

    if status.ruleset == RulesetStatus::NotEnforced {
        return Err(Error::setup(Stage::FilesystemScoping)(
            "kernel did not enforce the ruleset",
        ));
    }
    debug!(status = ?status.ruleset, "filesystem access confined");
    Ok(())
}

/// Open the scoping root as a directory, refusing a symlink in the final component.
fn open_root(root: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY | libc::O_NOFOLLOW)
        .open(root)
        .map_err(|e| Error::setup(Stage::FilesystemScoping)(format!("{}: {e}", root.display())))
}
