//! Filesystem primitives that refuse symlinks and re-check what they opened.
//!
//! A path string is only trusted long enough to open a handle with `O_NOFOLLOW`. Everything after
//! that (type checks, ownership, creating the keytab) goes through the handle, so swapping a path
//! component between the check and the use gains nothing.

use std::ffi::CString;
use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::Path;

use caps::Capability;
use tracing::{debug, span, Level};

use crate::capability::{CapabilityBracket, CapabilitySet, Elevation};
use crate::config;
use crate::error::{bail_violation, Error, Result};
use crate::identity::Identity;
use crate::libc_util;

/// Creating entries in, or opening, a directory the effective user may not own.
const DAC: [Capability; 1] = [Capability::CAP_DAC_OVERRIDE];
/// Handing a directory over to its user.
const CHOWN: [Capability; 1] = [Capability::CAP_CHOWN];

/// Privileged filesystem operations, each wrapped in its own capability bracket.
#[derive(Clone, Debug, Copy)]
pub struct SafeFs {
    elevation: Elevation,
}

impl SafeFs {
    pub fn new(elevation: Elevation) -> SafeFs {
        SafeFs { elevation }
    }

    fn bracket(&self, caps: &[Capability]) -> Result<CapabilityBracket> {
        CapabilityBracket::acquire(self.elevation, &CapabilitySet::new(caps)?)
    }

    /// Check that the administrator-provided base directory exists and is a real directory.
    pub fn validate_base_dir(&self, base: &Path) -> Result<()> {
        let meta = match fs::symlink_metadata(base) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::io(
                    "client keytab directory does not exist, contact your admin:",
                    base,
                )(e))
            }
            Err(e) => return Err(Error::io("unable to inspect", base)(e)),
        };
        if meta.file_type().is_symlink() {
            bail_violation!(base, "is a symlink, not allowed");
        }
        if !meta.is_dir() {
            bail_violation!(base, "is not a directory");
        }
        Ok(())
    }

    /// Make sure `path` is a real directory, creating it with `mode` and handing it to `owner` if
    /// it is missing.
    ///
    /// An existing directory is accepted as it is. Whatever sits at `path`, a symlink is never
    /// followed and never accepted.
    pub fn ensure_directory(&self, path: &Path, owner: Identity, mode: u32) -> Result<()> {
        let span = span!(Level::DEBUG, "ensure_directory", path = %path.display());
        let _span_guard = span.enter();

        match fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_symlink() => {
                bail_violation!(path, "is a symlink, not allowed")
            }
            Ok(meta) if meta.is_dir() => {
                debug!("already exists");
                return Ok(());
            }
            Ok(_) => bail_violation!(path, "is not a directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io("unable to inspect", path)(e)),
        }

        let (handle, created) = {
            let _bracket = self.bracket(&DAC)?;
            let created = match DirBuilder::new().mode(mode).create(path) {
                Ok(()) => true,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!("created concurrently");
                    false
                }
                Err(e) => return Err(Error::io("unable to create directory", path)(e)),
            };
            (open_directory(path)?, created)
        };

        let meta = handle
            .metadata()
            .map_err(Error::io("unable to inspect", path))?;
        if !meta.is_dir() {
            bail_violation!(path, "is not a directory");
        }
        if !created {
            return Ok(());
        }

        {
            let _bracket = self.bracket(&CHOWN)?;
            std::os::unix::fs::fchown(&handle, Some(owner.uid), Some(owner.gid))
                .map_err(Error::io("unable to set ownership of", path))?;
        }
        debug!(uid = owner.uid, gid = owner.gid, "created");
        Ok(())
    }

    /// Create `dir/name` as a new empty file with mode 0600, refusing to follow a symlink at
    /// either level.
    ///
    /// Returns the open file if it was created here, or `None` if a regular file was already in
    /// place, in which case nothing is touched.
    pub fn create_file_if_missing(&self, dir: &Path, name: &str) -> Result<Option<File>> {
        let span = span!(Level::DEBUG, "create_file_if_missing", dir = %dir.display(), name);
        let _span_guard = span.enter();

        let c_name = CString::new(name).map_err(|_| {
            Error::InvalidConfiguration(format!("file name {name:?} contains a NUL byte"))
        })?;
        let full_path = dir.join(name);

        let (handle, dir_meta) = {
            let _bracket = self.bracket(&DAC)?;
            let meta = fs::symlink_metadata(dir).map_err(Error::io("unable to inspect", dir))?;
            if meta.file_type().is_symlink() {
                bail_violation!(dir, "is a symlink, not allowed");
            }
            let handle = open_directory(dir)?;
            let handle_meta = handle
                .metadata()
                .map_err(Error::io("unable to inspect", dir))?;
            (handle, handle_meta)
        };
        if !dir_meta.is_dir() {
            bail_violation!(dir, "is not a directory");
        }

        let opened = {
            let _bracket = self.bracket(&DAC)?;
            match libc_util::open_at(
                &handle,
                &c_name,
                libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL | libc::O_NOFOLLOW | libc::O_CLOEXEC,
                config::KEYTAB_FILE_MODE,
            ) {
                Ok(file) => Ok(file),
                Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                    let stat = libc_util::stat_at_nofollow(&handle, &c_name)
                        .map_err(Error::io("unable to inspect", &full_path))?;
                    Err(libc_util::file_type(&stat))
                }
                Err(e) if e.raw_os_error() == Some(libc::ELOOP) => {
                    bail_violation!(&full_path, "is a symlink, not allowed")
                }
                Err(e) => return Err(Error::io("unable to create", &full_path)(e)),
            }
        };
        drop(handle);

        let file = match opened {
            Ok(file) => file,
            Err(libc::S_IFREG) => {
                debug!("already exists");
                return Ok(None);
            }
            Err(libc::S_IFLNK) => bail_violation!(&full_path, "is a symlink, not allowed"),
            Err(_) => bail_violation!(&full_path, "is not a regular file"),
        };

        let meta = file
            .metadata()
            .map_err(Error::io("unable to inspect", &full_path))?;
        if !meta.is_file() {
            bail_violation!(&full_path, "is not a regular file");
        }
        debug!("created");
        Ok(Some(file))
    }
}

/// Open `path` as a directory without following a symlink in its final component.
fn open_directory(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY | libc::O_NOFOLLOW)
        .open(path)
        .map_err(|e| match e.raw_os_error() {
            Some(libc::ELOOP) => Error::SecurityViolation {
                path: path.to_owned(),
                reason: "is a symlink, not allowed",
            },
            Some(libc::ENOTDIR) => Error::SecurityViolation {
                path: path.to_owned(),
                reason: "is not a directory",
            },
            _ => Error::io("unable to open", path)(e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};

    fn fs() -> SafeFs {
        SafeFs::new(Elevation::Inherited)
    }

    fn is_violation(err: &Error) -> bool {
        matches!(err, Error::SecurityViolation { .. })
    }

    #[test]
    fn base_dir_must_exist() -> eyre::Result<()> {
        let root = tempfile::tempdir()?;
        let err = fs().validate_base_dir(&root.path().join("missing")).unwrap_err();
        assert!(err.to_string().contains("does not exist"), "{err}");
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
        Ok(())
    }

    #[test]
    fn base_dir_must_be_a_real_directory() -> eyre::Result<()> {
        let root = tempfile::tempdir()?;
        fs::create_dir(root.path().join("real"))?;
        symlink("real", root.path().join("link"))?;
        fs::write(root.path().join("file"), b"")?;

        fs().validate_base_dir(&root.path().join("real"))?;
        let err = fs().validate_base_dir(&root.path().join("link")).unwrap_err();
        assert!(is_violation(&err) && err.to_string().contains("symlink"), "{err}");
        let err = fs().validate_base_dir(&root.path().join("file")).unwrap_err();
        assert!(is_violation(&err) && err.to_string().contains("not a directory"), "{err}");
        Ok(())
    }

    #[test]
    fn creates_missing_directory() -> eyre::Result<()> {
        let root = tempfile::tempdir()?;
        let dir = root.path().join("1001");
        let me = Identity::current();

        fs().ensure_directory(&dir, me, 0o700)?;
        let meta = fs::symlink_metadata(&dir)?;
        assert!(meta.is_dir());
        assert_eq!(meta.permissions().mode() & 0o777, 0o700);
        assert_eq!((meta.uid(), meta.gid()), (me.uid, me.gid));
        Ok(())
    }

    #[test]
    fn existing_directory_is_left_alone() -> eyre::Result<()> {
        let root = tempfile::tempdir()?;
        let dir = root.path().join("1001");
        fs::create_dir(&dir)?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o750))?;

        fs().ensure_directory(&dir, Identity::current(), 0o700)?;
        fs().ensure_directory(&dir, Identity::current(), 0o700)?;
        assert_eq!(fs::metadata(&dir)?.permissions().mode() & 0o777, 0o750);
        Ok(())
    }

    #[test]
    fn symlinked_directory_is_refused() -> eyre::Result<()> {
        let root = tempfile::tempdir()?;
        let elsewhere = tempfile::tempdir()?;
        let dir = root.path().join("1001");
        symlink(elsewhere.path(), &dir)?;

        let err = fs().ensure_directory(&dir, Identity::current(), 0o700).unwrap_err();
        assert!(is_violation(&err), "{err}");

        let dangling = root.path().join("1002");
        symlink(root.path().join("nowhere"), &dangling)?;
        let err = fs().ensure_directory(&dangling, Identity::current(), 0o700).unwrap_err();
        assert!(is_violation(&err), "{err}");
        assert!(!root.path().join("nowhere").exists());
        Ok(())
    }

    #[test]
    fn file_in_place_of_directory_is_refused() -> eyre::Result<()> {
        let root = tempfile::tempdir()?;
        let dir = root.path().join("1001");
        fs::write(&dir, b"")?;

        let err = fs().ensure_directory(&dir, Identity::current(), 0o700).unwrap_err();
        assert!(err.to_string().ends_with("is not a directory"), "{err}");
        Ok(())
    }

    #[test]
    fn creates_keytab_file_once() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;

        let file = fs().create_file_if_missing(dir.path(), "client.keytab")?;
        let file = file.expect("file should be new");
        let meta = file.metadata()?;
        assert!(meta.is_file());
        assert_eq!(meta.len(), 0);
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        drop(file);

        let again = fs().create_file_if_missing(dir.path(), "client.keytab")?;
        assert!(again.is_none());
        Ok(())
    }

    #[test]
    fn existing_keytab_is_not_modified() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("client.keytab");
        fs::write(&path, b"\x05\x02keys")?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640))?;

        assert!(fs().create_file_if_missing(dir.path(), "client.keytab")?.is_none());
        assert_eq!(fs::read(&path)?, b"\x05\x02keys");
        assert_eq!(fs::metadata(&path)?.permissions().mode() & 0o777, 0o640);
        Ok(())
    }

    #[test]
    fn symlinked_keytab_is_refused() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("target");
        symlink(&target, dir.path().join("client.keytab"))?;

        let err = fs()
            .create_file_if_missing(dir.path(), "client.keytab")
            .unwrap_err();
        assert!(is_violation(&err) && err.to_string().contains("symlink"), "{err}");
        assert!(!target.exists());
        Ok(())
    }

    #[test]
    fn directory_in_place_of_keytab_is_refused() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir(dir.path().join("client.keytab"))?;

        let err = fs()
            .create_file_if_missing(dir.path(), "client.keytab")
            .unwrap_err();
        assert!(err.to_string().ends_with("is not a regular file"), "{err}");
        Ok(())
    }

    #[test]
    fn keytab_directory_must_not_be_a_symlink() -> eyre::Result<()> {
        let root = tempfile::tempdir()?;
        let real = root.path().join("real");
        fs::create_dir(&real)?;
        let link = root.path().join("1001");
        symlink(&real, &link)?;

        let err = fs().create_file_if_missing(&link, "client.keytab").unwrap_err();
        assert!(is_violation(&err), "{err}");
        assert!(!real.join("client.keytab").exists());
        Ok(())
    }
}
