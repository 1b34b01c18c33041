//! Writing an empty keytab and handing it to its owner.

use std::fs::{File, Permissions};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use caps::Capability;
use tracing::debug;

use crate::capability::{CapabilityBracket, CapabilitySet, Elevation};
use crate::config;
use crate::error::{bail_violation, Error, Result};
use crate::identity::Identity;
use crate::libc_util;

/// Keytab file format version byte.
pub const KEYTAB_VERSION: u8 = 0x05;
/// Keytab format variant byte.
pub const KEYTAB_FORMAT: u8 = 0x02;
/// A keytab with a header and no entries.
pub const EMPTY_KEYTAB: [u8; 2] = [KEYTAB_VERSION, KEYTAB_FORMAT];

#[derive(Clone, Debug, Copy)]
pub struct KeytabWriter {
    elevation: Elevation,
}

impl KeytabWriter {
    pub fn new(elevation: Elevation) -> KeytabWriter {
        KeytabWriter { elevation }
    }

    /// Write the two header bytes to a freshly created keytab and flush them to disk.
    ///
    /// Each byte is written with a single call that must write exactly one byte. There is no
    /// retry: a short or interrupted write is an error.
    pub fn write_empty_header(&self, file: &mut File, path: &Path) -> Result<()> {
        if libc_util::is_stdio(file.as_raw_fd()) {
            bail_violation!(path, "keytab handle is a standard stream");
        }

        for byte in EMPTY_KEYTAB {
            let written = file
                .write(&[byte])
                .map_err(Error::io("unable to write header to", path))?;
            if written != 1 {
                return Err(Error::io("unable to write header to", path)(
                    std::io::ErrorKind::WriteZero.into(),
                ));
            }
        }
        file.sync_all().map_err(Error::io("unable to sync", path))?;
        debug!(path = %path.display(), "wrote empty keytab");
        Ok(())
    }

    /// Restrict the keytab to mode 0600 and give it to `owner`.
    ///
    /// The mode is always set. Ownership only changes when it differs, in its own bracket.
    pub fn finalize_ownership(&self, file: &File, path: &Path, owner: Identity) -> Result<()> {
        let meta = file
            .metadata()
            .map_err(Error::io("unable to inspect", path))?;
        if !meta.file_type().is_file() {
            bail_violation!(path, "is not a regular file");
        }

        file.set_permissions(Permissions::from_mode(config::KEYTAB_FILE_MODE))
            .map_err(Error::io("unable to set mode of", path))?;

        if (meta.uid(), meta.gid()) != (owner.uid, owner.gid) {
            let _bracket = CapabilityBracket::acquire(
                self.elevation,
                &CapabilitySet::new(&[Capability::CAP_CHOWN])?,
            )?;
            std::os::unix::fs::fchown(file, Some(owner.uid), Some(owner.gid))
                .map_err(Error::io("unable to set ownership of", path))?;
            debug!(uid = owner.uid, gid = owner.gid, "keytab handed over");
        }
        Ok(())
    }
}
