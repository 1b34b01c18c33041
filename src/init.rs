//! Make sure the calling user has a keytab.

use std::path::PathBuf;

use tracing::{debug, span, Level};

use crate::capability::{self, Elevation};
use crate::config;
use crate::error::Result;
use crate::identity::Identity;
use crate::keytab::KeytabWriter;
use crate::path::KeytabLayout;
use crate::safe_fs::SafeFs;

/// Everything one run needs to know: where keytabs live, whose keytab it is, and how privileged
/// steps get their privilege.
#[derive(Clone, Debug)]
pub struct Initializer {
    layout: KeytabLayout,
    identity: Identity,
    elevation: Elevation,
}

impl Initializer {
    pub fn new(layout: KeytabLayout, identity: Identity, elevation: Elevation) -> Initializer {
        Initializer {
            layout,
            identity,
            elevation,
        }
    }

    /// Ensure the user's directory and keytab exist, creating an empty keytab if there is none.
    /// An existing keytab is left exactly as it is.
    ///
    /// Returns the keytab's full path.
    pub fn run(&self) -> Result<PathBuf> {
        let span = span!(Level::DEBUG, "init", uid = self.identity.uid);
        let _span_guard = span.enter();

        let paths = self.layout.user_paths(self.identity.uid)?;
        let fs = SafeFs::new(self.elevation);

        fs.validate_base_dir(&paths.base_dir)?;
        fs.ensure_directory(&paths.user_dir, self.identity, config::KEYTAB_DIR_MODE)?;

        match fs.create_file_if_missing(&paths.user_dir, paths.file_name)? {
            Some(mut file) => {
                let writer = KeytabWriter::new(self.elevation);
                writer.write_empty_header(&mut file, &paths.full_path)?;
                writer.finalize_ownership(&file, &paths.full_path, self.identity)?;
                debug!(path = %paths.full_path.display(), "created keytab");
            }
            None => debug!(path = %paths.full_path.display(), "keytab already present"),
        }

        Ok(paths.full_path)
    }
}

/// Initialize the real caller's keytab with capability brackets, then give up every capability.
///
/// The process must already be hardened.
pub fn run(layout: KeytabLayout) -> Result<PathBuf> {
    let path = Initializer::new(layout, Identity::current(), Elevation::Capabilities).run()?;
    capability::relinquish()?;
    Ok(path)
}
