use std::path::{Path, PathBuf};

use tracing::trace;

use crate::config;
use crate::error::{bail_config, Error, Result};

/// Where keytabs live: a base directory and the length limit every rendered path must respect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeytabLayout {
    base_dir: PathBuf,
    max_len: usize,
}

/// The paths for one identity's keytab.
///
/// `user_dir` is always exactly one segment (the numeric uid) below `base_dir`, and `file_name`
/// is the compiled-in constant, never anything derived from input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeytabPath {
    pub base_dir: PathBuf,
    pub user_dir: PathBuf,
    pub file_name: &'static str,
    pub full_path: PathBuf,
}

impl KeytabLayout {
    /// The layout compiled into this build.
    pub fn from_config() -> Result<KeytabLayout> {
        KeytabLayout::new(config::CLIENT_KEYTAB_DIR, config::FILE_PATH_MAX_LENGTH)
    }

    /// Validate `base_dir` and build a layout around it.
    ///
    /// The base directory must be a non-empty absolute path with a parent directory, free of NUL
    /// bytes, and shorter than `max_len`. Trailing slashes are dropped.
    pub fn new(base_dir: &str, max_len: usize) -> Result<KeytabLayout> {
        if base_dir.is_empty() {
            bail_config!("client keytab directory is not set");
        }
        if base_dir.len() >= max_len {
            bail_config!(
                "client keytab directory is too long ({} bytes, limit {})",
                base_dir.len(),
                max_len
            );
        }
        if base_dir.contains('\0') {
            bail_config!("client keytab directory contains a NUL byte");
        }
        if !base_dir.starts_with('/') {
            bail_config!("client keytab directory {base_dir:?} is not absolute");
        }

        let trimmed = base_dir.trim_end_matches('/');
        if trimmed.is_empty() {
            bail_config!("client keytab directory cannot be the filesystem root");
        }

        Ok(KeytabLayout {
            base_dir: PathBuf::from(trimmed),
            max_len,
        })
    }

    /// The configured base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// The directory whose subtree the process is confined to: the parent of the base directory.
    pub fn scoping_root(&self) -> &Path {
        // `new` guarantees an absolute path other than `/`, which always has a parent.
        self.base_dir.parent().unwrap_or_else(|| Path::new("/"))
    }

    /// Derive the keytab paths for `uid`.
    ///
    /// The numeric uid is used as-is; it is never resolved to a user name. Any path that would
    /// reach the length limit is an error.
    pub fn user_paths(&self, uid: u32) -> Result<KeytabPath> {
        let base = self.base_dir.to_str().ok_or_else(|| {
            Error::InvalidConfiguration("client keytab directory is not valid UTF-8".into())
        })?;
        let uid = uid.to_string();

        let user_dir = self.render("keytab directory", &[base, "/", &uid])?;
        let full_path = self.render("keytab", &[&user_dir, "/", config::KEYTAB_FILE_NAME])?;
        trace!(%user_dir, %full_path, "derived keytab paths");

        Ok(KeytabPath {
            base_dir: self.base_dir.clone(),
            user_dir: PathBuf::from(user_dir),
            file_name: config::KEYTAB_FILE_NAME,
            full_path: PathBuf::from(full_path),
        })
    }

    /// Concatenate `parts`, rejecting the result if it would reach the length limit.
    fn render(&self, what: &'static str, parts: &[&str]) -> Result<String> {
        let len: usize = parts.iter().map(|p| p.len()).sum();
        if len >= self.max_len {
            bail_config!("{what} path is too long ({len} bytes, limit {})", self.max_len);
        }

        let mut rendered = String::new();
        rendered.try_reserve_exact(len).map_err(Error::alloc(what))?;
        for part in parts {
            rendered.push_str(part);
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_user_dir_and_file() {
        let layout = KeytabLayout::new("/var/kcron", 4096).unwrap();
        let paths = layout.user_paths(1001).unwrap();
        assert_eq!(paths.base_dir, Path::new("/var/kcron"));
        assert_eq!(paths.user_dir, Path::new("/var/kcron/1001"));
        assert_eq!(paths.file_name, "client.keytab");
        assert_eq!(paths.full_path, Path::new("/var/kcron/1001/client.keytab"));
    }

    #[test]
    fn user_dir_is_one_segment_below_base() {
        let layout = KeytabLayout::new("/srv/keytabs", 4096).unwrap();
        for uid in [0, 1, 1001, 65534, u32::MAX] {
            let paths = layout.user_paths(uid).unwrap();
            assert_eq!(paths.user_dir.parent(), Some(layout.base_dir()));
            assert_eq!(paths.user_dir.file_name().unwrap(), uid.to_string().as_str());
            assert_eq!(paths.full_path.parent(), Some(paths.user_dir.as_path()));
        }
    }

    #[test]
    fn trailing_slashes_are_dropped() {
        let layout = KeytabLayout::new("/var/kcron//", 4096).unwrap();
        assert_eq!(
            layout.user_paths(7).unwrap().full_path,
            Path::new("/var/kcron/7/client.keytab")
        );
    }

    #[test]
    fn scoping_root_is_parent_of_base() {
        let layout = KeytabLayout::new("/var/kcron", 4096).unwrap();
        assert_eq!(layout.scoping_root(), Path::new("/var"));

        let layout = KeytabLayout::new("/kcron", 4096).unwrap();
        assert_eq!(layout.scoping_root(), Path::new("/"));
    }

    #[test]
    fn rejects_unusable_base_dirs() {
        for base in ["", "relative/dir", "/", "///", "/var/kc\0ron"] {
            let err = KeytabLayout::new(base, 4096).unwrap_err();
            assert!(matches!(err, Error::InvalidConfiguration(_)), "{base:?}: {err}");
        }
    }

    #[test]
    fn rejects_base_dir_at_limit() {
        let base = format!("/{}", "a".repeat(15));
        assert_eq!(base.len(), 16);
        assert!(KeytabLayout::new(&base, 16).is_err());
        assert!(KeytabLayout::new(&base, 17).is_ok());
    }

    #[test]
    fn rejects_rather_than_truncates_long_paths() {
        // "/var/kcron/1001" is 15 bytes, "/var/kcron/1001/client.keytab" is 29.
        let layout = KeytabLayout::new("/var/kcron", 29).unwrap();
        let err = layout.user_paths(1001).unwrap_err();
        assert!(err.to_string().contains("keytab path is too long"), "{err}");

        let layout = KeytabLayout::new("/var/kcron", 15).unwrap();
        let err = layout.user_paths(1001).unwrap_err();
        assert!(err.to_string().contains("keytab directory path is too long"), "{err}");

        let layout = KeytabLayout::new("/var/kcron", 30).unwrap();
        assert!(layout.user_paths(1001).is_ok());
    }
}
