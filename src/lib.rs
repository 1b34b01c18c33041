mod libc_util;

pub mod capability;
pub mod config;
mod error;
pub mod identity;
pub mod init;
pub mod keytab;
pub mod logging;
pub mod path;
pub mod safe_fs;
pub mod sandbox;

pub use capability::{CapabilityBracket, CapabilitySet, Elevation};
pub use error::{Error, Result};
pub use identity::Identity;
pub use keytab::KeytabWriter;
pub use path::{KeytabLayout, KeytabPath};
pub use safe_fs::SafeFs;
pub use sandbox::{Sandbox, Stage};
