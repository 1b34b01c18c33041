//! Build-time configuration.
//!
//! Every value here is fixed when the crate is compiled. Nothing is read from the environment or
//! from a file at runtime: the environment is cleared during hardening anyway.

/// Directory under which per-user keytab directories live.
///
/// Set `KCRON_CLIENT_KEYTAB_DIR` when building to override it. The directory itself is never
/// created by this crate; it is an administrative prerequisite.
pub const CLIENT_KEYTAB_DIR: &str = match option_env!("KCRON_CLIENT_KEYTAB_DIR") {
    Some(dir) => dir,
    None => "/var/kerberos/krb5/user",
};

/// Upper bound on the length of any path this crate renders. A path whose length reaches this
/// value is rejected, never truncated.
pub const FILE_PATH_MAX_LENGTH: usize = libc::PATH_MAX as usize;

/// Name of the keytab file inside each per-user directory.
pub const KEYTAB_FILE_NAME: &str = "client.keytab";

/// Mode of the per-user directory.
pub const KEYTAB_DIR_MODE: u32 = 0o700;

/// Mode of the keytab file.
pub const KEYTAB_FILE_MODE: u32 = 0o600;

/// Whether the syscall allowlist is installed during hardening. Build with
/// `KCRON_SYSCALL_FILTER=0` to leave it out.
pub const SYSCALL_FILTER: bool = match option_env!("KCRON_SYSCALL_FILTER") {
    Some(value) => !(value.len() == 1 && value.as_bytes()[0] == b'0'),
    None => true,
};

/// `tracing` filter directives for the binaries. Defaults to `off` so that a failing run prints
/// exactly one diagnostic line.
pub const LOG_DIRECTIVES: &str = match option_env!("KCRON_LOG") {
    Some(directives) => directives,
    None => "off",
};
