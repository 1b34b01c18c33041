/// The real user and group of the calling process.
///
/// This is who the keytab is for: it names the per-user directory and owns the result. The
/// effective (privileged) identity is never used for either.
#[derive(Clone, Debug, Copy, Eq, PartialEq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    /// Read the real uid and gid of this process.
    pub fn current() -> Identity {
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        Identity { uid, gid }
    }
}
