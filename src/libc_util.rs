//! Thin wrappers around the system calls that `std` does not expose.

use std::ffi::{c_int, c_uint, CStr};
use std::fs::File;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Resource identifier type accepted by `setrlimit(2)` on this libc.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub type RlimitResource = libc::__rlimit_resource_t;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
pub type RlimitResource = c_int;

/// Is `fd` one of stdin, stdout, or stderr?
pub fn is_stdio(fd: RawFd) -> bool {
    matches!(
        fd,
        libc::STDIN_FILENO | libc::STDOUT_FILENO | libc::STDERR_FILENO
    )
}

/// `openat(2)` relative to an open directory, returning the new file.
pub fn open_at(dir: &File, name: &CStr, flags: c_int, mode: libc::mode_t) -> io::Result<File> {
    let fd @ 0.. = (unsafe { libc::openat(dir.as_raw_fd(), name.as_ptr(), flags, mode as c_uint) })
    else {
        return Err(io::Error::last_os_error());
    };
    Ok(File::from(unsafe { OwnedFd::from_raw_fd(fd) }))
}

/// `fstatat(2)` relative to an open directory, without following a final symlink.
pub fn stat_at_nofollow(dir: &File, name: &CStr) -> io::Result<libc::stat> {
    let mut stat_buf = mem::MaybeUninit::<libc::stat>::uninit();
    let 0 = (unsafe {
        libc::fstatat(
            dir.as_raw_fd(),
            name.as_ptr(),
            stat_buf.as_mut_ptr(),
            libc::AT_SYMLINK_NOFOLLOW,
        )
    }) else {
        return Err(io::Error::last_os_error());
    };
    Ok(unsafe { stat_buf.assume_init() })
}

/// File type bits of a `stat` result.
pub fn file_type(stat: &libc::stat) -> libc::mode_t {
    stat.st_mode & libc::S_IFMT
}

/// `prctl(2)` with a single argument, the rest zero.
pub fn prctl(option: c_int, arg: libc::c_ulong) -> io::Result<()> {
    let zero: libc::c_ulong = 0;
    let 0 = (unsafe { libc::prctl(option, arg, zero, zero, zero) }) else {
        return Err(io::Error::last_os_error());
    };
    Ok(())
}

/// Open `path` with `flags` and make it descriptor `target`.
pub fn redirect_fd(path: &CStr, target: c_int, flags: c_int) -> io::Result<()> {
    let fd @ 0.. = (unsafe { libc::open(path.as_ptr(), flags | libc::O_CLOEXEC) }) else {
        return Err(io::Error::last_os_error());
    };
    let source = unsafe { OwnedFd::from_raw_fd(fd) };
    if fd == target {
        // Already in place.
        mem::forget(source);
        return Ok(());
    }
    let 0.. = (unsafe { libc::dup2(source.as_raw_fd(), target) }) else {
        return Err(io::Error::last_os_error());
    };
    Ok(())
}

/// Close every descriptor numbered `first` or above.
pub fn close_from(first: c_int) -> io::Result<()> {
    let result = unsafe {
        libc::syscall(
            libc::SYS_close_range,
            first as c_uint,
            c_uint::MAX,
            0 as c_uint,
        )
    };
    if result == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::ENOSYS) {
        return Err(err);
    }

    // Kernels before 5.9: walk up to the descriptor limit.
    let limit = get_rlimit(libc::RLIMIT_NOFILE)?;
    let last = c_int::try_from(limit.rlim_cur).unwrap_or(c_int::MAX);
    for fd in first..last {
        if unsafe { libc::close(fd) } == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EBADF) {
                return Err(err);
            }
        }
    }
    Ok(())
}

/// `getrlimit(2)`.
pub fn get_rlimit(resource: RlimitResource) -> io::Result<libc::rlimit> {
    let mut limit = mem::MaybeUninit::<libc::rlimit>::uninit();
    let 0 = (unsafe { libc::getrlimit(resource, limit.as_mut_ptr()) }) else {
        return Err(io::Error::last_os_error());
    };
    Ok(unsafe { limit.assume_init() })
}

/// `setrlimit(2)` with equal soft and hard limits.
pub fn set_rlimit(resource: RlimitResource, value: libc::rlim_t) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value,
        rlim_max: value,
    };
    let 0 = (unsafe { libc::setrlimit(resource, &limit) }) else {
        return Err(io::Error::last_os_error());
    };
    Ok(())
}

/// Empty the process environment.
pub fn clear_env() -> io::Result<()> {
    let 0 = (unsafe { libc::clearenv() }) else {
        return Err(io::Error::last_os_error());
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::io::Write;

    #[test]
    fn stdio_descriptors() {
        assert!(is_stdio(0) && is_stdio(1) && is_stdio(2));
        assert!(!is_stdio(3));
        assert!(!is_stdio(-1));
    }

    #[test]
    fn stat_at_does_not_follow_symlinks() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("target"), b"x")?;
        std::os::unix::fs::symlink("target", dir.path().join("link"))?;

        let handle = File::open(dir.path())?;
        let link = stat_at_nofollow(&handle, &CString::new("link")?)?;
        assert_eq!(file_type(&link), libc::S_IFLNK);
        let target = stat_at_nofollow(&handle, &CString::new("target")?)?;
        assert_eq!(file_type(&target), libc::S_IFREG);

        let missing = stat_at_nofollow(&handle, &CString::new("missing")?).unwrap_err();
        assert_eq!(missing.raw_os_error(), Some(libc::ENOENT));
        Ok(())
    }

    #[test]
    fn open_at_creates_relative_to_directory() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let handle = File::open(dir.path())?;
        let mut file = open_at(
            &handle,
            &CString::new("created")?,
            libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL | libc::O_CLOEXEC,
            0o600,
        )?;
        file.write_all(b"ok")?;
        assert_eq!(std::fs::read(dir.path().join("created"))?, b"ok");
        Ok(())
    }

    #[test]
    fn soft_rlimit_is_within_hard_limit() -> eyre::Result<()> {
        let limit = get_rlimit(libc::RLIMIT_NOFILE)?;
        assert!(limit.rlim_cur <= limit.rlim_max);
        Ok(())
    }
}
