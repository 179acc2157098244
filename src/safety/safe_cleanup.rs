//! Symlink-safe recursive removal.
//!
//! Sandboxed code can leave symlinks anywhere under its directory, pointing
//! anywhere on the host. `std::fs::remove_dir_all` has had TOCTOU bugs in
//! this area, so removal walks the tree with `openat`/`fstatat`/`unlinkat`
//! relative to directory descriptors opened with `O_NOFOLLOW`.

use crate::config::types::{JailError, Result};
use std::ffi::{CStr, CString};
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

const DIR_FLAGS: libc::c_int =
    libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC | libc::O_NOFOLLOW;

fn last_error() -> std::io::Error {
    std::io::Error::last_os_error()
}

struct FdGuard(RawFd);

impl Drop for FdGuard {
    fn drop(&mut self) {
        if self.0 >= 0 {
            unsafe {
                libc::close(self.0);
            }
        }
    }
}

/// Owns a `DIR*` so every early return closes it.
struct DirStream(*mut libc::DIR);

impl Drop for DirStream {
    fn drop(&mut self) {
        unsafe {
            libc::closedir(self.0);
        }
    }
}

fn to_cstring(bytes: &[u8], path: &Path) -> Result<CString> {
    CString::new(bytes).map_err(|_| {
        JailError::Filesystem(format!("Path contains NUL byte: {}", path.display()))
    })
}

fn open_dir_nofollow(path: &Path) -> Result<FdGuard> {
    let path_c = to_cstring(path.as_os_str().as_bytes(), path)?;
    let fd = unsafe { libc::open(path_c.as_ptr(), DIR_FLAGS) };
    if fd < 0 {
        return Err(JailError::Filesystem(format!(
            "open directory failed for {}: {}",
            path.display(),
            last_error()
        )));
    }
    Ok(FdGuard(fd))
}

fn fstatat_nofollow(parent_fd: RawFd, name: &CStr) -> Result<libc::stat> {
    let mut st = std::mem::MaybeUninit::<libc::stat>::zeroed();
    let rc = unsafe {
        libc::fstatat(parent_fd, name.as_ptr(), st.as_mut_ptr(), libc::AT_SYMLINK_NOFOLLOW)
    };
    if rc != 0 {
        return Err(JailError::Filesystem(format!(
            "fstatat failed for {:?}: {}",
            name,
            last_error()
        )));
    }
    Ok(unsafe { st.assume_init() })
}

fn unlink_at(parent_fd: RawFd, name: &CStr, flags: libc::c_int) -> Result<()> {
    let rc = unsafe { libc::unlinkat(parent_fd, name.as_ptr(), flags) };
    if rc != 0 {
        return Err(JailError::Filesystem(format!(
            "unlinkat failed for {:?}: {}",
            name,
            last_error()
        )));
    }
    Ok(())
}

fn remove_dir_at(parent_fd: RawFd, name: &CStr, root_dev: libc::dev_t) -> Result<()> {
    let child_fd = unsafe { libc::openat(parent_fd, name.as_ptr(), DIR_FLAGS) };
    if child_fd < 0 {
        return Err(JailError::Filesystem(format!(
            "openat failed for directory {:?}: {}",
            name,
            last_error()
        )));
    }
    let child = FdGuard(child_fd);
    make_owner_writable(child.0);
    remove_contents(child.0, root_dev)?;
    drop(child);
    unlink_at(parent_fd, name, libc::AT_REMOVEDIR)
}

/// Read-only directories copied into the sandbox keep their mode; entries
/// cannot be unlinked from them until the owner bits are restored.
fn make_owner_writable(dir_fd: RawFd) {
    let mut st = std::mem::MaybeUninit::<libc::stat>::zeroed();
    if unsafe { libc::fstat(dir_fd, st.as_mut_ptr()) } != 0 {
        return;
    }
    let st = unsafe { st.assume_init() };
    let owner = libc::S_IRWXU as libc::mode_t;
    if st.st_mode & owner != owner && st.st_uid == unsafe { libc::geteuid() } {
        // Failure surfaces as the unlinkat error that follows.
        unsafe {
            libc::fchmod(dir_fd, (st.st_mode & 0o7777) | owner);
        }
    }
}

fn remove_contents(dir_fd: RawFd, root_dev: libc::dev_t) -> Result<()> {
    // fdopendir takes ownership of its descriptor, so iterate over a dup.
    let iter_fd = unsafe { libc::dup(dir_fd) };
    if iter_fd < 0 {
        return Err(JailError::Filesystem(format!("dup failed: {}", last_error())));
    }
    let dir = unsafe { libc::fdopendir(iter_fd) };
    if dir.is_null() {
        unsafe {
            libc::close(iter_fd);
        }
        return Err(JailError::Filesystem(format!("fdopendir failed: {}", last_error())));
    }
    let stream = DirStream(dir);

    // Collect names first: unlinking while readdir is positioned is unspecified.
    let mut names = Vec::new();
    loop {
        unsafe {
            *libc::__errno_location() = 0;
        }
        let entry = unsafe { libc::readdir(stream.0) };
        if entry.is_null() {
            let errno = unsafe { *libc::__errno_location() };
            if errno != 0 {
                return Err(JailError::Filesystem(format!(
                    "readdir failed: {}",
                    std::io::Error::from_raw_os_error(errno)
                )));
            }
            break;
        }
        let name = unsafe { CStr::from_ptr((*entry).d_name.as_ptr()) };
        let bytes = name.to_bytes();
        if bytes != b"." && bytes != b".." {
            names.push(name.to_owned());
        }
    }
    drop(stream);

    for name in names {
        let st = fstatat_nofollow(dir_fd, &name)?;
        if st.st_mode & libc::S_IFMT == libc::S_IFDIR {
            if st.st_dev != root_dev {
                return Err(JailError::Filesystem(format!(
                    "Refusing to cross filesystem boundary at {:?}",
                    name
                )));
            }
            remove_dir_at(dir_fd, &name, root_dev)?;
        } else {
            unlink_at(dir_fd, &name, 0)?;
        }
    }
    Ok(())
}

/// Remove `path` and everything below it without following symlinks.
///
/// A missing path is not an error. A symlink at `path` itself is unlinked,
/// never its target.
pub fn remove_tree_secure(path: &Path) -> Result<()> {
    if std::fs::symlink_metadata(path).is_err() {
        return Ok(());
    }

    let parent = path.parent().ok_or_else(|| {
        JailError::Filesystem(format!("Cannot remove path without parent: {}", path.display()))
    })?;
    let name = path.file_name().ok_or_else(|| {
        JailError::Filesystem(format!("Cannot remove path without file name: {}", path.display()))
    })?;
    let name_c = to_cstring(name.as_bytes(), path)?;

    let parent_fd = open_dir_nofollow(parent)?;
    let st = fstatat_nofollow(parent_fd.0, &name_c)?;
    if st.st_mode & libc::S_IFMT == libc::S_IFDIR {
        remove_dir_at(parent_fd.0, &name_c, st.st_dev)
    } else {
        unlink_at(parent_fd.0, &name_c, 0)
    }
}
