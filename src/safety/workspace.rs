/// Per-execution sandbox directory
///
/// Layout:
///   <sandbox_root>/codejail-<uuid>/      0775, child cwd
///   <sandbox_root>/codejail-<uuid>/tmp/  0777, TMPDIR for the child
///
/// The directory lives exactly as long as one jail call: `cleanup()` on the
/// normal path, `Drop` for early returns and panics.
use crate::config::types::{JailError, Result};
use crate::safety::safe_cleanup;
use log::{debug, warn};
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use uuid::Uuid;

/// Name of the entry file written for `code`.
pub const CODE_FILE: &str = "jailed_code";

pub struct SandboxDir {
    root: PathBuf,
    /// User the child runs as; files it leaves in tmp/ may need its rights to remove.
    sandbox_user: Option<String>,
    removed: bool,
}

impl SandboxDir {
    /// Create `codejail-<uuid>` under `base` with the sandbox permissions.
    pub fn create(base: &Path) -> Result<Self> {
        let root = base.join(format!("codejail-{}", Uuid::new_v4()));
        fs::create_dir(&root).map_err(|e| {
            JailError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create sandbox directory {}: {}", root.display(), e),
            ))
        })?;
        let dir = Self {
            root,
            sandbox_user: None,
            removed: false,
        };

        // Explicit chmod: create_dir is subject to the umask.
        fs::set_permissions(&dir.root, fs::Permissions::from_mode(0o775))?;
        let tmp = dir.tmp_dir();
        fs::create_dir(&tmp)?;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o777))?;
        Ok(dir)
    }

    pub fn with_sandbox_user(mut self, user: Option<&str>) -> Self {
        self.sandbox_user = user.map(str::to_string);
        self
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Copy a host file, directory or symlink into the sandbox root under its
    /// own file name. Symlinks are recreated, never followed.
    pub fn copy_in(&self, source: &Path) -> Result<PathBuf> {
        let name = source.file_name().ok_or_else(|| {
            JailError::Config(format!(
                "Cannot copy {} into the sandbox: no file name",
                source.display()
            ))
        })?;
        let dest = self.root.join(name);
        copy_entry(source, &dest)?;
        Ok(dest)
    }

    /// Write `(name, content)` flat in the sandbox root.
    pub fn write_extra_file(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        validate_extra_file_name(name)?;
        let dest = self.root.join(name);
        fs::write(&dest, content)?;
        Ok(dest)
    }

    pub fn write_code(&self, code: &str) -> Result<PathBuf> {
        let dest = self.root.join(CODE_FILE);
        fs::write(&dest, code.as_bytes())?;
        Ok(dest)
    }

    /// Remove the sandbox directory (idempotent).
    pub fn cleanup(&mut self) -> Result<()> {
        if self.removed {
            return Ok(());
        }
        let first = safe_cleanup::remove_tree_secure(&self.root);
        let result = match (first, self.sandbox_user.as_deref()) {
            (Ok(()), _) => Ok(()),
            (Err(e), Some(user)) => {
                debug!("Retrying removal of {} after {}", self.root.display(), e);
                self.purge_tmp_as(user);
                safe_cleanup::remove_tree_secure(&self.root)
            }
            (Err(e), None) => Err(e),
        };
        if result.is_ok() {
            self.removed = true;
        }
        result
    }

    /// Files the sandbox user created in tmp/ may not be removable by us.
    fn purge_tmp_as(&self, user: &str) {
        let status = Command::new("sudo")
            .args(["-u", user, "rm", "-rf", "--"])
            .arg(self.tmp_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(s) if s.success() => {}
            Ok(s) => warn!("sudo rm of {} exited with {}", self.tmp_dir().display(), s),
            Err(e) => warn!("sudo rm of {} failed: {}", self.tmp_dir().display(), e),
        }
    }
}

impl Drop for SandboxDir {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!("Failed to remove sandbox directory {}: {}", self.root.display(), e);
        }
    }
}

/// Extra files land flat in the root: no separators, no `.` or `..`.
pub fn validate_extra_file_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0') {
        return Err(JailError::Config(format!("Invalid extra file name: {:?}", name)));
    }
    Ok(())
}

fn copy_entry(source: &Path, dest: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(source).map_err(|e| {
        JailError::Io(std::io::Error::new(
            e.kind(),
            format!("Cannot copy {} into the sandbox: {}", source.display(), e),
        ))
    })?;
    let file_type = meta.file_type();
    if file_type.is_symlink() {
        let target = fs::read_link(source)?;
        symlink(target, dest)?;
    } else if file_type.is_dir() {
        fs::create_dir(dest)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_entry(&entry.path(), &dest.join(entry.file_name()))?;
        }
        // Children first: a read-only source directory must not block them.
        fs::set_permissions(dest, meta.permissions())?;
    } else {
        fs::copy(source, dest)?;
    }
    Ok(())
}
