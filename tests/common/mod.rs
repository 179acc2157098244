//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use codejail::{SandboxConfig, SandboxConfigBuilder, PYTHON};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Absolute path of a working python3, or None when the host has none.
pub fn python3() -> Option<PathBuf> {
    let output = Command::new("python3")
        .args(["-c", "import sys; print(sys.executable)"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let path = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
    path.is_absolute().then_some(path)
}

/// Sandbox user for tests that need a distinct account.
pub fn test_user() -> Option<String> {
    std::env::var("CODEJAIL_TEST_USER").ok().filter(|u| !u.is_empty())
}

/// Builder with python registered (as the test user, if any) and sandbox
/// directories created under `root`.
pub fn python_builder(python: &Path, root: &Path) -> SandboxConfigBuilder {
    let user = test_user();
    SandboxConfig::builder()
        .configure(PYTHON, python, user.as_deref())
        .sandbox_root(root)
}

pub fn entries_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Evaluates to the python3 path, or returns from the test with a note.
macro_rules! require_python {
    () => {
        match common::python3() {
            Some(path) => path,
            None => {
                eprintln!("python3 not found; skipping");
                return;
            }
        }
    };
}
