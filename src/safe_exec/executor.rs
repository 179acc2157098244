use super::json_safe::{json_safe, merge};
use super::value::Globals;
use super::wrapper::{jailed_wrapper, unsafe_wrapper};
use crate::config::types::{
    ExecutionResult, JailError, JailRequest, ResourceLimits, SafeExecError, SandboxConfig, PYTHON,
};
use crate::exec::executor::jail_code;
use crate::observability::audit::events;
use crate::safety::workspace::SandboxDir;
use crate::utils::output::{communicate, exit_status_code};
use log::warn;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Interpreter used by the unsafe fallback when `python` is not configured.
const DEFAULT_PYTHON: &str = "python3";

type SafeResult<T> = std::result::Result<T, SafeExecError>;

/// Which implementation a [`SafeExecutor`] is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    Jailed,
    /// No jail at all; for local debugging only
    Unsafe,
}

/// Per-call options for `safe_exec`.
#[derive(Clone, Debug, Default)]
pub struct ExecOptions {
    /// Files and directories copied into the sandbox
    pub files: Vec<PathBuf>,
    /// Directories made importable; each is copied in and its basename put on sys.path
    pub python_path: Vec<PathBuf>,
    pub slug: Option<String>,
    pub limits: Option<ResourceLimits>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.files.push(path.as_ref().to_path_buf());
        self
    }

    pub fn python_path(mut self, dir: impl AsRef<Path>) -> Self {
        self.python_path.push(dir.as_ref().to_path_buf());
        self
    }

    pub fn slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    fn slug_or_default(&self) -> &str {
        self.slug.as_deref().unwrap_or("<unnamed>")
    }
}

/// `safe_exec` bound to one configuration and one mode.
///
/// The mode is chosen once: unsafe when the `always_unsafe` flag is set or
/// `python` is not configured, jailed otherwise.
#[derive(Clone, Debug)]
pub struct SafeExecutor {
    config: SandboxConfig,
    mode: ExecMode,
}

impl SafeExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        let mode = if config.always_unsafe || !config.is_configured(PYTHON) {
            ExecMode::Unsafe
        } else {
            ExecMode::Jailed
        };
        if mode == ExecMode::Unsafe {
            warn!("Python is not jailed: safe_exec will run code without a sandbox");
        }
        Self { config, mode }
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run `code` with `globals`, merging the surviving globals back in place.
    pub fn exec(&self, code: &str, globals: &mut Globals, options: &ExecOptions) -> SafeResult<()> {
        match self.mode {
            ExecMode::Jailed => safe_exec(&self.config, code, globals, options),
            ExecMode::Unsafe => {
                events::unsafe_execution(options.slug_or_default());
                not_safe_exec(&self.config, code, globals, options)
            }
        }
    }
}

/// Execute Python `code` in the jail with `globals`.
///
/// Only JSON-safe globals cross in either direction. On success the returned
/// globals are merged into `globals`; on failure `globals` is untouched.
pub fn safe_exec(
    config: &SandboxConfig,
    code: &str,
    globals: &mut Globals,
    options: &ExecOptions,
) -> SafeResult<()> {
    let payload = stdin_payload(code, globals)?;

    let mut path_entries = Vec::with_capacity(options.python_path.len());
    for dir in &options.python_path {
        path_entries.push(basename(dir)?);
    }

    let mut request = JailRequest::new(PYTHON)
        .code(jailed_wrapper(&path_entries))
        .files(&options.files)
        .files(&options.python_path)
        .stdin(payload);
    request.slug = options.slug.clone();
    request.limits = options.limits;

    let result = jail_code(config, &request)?;
    if !result.success() {
        let limits = options.limits.unwrap_or(config.limits);
        return Err(SafeExecError::from_failed_result(&result, &limits));
    }
    merge_output(globals, &result)
}

/// Execute Python `code` without any jail.
///
/// Runs the host interpreter in a scratch directory holding `files`, with
/// the full `python_path` directories importable. An exception in `code`
/// fails the call with `"<ExceptionClassName>: <message>"`.
pub fn not_safe_exec(
    config: &SandboxConfig,
    code: &str,
    globals: &mut Globals,
    options: &ExecOptions,
) -> SafeResult<()> {
    let payload = stdin_payload(code, globals)?;

    let mut scratch = SandboxDir::create(&config.sandbox_root)?;
    let outcome = run_unsafe(&scratch, config, payload, options);
    if let Err(e) = scratch.cleanup() {
        events::cleanup_failure(options.slug_or_default(), scratch.path(), e.to_string());
    }

    let result = outcome?;
    if !result.success() {
        let stderr = result.stderr_lossy();
        return Err(SafeExecError::Opaque(stderr.trim_end().to_string()));
    }
    merge_output(globals, &result)
}

fn run_unsafe(
    scratch: &SandboxDir,
    config: &SandboxConfig,
    payload: Vec<u8>,
    options: &ExecOptions,
) -> SafeResult<ExecutionResult> {
    for file in &options.files {
        scratch.copy_in(file)?;
    }

    let mut path_entries = Vec::with_capacity(options.python_path.len());
    for dir in &options.python_path {
        let full = std::fs::canonicalize(dir).map_err(JailError::from)?;
        path_entries.push(full.to_string_lossy().into_owned());
    }
    let wrapper = scratch.write_code(&unsafe_wrapper(&path_entries))?;

    let python = config
        .command(PYTHON)
        .map(|c| c.executable.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PYTHON));

    let mut child = Command::new(&python)
        .arg("-B")
        .arg(&wrapper)
        .current_dir(scratch.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            JailError::Process(format!("Failed to spawn {}: {}", python.display(), e))
        })?;

    let communicated = communicate(&mut child, Some(payload))?;
    Ok(ExecutionResult {
        stdout: communicated.stdout,
        stderr: communicated.stderr,
        status: exit_status_code(communicated.status),
        timed_out: false,
    })
}

fn stdin_payload(code: &str, globals: &Globals) -> SafeResult<Vec<u8>> {
    let safe = json_safe(globals)?;
    let payload = Value::Array(vec![Value::String(code.to_string()), Value::Object(safe)]);
    serde_json::to_vec(&payload)
        .map_err(|e| SafeExecError::Protocol(format!("Cannot encode globals: {}", e)))
}

fn merge_output(globals: &mut Globals, result: &ExecutionResult) -> SafeResult<()> {
    let returned: Value = serde_json::from_slice(&result.stdout).map_err(|e| {
        SafeExecError::Protocol(format!(
            "stdout is not JSON ({}): {}",
            e,
            result.stdout_lossy()
        ))
    })?;
    match returned {
        Value::Object(map) => {
            merge(globals, map);
            Ok(())
        }
        other => Err(SafeExecError::Protocol(format!(
            "expected a JSON object of globals, got {}",
            other
        ))),
    }
}

fn basename(dir: &Path) -> SafeResult<String> {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            SafeExecError::Jail(JailError::Config(format!(
                "python_path entry has no directory name: {}",
                dir.display()
            )))
        })
}
