//! Core types and structures for the codejail system

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Abstract command name used by safe_exec.
pub const PYTHON: &str = "python";

/// Names accepted by `set_limit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitName {
    /// CPU seconds (RLIMIT_CPU)
    #[serde(rename = "CPU")]
    Cpu,
    /// Wall-clock seconds enforced by the watchdog
    #[serde(rename = "REALTIME")]
    Realtime,
    /// Address-space bytes (RLIMIT_AS)
    #[serde(rename = "VMEM")]
    Vmem,
    /// Largest file the sandbox may write (RLIMIT_FSIZE)
    #[serde(rename = "FSIZE")]
    Fsize,
}

impl LimitName {
    pub const ALL: [LimitName; 4] = [
        LimitName::Cpu,
        LimitName::Realtime,
        LimitName::Vmem,
        LimitName::Fsize,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LimitName::Cpu => "CPU",
            LimitName::Realtime => "REALTIME",
            LimitName::Vmem => "VMEM",
            LimitName::Fsize => "FSIZE",
        }
    }
}

impl fmt::Display for LimitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitName {
    type Err = JailError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CPU" => Ok(LimitName::Cpu),
            "REALTIME" => Ok(LimitName::Realtime),
            "VMEM" => Ok(LimitName::Vmem),
            "FSIZE" => Ok(LimitName::Fsize),
            other => Err(JailError::Config(format!("Unknown limit name: {}", other))),
        }
    }
}

/// File-size allowance for the sandbox.
///
/// Zero does not mean "unlimited" here: the default denies every write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileSizeLimit {
    /// RLIMIT_FSIZE=0, any write fails
    WritesDenied,
    /// Files may grow up to this many bytes
    Bounded(u64),
}

impl FileSizeLimit {
    pub fn from_raw(bytes: u64) -> Self {
        if bytes == 0 {
            FileSizeLimit::WritesDenied
        } else {
            FileSizeLimit::Bounded(bytes)
        }
    }

    /// Value handed to setrlimit.
    pub fn as_rlimit(self) -> u64 {
        match self {
            FileSizeLimit::WritesDenied => 0,
            FileSizeLimit::Bounded(bytes) => bytes,
        }
    }
}

/// Resource limits applied to one jailed process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU seconds; None means unlimited
    pub cpu_seconds: Option<u64>,
    /// Wall-clock allowance; None disables the watchdog
    pub realtime: Option<Duration>,
    /// Address-space bytes; None means unlimited
    pub vmem_bytes: Option<u64>,
    /// File-size allowance
    pub fsize: FileSizeLimit,
}

impl Default for ResourceLimits {
    /// `{CPU:1, REALTIME:1, VMEM:0, FSIZE:0}`
    fn default() -> Self {
        Self {
            cpu_seconds: Some(1),
            realtime: Some(Duration::from_secs(1)),
            vmem_bytes: None,
            fsize: FileSizeLimit::WritesDenied,
        }
    }
}

fn nonzero(value: u64) -> Option<u64> {
    if value == 0 {
        None
    } else {
        Some(value)
    }
}

impl ResourceLimits {
    /// Set a limit from its raw numeric form. 0 is "unlimited" for CPU,
    /// REALTIME and VMEM but "no writes" for FSIZE.
    pub fn set_limit(&mut self, name: LimitName, value: u64) {
        match name {
            LimitName::Cpu => self.cpu_seconds = nonzero(value),
            LimitName::Realtime => self.realtime = nonzero(value).map(Duration::from_secs),
            LimitName::Vmem => self.vmem_bytes = nonzero(value),
            LimitName::Fsize => self.fsize = FileSizeLimit::from_raw(value),
        }
    }

    pub fn with_limit(mut self, name: LimitName, value: u64) -> Self {
        self.set_limit(name, value);
        self
    }

    /// Raw numeric form of a limit, as `set_limit` accepts it.
    pub fn get_limit(&self, name: LimitName) -> u64 {
        match name {
            LimitName::Cpu => self.cpu_seconds.unwrap_or(0),
            LimitName::Realtime => self.realtime.map(|d| d.as_secs()).unwrap_or(0),
            LimitName::Vmem => self.vmem_bytes.unwrap_or(0),
            LimitName::Fsize => self.fsize.as_rlimit(),
        }
    }
}

/// How an abstract command is launched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Executable on the host
    pub executable: PathBuf,
    /// OS user to run as via sudo
    pub user: Option<String>,
    /// Leading argv: the executable plus fixed interpreter flags
    pub cmdline_start: Vec<OsString>,
}

impl CommandConfig {
    pub fn new(command: &str, executable: impl Into<PathBuf>, user: Option<String>) -> Self {
        let executable = executable.into();
        let mut cmdline_start = vec![executable.clone().into_os_string()];
        if command == PYTHON {
            // -E: ignore PYTHON* environment variables, -B: no .pyc writes
            cmdline_start.push("-E".into());
            cmdline_start.push("-B".into());
        }
        Self {
            executable,
            user,
            cmdline_start,
        }
    }
}

/// Immutable jail configuration, built once at startup and shared by reference.
#[derive(Clone, Debug)]
pub struct SandboxConfig {
    commands: HashMap<String, CommandConfig>,
    /// Limits used when a request carries none of its own
    pub limits: ResourceLimits,
    /// Directory under which per-call sandbox directories are created
    pub sandbox_root: PathBuf,
    /// Force safe_exec onto the unjailed debugging path
    pub always_unsafe: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            commands: HashMap::new(),
            limits: ResourceLimits::default(),
            sandbox_root: std::env::temp_dir(),
            always_unsafe: false,
        }
    }
}

impl SandboxConfig {
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    pub fn is_configured(&self, command: &str) -> bool {
        self.commands.contains_key(command)
    }

    pub fn command(&self, command: &str) -> Option<&CommandConfig> {
        self.commands.get(command)
    }

    /// Configured command names, sorted.
    pub fn command_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Builder for [`SandboxConfig`]; the only place commands and limits change.
#[derive(Debug, Default)]
pub struct SandboxConfigBuilder {
    config: SandboxConfig,
}

impl SandboxConfigBuilder {
    /// Register an abstract command.
    pub fn configure(
        mut self,
        command: &str,
        executable: impl Into<PathBuf>,
        user: Option<&str>,
    ) -> Self {
        let entry = CommandConfig::new(command, executable, user.map(str::to_string));
        self.config.commands.insert(command.to_string(), entry);
        self
    }

    pub fn set_limit(mut self, name: LimitName, value: u64) -> Self {
        self.config.limits.set_limit(name, value);
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.config.limits = limits;
        self
    }

    pub fn sandbox_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.sandbox_root = root.into();
        self
    }

    pub fn always_unsafe(mut self, always_unsafe: bool) -> Self {
        self.config.always_unsafe = always_unsafe;
        self
    }

    pub fn build(self) -> SandboxConfig {
        self.config
    }
}

/// Inputs to one `jail_code` invocation.
#[derive(Clone, Debug, Default)]
pub struct JailRequest {
    pub command: String,
    pub code: Option<String>,
    pub files: Vec<PathBuf>,
    pub extra_files: Vec<(String, Vec<u8>)>,
    pub argv: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub slug: Option<String>,
    /// Overrides the configured limits for this call only
    pub limits: Option<ResourceLimits>,
}

impl JailRequest {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            ..Self::default()
        }
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.files.push(path.as_ref().to_path_buf());
        self
    }

    pub fn files<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.files
            .extend(paths.into_iter().map(|p| p.as_ref().to_path_buf()));
        self
    }

    pub fn extra_file(mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.extra_files.push((name.into(), content.into()));
        self
    }

    pub fn argv<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
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

    pub(crate) fn slug_or_default(&self) -> &str {
        self.slug.as_deref().unwrap_or("<unnamed>")
    }
}

/// Outcome of a jailed process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code, or the negated signal number when killed by a signal
    pub status: i32,
    /// The watchdog killed the process group
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Errors raised by the jail itself
#[derive(Error, Debug)]
pub enum JailError {
    #[error("Command {0:?} is not configured")]
    NotConfigured(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),
}

impl From<nix::errno::Errno> for JailError {
    fn from(err: nix::errno::Errno) -> Self {
        JailError::Process(err.to_string())
    }
}

/// Errors raised by safe_exec and its unsafe fallback.
///
/// Every failure variant carries the sandbox's stderr; structure beyond that
/// is inferred from the exit status and a couple of well-known stderr markers.
#[derive(Error, Debug)]
pub enum SafeExecError {
    #[error(transparent)]
    Jail(#[from] JailError),

    #[error("Couldn't execute jailed code (status {status}): {stderr}")]
    NonZeroExit { status: i32, stderr: String },

    #[error("Jailed code ran too long and was killed: {stderr}")]
    Timeout { stderr: String },

    #[error("Jailed code exceeded its CPU allowance: {stderr}")]
    CpuExceeded { stderr: String },

    #[error("Jailed code ran out of memory: {stderr}")]
    MemoryExceeded { stderr: String },

    #[error("Jailed code was denied a file write: {stderr}")]
    WriteDenied { stderr: String },

    #[error("Couldn't execute jailed code: {0}")]
    Opaque(String),

    #[error("Jailed code produced unreadable output: {0}")]
    Protocol(String),

    #[error("Global {key:?} cannot cross the jail boundary: {reason}")]
    UnsafeValue { key: String, reason: String },
}

impl SafeExecError {
    /// Classify a failed jail result produced under `limits`.
    ///
    /// RLIMIT_CPU is set with soft == hard, so the kernel delivers SIGKILL
    /// rather than SIGXCPU when it is reached. Without a watchdog kill the
    /// only sender of SIGKILL is that limit.
    pub fn from_failed_result(result: &ExecutionResult, limits: &ResourceLimits) -> Self {
        let stderr = result.stderr_lossy();
        let cpu_killed = result.status == -libc::SIGXCPU
            || (result.status == -libc::SIGKILL && limits.cpu_seconds.is_some());
        if result.timed_out {
            SafeExecError::Timeout { stderr }
        } else if cpu_killed {
            SafeExecError::CpuExceeded { stderr }
        } else if stderr.contains("File too large") {
            SafeExecError::WriteDenied { stderr }
        } else if stderr.contains("MemoryError") {
            SafeExecError::MemoryExceeded { stderr }
        } else {
            SafeExecError::NonZeroExit {
                status: result.status,
                stderr,
            }
        }
    }

    /// The sandbox's stderr (or normalized exception text) behind this failure.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            SafeExecError::NonZeroExit { stderr, .. }
            | SafeExecError::Timeout { stderr }
            | SafeExecError::CpuExceeded { stderr }
            | SafeExecError::MemoryExceeded { stderr }
            | SafeExecError::WriteDenied { stderr } => Some(stderr),
            SafeExecError::Opaque(message) => Some(message),
            _ => None,
        }
    }
}

/// Result type alias for jail operations
pub type Result<T> = std::result::Result<T, JailError>;
