//! Process jail: run one command in a fresh sandbox directory under rlimits
//! and a wall-clock watchdog.

use crate::config::types::{
    CommandConfig, ExecutionResult, JailError, JailRequest, ResourceLimits, Result, SandboxConfig,
};
use crate::exec::preexec::run_chain;
use crate::exec::watchdog::Watchdog;
use crate::kernel::rlimits::RlimitPlan;
use crate::kernel::signal::GroupKiller;
use crate::observability::audit::events;
use crate::safety::workspace::{SandboxDir, CODE_FILE};
use crate::utils::output::{communicate, exit_status_code};
use log::debug;
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

const SUDO: &str = "sudo";

/// Runs jail requests against one immutable configuration.
#[derive(Clone, Debug)]
pub struct JailExecutor {
    config: SandboxConfig,
}

impl JailExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn is_configured(&self, command: &str) -> bool {
        self.config.is_configured(command)
    }

    /// Run `request` in the jail.
    ///
    /// Errors only for jail misconfiguration and host I/O during setup; a
    /// misbehaving child shows up in the returned status instead.
    pub fn jail_code(&self, request: &JailRequest) -> Result<ExecutionResult> {
        jail_code(&self.config, request)
    }
}

/// Run `request` in the jail described by `config`.
pub fn jail_code(config: &SandboxConfig, request: &JailRequest) -> Result<ExecutionResult> {
    let command = config
        .command(&request.command)
        .ok_or_else(|| JailError::NotConfigured(request.command.clone()))?;
    let limits = request.limits.unwrap_or(config.limits);
    let slug = request.slug_or_default();

    let mut sandbox =
        SandboxDir::create(&config.sandbox_root)?.with_sandbox_user(command.user.as_deref());
    let outcome = run_in_sandbox(&sandbox, command, &limits, request, slug);

    if let Err(e) = sandbox.cleanup() {
        events::cleanup_failure(slug, sandbox.path(), e.to_string());
    }
    outcome
}

fn run_in_sandbox(
    sandbox: &SandboxDir,
    command: &CommandConfig,
    limits: &ResourceLimits,
    request: &JailRequest,
    slug: &str,
) -> Result<ExecutionResult> {
    for file in &request.files {
        sandbox.copy_in(file)?;
    }

    let mut argv = request.argv.clone();
    if let Some(code) = &request.code {
        sandbox.write_code(code)?;
        argv.insert(0, CODE_FILE.to_string());
    }

    for (name, content) in &request.extra_files {
        sandbox.write_extra_file(name, content)?;
    }

    let cmdline = command_line(command, &argv);
    debug!("Jail command line for {}: {:?}", slug, cmdline);
    let mut cmd = build_command(&cmdline)?;
    cmd.current_dir(sandbox.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let plan = RlimitPlan::from(limits);
    // SAFETY: run_chain only calls setsid/setrlimit on values copied in.
    unsafe {
        cmd.pre_exec(move || run_chain(plan));
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| JailError::Process(format!("Failed to spawn {:?}: {}", cmdline[0], e)))?;
    let pid = child.id();
    events::jail_started(slug, sandbox.path(), pid);

    let killer = GroupKiller::for_user(command.user.as_deref());
    let watchdog = limits
        .realtime
        .map(|limit| Watchdog::arm(slug, pid, limit, killer));

    let communicated = communicate(&mut child, request.stdin.clone());
    let timed_out = watchdog.map(Watchdog::disarm).unwrap_or(false);
    let communicated = match communicated {
        Ok(c) => c,
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }
    };

    let status = exit_status_code(communicated.status);
    events::jail_finished(slug, pid, status, timed_out);
    Ok(ExecutionResult {
        stdout: communicated.stdout,
        stderr: communicated.stderr,
        status,
        timed_out,
    })
}

/// Full argv for the child: optional `sudo -u <user> TMPDIR=tmp`, then the
/// command's fixed prefix, then the request argv.
pub fn command_line(command: &CommandConfig, argv: &[String]) -> Vec<OsString> {
    let mut cmdline: Vec<OsString> = Vec::new();
    if let Some(user) = &command.user {
        cmdline.extend([SUDO.into(), "-u".into(), user.into(), "TMPDIR=tmp".into()]);
    }
    cmdline.extend(command.cmdline_start.iter().cloned());
    cmdline.extend(argv.iter().map(OsString::from));
    cmdline
}

fn build_command(cmdline: &[OsString]) -> Result<Command> {
    let (program, args) = cmdline
        .split_first()
        .ok_or_else(|| JailError::Config("Empty command line".to_string()))?;
    let mut cmd = Command::new(resolve_program(Path::new(program)));
    cmd.args(args).env_clear().env("TMPDIR", "tmp");
    Ok(cmd)
}

/// Bare names are looked up on the host PATH: the child's environment is empty.
fn resolve_program(program: &Path) -> PathBuf {
    if program.components().count() > 1 {
        return program.to_path_buf();
    }
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(program))
                .find(|candidate| candidate.is_file())
        })
        .unwrap_or_else(|| program.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{LimitName, PYTHON};
    use std::fs;

    fn sh_config(root: &Path) -> SandboxConfig {
        SandboxConfig::builder()
            .configure("sh", "/bin/sh", None)
            .set_limit(LimitName::Realtime, 5)
            .sandbox_root(root)
            .build()
    }

    fn leftover_entries(root: &Path) -> usize {
        fs::read_dir(root).unwrap().count()
    }

    #[test]
    fn command_line_for_python_with_user() {
        let command = CommandConfig::new(PYTHON, "/usr/bin/python3", Some("sandbox".to_string()));
        let cmdline = command_line(&command, &["jailed_code".to_string(), "a".to_string()]);
        let expected: Vec<OsString> = [
            "sudo",
            "-u",
            "sandbox",
            "TMPDIR=tmp",
            "/usr/bin/python3",
            "-E",
            "-B",
            "jailed_code",
            "a",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        assert_eq!(cmdline, expected);
    }

    #[test]
    fn command_line_without_user_starts_with_executable() {
        let command = CommandConfig::new("sh", "/bin/sh", None);
        let cmdline = command_line(&command, &["-c".to_string(), "true".to_string()]);
        assert_eq!(cmdline, vec![OsString::from("/bin/sh"), "-c".into(), "true".into()]);
    }

    #[test]
    fn resolves_bare_names_on_host_path() {
        assert!(resolve_program(Path::new("sh")).is_absolute());
        assert_eq!(resolve_program(Path::new("/bin/sh")), PathBuf::from("/bin/sh"));
    }

    #[test]
    fn unconfigured_command_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let config = sh_config(root.path());
        let err = jail_code(&config, &JailRequest::new("ruby")).unwrap_err();
        assert!(matches!(err, JailError::NotConfigured(ref c) if c == "ruby"));
        assert_eq!(leftover_entries(root.path()), 0);
    }

    #[test]
    fn runs_code_file_with_argv_stdin_and_clean_env() {
        let root = tempfile::tempdir().unwrap();
        let executor = JailExecutor::new(sh_config(root.path()));
        let request = JailRequest::new("sh")
            .code("read line; echo \"$1:$2:$line:$TMPDIR\"; pwd >&2; exit 4")
            .argv(["a", "b"])
            .stdin("input\n")
            .slug("sh-test");

        let result = executor.jail_code(&request).unwrap();
        assert_eq!(result.stdout_lossy(), "a:b:input:tmp\n");
        assert_eq!(result.status, 4);
        assert!(!result.timed_out);
        assert!(result.stderr_lossy().contains("codejail-"));
        assert_eq!(leftover_entries(root.path()), 0);
    }

    #[test]
    fn extra_files_and_copied_files_are_visible() {
        let root = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let data = src.path().join("data.txt");
        fs::write(&data, b"from host\n").unwrap();

        let config = sh_config(root.path());
        let request = JailRequest::new("sh")
            .code("read a < data.txt; read b < extra.txt; echo \"$a:$b\"")
            .file(&data)
            .extra_file("extra.txt", "extra\n");
        let result = jail_code(&config, &request).unwrap();
        assert!(result.success(), "stderr: {}", result.stderr_lossy());
        assert_eq!(result.stdout_lossy(), "from host:extra\n");
    }

    #[test]
    fn invalid_extra_file_name_is_config_error_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let config = sh_config(root.path());
        let request = JailRequest::new("sh").code("true").extra_file("../x", "nope");
        let err = jail_code(&config, &request).unwrap_err();
        assert!(matches!(err, JailError::Config(_)));
        assert_eq!(leftover_entries(root.path()), 0);
    }

    #[test]
    fn watchdog_kills_long_running_child() {
        let root = tempfile::tempdir().unwrap();
        let config = sh_config(root.path());
        let limits = ResourceLimits::default()
            .with_limit(LimitName::Cpu, 0)
            .with_limit(LimitName::Realtime, 1);
        // `exec` keeps sleep in the shell's place: no fork needed.
        let request = JailRequest::new("sh").code("exec sleep 10").limits(limits);

        let start = std::time::Instant::now();
        let result = jail_code(&config, &request).unwrap();
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
        assert!(result.timed_out);
        assert_eq!(result.status, -libc::SIGKILL);
    }

    #[test]
    fn writes_are_denied_by_default() {
        let root = tempfile::tempdir().unwrap();
        let config = sh_config(root.path());
        let request = JailRequest::new("sh").code("echo hi > tmp/out.txt");
        let result = jail_code(&config, &request).unwrap();
        assert!(!result.success());
    }
}
