//! Integration tests for the process jail
//!
//! These run a real python3 under the jail's rlimits and watchdog. Tests
//! that need a distinct sandbox account run only when CODEJAIL_TEST_USER
//! names one (with passwordless sudo to it).

#[macro_use]
mod common;

use codejail::{jail_code, JailError, JailExecutor, JailRequest, LimitName, ResourceLimits, PYTHON};
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::time::Instant;

fn limits() -> ResourceLimits {
    // Generous CPU so slow hosts do not trip it; tests override what they check.
    ResourceLimits::default()
        .with_limit(LimitName::Cpu, 5)
        .with_limit(LimitName::Realtime, 10)
}

#[test]
fn test_argv_reaches_the_code() {
    let python = require_python!();
    let root = tempfile::tempdir().unwrap();
    let config = common::python_builder(&python, root.path()).build();

    let request = JailRequest::new(PYTHON)
        .code("import sys; print(':'.join(sys.argv[1:]))")
        .argv(["a", "b"])
        .limits(limits());
    let result = jail_code(&config, &request).unwrap();
    assert!(result.success(), "stderr: {}", result.stderr_lossy());
    assert_eq!(result.stdout, b"a:b\n");
}

#[test]
fn test_stdin_reaches_the_code() {
    let python = require_python!();
    let root = tempfile::tempdir().unwrap();
    let config = common::python_builder(&python, root.path()).build();

    let request = JailRequest::new(PYTHON)
        .code("import sys; print(sum(int(x) for x in sys.stdin.read().split()))")
        .stdin("1 2 3")
        .limits(limits());
    let result = jail_code(&config, &request).unwrap();
    assert_eq!(result.stdout_lossy(), "6\n");
    assert_eq!(result.status, 0);
}

#[test]
fn test_failure_is_reported_not_raised() {
    let python = require_python!();
    let root = tempfile::tempdir().unwrap();
    let executor = JailExecutor::new(common::python_builder(&python, root.path()).build());

    let request = JailRequest::new(PYTHON)
        .code("import sys\nsys.stderr.write('bad things')\nsys.exit(3)")
        .limits(limits());
    let result = executor.jail_code(&request).unwrap();
    assert_eq!(result.status, 3);
    assert_eq!(result.stderr_lossy(), "bad things");
    assert!(!result.timed_out);
}

#[test]
fn test_unconfigured_command_is_a_configuration_error() {
    let root = tempfile::tempdir().unwrap();
    let config = codejail::SandboxConfig::builder().sandbox_root(root.path()).build();
    let err = jail_code(&config, &JailRequest::new(PYTHON).code("print(1)")).unwrap_err();
    assert!(matches!(err, JailError::NotConfigured(_)));
}

#[test]
fn test_environment_is_empty_but_tmpdir() {
    let python = require_python!();
    let root = tempfile::tempdir().unwrap();
    let config = common::python_builder(&python, root.path()).build();

    let request = JailRequest::new(PYTHON)
        .code("import os; print(os.environ.get('TMPDIR')); print('HOME' in os.environ)")
        .limits(limits());
    let result = jail_code(&config, &request).unwrap();
    let stdout = result.stdout_lossy();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "tmp");
    // sudo may set HOME for the target user; without sudo nothing is inherited.
    if common::test_user().is_none() {
        assert_eq!(lines[1], "False");
    }
}

#[test]
fn test_memory_limit_blocks_large_allocation() {
    let python = require_python!();
    let root = tempfile::tempdir().unwrap();
    let config = common::python_builder(&python, root.path()).build();
    let code = "x = bytearray(1000 * 1000 * 1000)\nprint(len(x))";

    let bounded = limits().with_limit(LimitName::Vmem, 300 * 1000 * 1000);
    let result = jail_code(&config, &JailRequest::new(PYTHON).code(code).limits(bounded)).unwrap();
    assert!(!result.success());
    assert!(result.stderr_lossy().contains("MemoryError"), "stderr: {}", result.stderr_lossy());

    let small = "x = bytearray(50 * 1000 * 1000)\nprint(len(x))";
    let unbounded = limits().with_limit(LimitName::Vmem, 0);
    let request = JailRequest::new(PYTHON).code(small).limits(unbounded);
    let result = jail_code(&config, &request).unwrap();
    assert!(result.success(), "stderr: {}", result.stderr_lossy());
    assert_eq!(result.stdout_lossy(), "50000000\n");
}

#[test]
fn test_wall_clock_limit_kills_sleeper() {
    let python = require_python!();
    let root = tempfile::tempdir().unwrap();
    let config = common::python_builder(&python, root.path()).build();
    let code = "import time\ntime.sleep(1.5)\nprint('woke')";

    let tight = limits().with_limit(LimitName::Realtime, 1);
    let start = Instant::now();
    let result = jail_code(&config, &JailRequest::new(PYTHON).code(code).limits(tight)).unwrap();
    let elapsed = start.elapsed();
    assert!(result.timed_out);
    assert_ne!(result.status, 0);
    assert!(result.stdout.is_empty());
    assert!(elapsed.as_secs_f64() < 1.5, "took {:?}", elapsed);

    let loose = limits().with_limit(LimitName::Realtime, 2);
    let result = jail_code(&config, &JailRequest::new(PYTHON).code(code).limits(loose)).unwrap();
    assert!(!result.timed_out);
    assert_eq!(result.stdout_lossy(), "woke\n");
}

#[test]
fn test_cpu_limit_stops_busy_loop() {
    let python = require_python!();
    let root = tempfile::tempdir().unwrap();
    let config = common::python_builder(&python, root.path()).build();

    let cpu = limits().with_limit(LimitName::Cpu, 1);
    let request = JailRequest::new(PYTHON).code("while True:\n    pass").limits(cpu);
    let result = jail_code(&config, &request).unwrap();
    assert!(!result.success());
    assert!(!result.timed_out);
    // soft == hard, so the kernel kills with SIGKILL rather than SIGXCPU.
    assert_eq!(result.status, -libc::SIGKILL);
}

#[test]
fn test_file_size_limit() {
    let python = require_python!();
    let root = tempfile::tempdir().unwrap();
    let config = common::python_builder(&python, root.path()).build();
    let write = |n: usize| {
        format!(
            "with open('tmp/out.txt', 'w') as f:\n    f.write('x' * {})\nprint('written')",
            n
        )
    };

    // Default FSIZE is 0: no writes at all.
    let request = JailRequest::new(PYTHON).code(write(10)).limits(limits());
    let result = jail_code(&config, &request).unwrap();
    assert!(!result.success());
    assert!(result.stderr_lossy().contains("File too large"), "stderr: {}", result.stderr_lossy());

    let bounded = limits().with_limit(LimitName::Fsize, 100);
    let request = JailRequest::new(PYTHON).code(write(10)).limits(bounded);
    let result = jail_code(&config, &request).unwrap();
    assert!(result.success(), "stderr: {}", result.stderr_lossy());
    assert_eq!(result.stdout_lossy(), "written\n");

    let request = JailRequest::new(PYTHON).code(write(200)).limits(bounded);
    let result = jail_code(&config, &request).unwrap();
    assert!(!result.success());
}

#[test]
fn test_cannot_fork() {
    let python = require_python!();
    if nix::unistd::geteuid().is_root() && common::test_user().is_none() {
        eprintln!("RLIMIT_NPROC does not bind root; set CODEJAIL_TEST_USER to run");
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let config = common::python_builder(&python, root.path()).build();

    let request = JailRequest::new(PYTHON)
        .code("import os\npid = os.fork()\nprint('forked' if pid else 'child')")
        .limits(limits());
    let result = jail_code(&config, &request).unwrap();
    assert!(!result.success());
    assert!(!result.stdout_lossy().contains("forked"));
}

#[test]
fn test_copied_directory_keeps_files_and_symlinks() {
    let python = require_python!();
    let host = tempfile::tempdir().unwrap();
    let pkg = host.path().join("pkg");
    fs::create_dir(&pkg).unwrap();
    fs::write(pkg.join("data.txt"), "payload\n").unwrap();
    fs::write(host.path().join("secret.txt"), "secret\n").unwrap();
    symlink(host.path().join("secret.txt"), pkg.join("link")).unwrap();

    let root = tempfile::tempdir().unwrap();
    let config = common::python_builder(&python, root.path()).build();
    let request = JailRequest::new(PYTHON)
        .code(
            "import os\n\
             print(open('pkg/data.txt').read().strip())\n\
             print(os.path.islink('pkg/link'))",
        )
        .file(&pkg)
        .extra_file("extra.txt", "unused")
        .limits(limits());
    let result = jail_code(&config, &request).unwrap();
    assert!(result.success(), "stderr: {}", result.stderr_lossy());
    assert_eq!(result.stdout_lossy(), "payload\nTrue\n");
}

#[test]
fn test_cannot_read_files_not_passed_in() {
    let python = require_python!();
    if common::test_user().is_none() {
        eprintln!("CODEJAIL_TEST_USER not set; skipping");
        return;
    }
    let host = tempfile::tempdir().unwrap();
    let secret = host.path().join("secret.txt");
    fs::write(&secret, "secret\n").unwrap();

    let root = tempfile::tempdir().unwrap();
    let config = common::python_builder(&python, root.path()).build();
    let code = format!("print(open({:?}).read())", secret.display().to_string());
    let result = jail_code(&config, &JailRequest::new(PYTHON).code(code).limits(limits())).unwrap();
    assert!(!result.success());
    assert!(!result.stdout_lossy().contains("secret"));
}

#[test]
fn test_copied_symlink_does_not_reach_host_file() {
    let python = require_python!();
    if common::test_user().is_none() {
        eprintln!("CODEJAIL_TEST_USER not set; skipping");
        return;
    }
    // tempdir is 0700, so the sandbox user cannot traverse into it.
    let host = tempfile::tempdir().unwrap();
    let pkg = host.path().join("pkg");
    fs::create_dir(&pkg).unwrap();
    fs::set_permissions(&pkg, fs::Permissions::from_mode(0o755)).unwrap();
    fs::write(host.path().join("secret.txt"), "secret\n").unwrap();
    symlink(host.path().join("secret.txt"), pkg.join("link")).unwrap();

    let root = tempfile::tempdir().unwrap();
    let config = common::python_builder(&python, root.path()).build();
    let request = JailRequest::new(PYTHON)
        .code("print(open('pkg/link').read())")
        .file(&pkg)
        .limits(limits());
    let result = jail_code(&config, &request).unwrap();
    assert!(!result.success());
    assert!(!result.stdout_lossy().contains("secret"));
    assert!(
        result.stderr_lossy().contains("PermissionError"),
        "stderr: {}",
        result.stderr_lossy()
    );
}

#[test]
fn test_sandbox_directory_removed_on_every_path() {
    let python = require_python!();
    let root = tempfile::tempdir().unwrap();
    let config = common::python_builder(&python, root.path()).build();

    jail_code(&config, &JailRequest::new(PYTHON).code("print(1)").limits(limits())).unwrap();
    assert_eq!(common::entries_in(root.path()), 0);

    let killed = limits().with_limit(LimitName::Realtime, 1);
    jail_code(&config, &JailRequest::new(PYTHON).code("import time; time.sleep(5)").limits(killed))
        .unwrap();
    assert_eq!(common::entries_in(root.path()), 0);

    let bad_name = JailRequest::new(PYTHON).code("print(1)").extra_file("a/b", "x");
    assert!(jail_code(&config, &bad_name).is_err());
    assert_eq!(common::entries_in(root.path()), 0);

    let missing = JailRequest::new(PYTHON).code("print(1)").file(root.path().join("nope"));
    assert!(jail_code(&config, &missing).is_err());
    assert_eq!(common::entries_in(root.path()), 0);
}
