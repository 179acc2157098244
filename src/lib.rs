//! codejail: run untrusted code in a resource-limited subprocess
//!
//! # Architecture
//!
//! Two layers, leaf first:
//!
//! ## Process Jail ([`exec`])
//! - [`exec::executor`]: `jail_code`, one sandbox directory and one child per call
//! - [`exec::preexec`]: Type-state enforced pre-exec ordering (setsid, rlimits)
//! - [`exec::watchdog`]: Wall-clock limit that kills the child's process group
//!
//! ## Safe Exec ([`safe_exec`])
//! - [`safe_exec::executor`]: `safe_exec`, `not_safe_exec` and mode selection
//! - [`safe_exec::json_safe`]: The JSON-safe projection of a globals dictionary
//! - [`safe_exec::value`]: Host-side Python values
//! - [`safe_exec::wrapper`]: Python programs that run the caller's code
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::rlimits`]: RLIMIT_NPROC/CPU/AS/FSIZE
//! - [`kernel::signal`]: Process-group kill, directly or through sudo
//!
//! ## Safety & Cleanup ([`safety`])
//! - [`safety::workspace`]: Per-call sandbox directory
//! - [`safety::safe_cleanup`]: Symlink-safe tree removal
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Commands, limits, requests, results and errors
//! - [`config::loader`]: JSON settings file
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured jail events
//!
//! ## Utilities ([`utils`])
//! - [`utils::output`]: stdin/stdout/stderr pumping
//!
//! # Example
//!
//! ```no_run
//! use codejail::{jail_code, JailRequest, SandboxConfig};
//!
//! let config = SandboxConfig::builder()
//!     .configure("python", "/usr/bin/python3", None)
//!     .build();
//! let request = JailRequest::new("python")
//!     .code("import sys; print(':'.join(sys.argv[1:]))")
//!     .argv(["a", "b"]);
//! let result = jail_code(&config, &request)?;
//! assert_eq!(result.stdout, b"a:b\n");
//! # Ok::<(), codejail::JailError>(())
//! ```

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Safe exec protocol
pub mod safe_exec;

// Safety & Cleanup
pub mod safety;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// CLI entrypoint for the codejail binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::loader::load_config;
pub use config::types::*;
pub use exec::executor::{jail_code, JailExecutor};
pub use safe_exec::executor::{not_safe_exec, safe_exec, ExecMode, ExecOptions, SafeExecutor};
pub use safe_exec::json_safe::json_safe;
pub use safe_exec::value::{Globals, PyStr, PyValue};
