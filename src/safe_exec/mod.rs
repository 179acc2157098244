//! Safe exec
//!
//! Run a string of Python with a globals dictionary inside the jail, passing
//! globals in and out as JSON.
//!
//! ```no_run
//! use codejail::{safe_exec, ExecOptions, Globals, PyValue, SandboxConfig};
//!
//! let config = SandboxConfig::builder()
//!     .configure("python", "/usr/bin/python3", None)
//!     .build();
//! let mut globals = Globals::new();
//! safe_exec(&config, "x = 1 + 2", &mut globals, &ExecOptions::new())?;
//! assert_eq!(globals["x"], PyValue::Int(3));
//! # Ok::<(), codejail::SafeExecError>(())
//! ```

pub mod executor;
pub mod json_safe;
pub mod value;
pub mod wrapper;
