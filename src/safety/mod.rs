//! Safety and cleanup
//!
//! Sandbox directory lifecycle and symlink-safe removal.

pub mod safe_cleanup;
pub mod workspace;
