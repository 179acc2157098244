//! Thin wrappers around POSIX process primitives.

pub mod rlimits;
pub mod signal;
