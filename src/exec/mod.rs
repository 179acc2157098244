//! Execution control
//!
//! Orchestrates kernel primitives into a jailed run with type-state enforcement.

pub mod executor;
pub mod preexec;
pub mod watchdog;
