//! Utilities
//!
//! Child stdio plumbing.

pub mod output;
