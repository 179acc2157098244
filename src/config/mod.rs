//! Configuration
//!
//! Command registry, resource limits and settings loading.

pub mod loader;
pub mod types;
