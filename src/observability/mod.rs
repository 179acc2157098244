//! Observability
//!
//! Structured jail events emitted through the `log` facade.

pub mod audit;
