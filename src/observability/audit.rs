/// Structured jail events.
///
/// Every event is serialized to a single JSON line and emitted through the
/// `log` facade at a level derived from its severity, so whatever logger the
/// host installs (env_logger in the `codejail` binary) receives it.
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Log target for jail events, so they can be filtered with `RUST_LOG`.
pub const TARGET: &str = "codejail::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JailEventType {
    JailStart,
    JailFinish,
    WatchdogKill,
    UnsafeExecution,
    CleanupFailure,
}

impl JailEventType {
    pub fn default_severity(&self) -> Severity {
        match self {
            JailEventType::JailStart | JailEventType::JailFinish => Severity::Low,
            JailEventType::WatchdogKill | JailEventType::UnsafeExecution => Severity::Medium,
            JailEventType::CleanupFailure => Severity::High,
        }
    }
}

/// One jail event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JailEvent {
    pub event_type: JailEventType,
    pub severity: Severity,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
    pub slug: String,
    pub details: String,
    pub sandbox_dir: Option<String>,
    pub pid: Option<u32>,
    pub status: Option<i32>,
}

impl JailEvent {
    pub fn new(event_type: JailEventType, slug: &str, details: String) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            severity: event_type.default_severity(),
            event_type,
            timestamp,
            slug: slug.to_string(),
            details,
            sandbox_dir: None,
            pid: None,
            status: None,
        }
    }

    pub fn with_sandbox_dir(mut self, dir: &Path) -> Self {
        self.sandbox_dir = Some(dir.display().to_string());
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_status(mut self, status: i32) -> Self {
        self.status = Some(status);
        self
    }

    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!("{{\"event_type\":\"{:?}\",\"slug\":{:?}}}", self.event_type, self.slug)
        })
    }
}

/// Emit an event through `log`.
pub fn log_event(event: &JailEvent) {
    let line = event.to_json_line();
    match event.severity {
        Severity::Critical | Severity::High => error!(target: TARGET, "{}", line),
        Severity::Medium => warn!(target: TARGET, "{}", line),
        Severity::Low => info!(target: TARGET, "{}", line),
    }
}

/// Convenience constructors for the events the jail emits.
pub mod events {
    use super::*;

    pub fn jail_started(slug: &str, sandbox_dir: &Path, pid: u32) {
        let event = JailEvent::new(
            JailEventType::JailStart,
            slug,
            format!(
                "Executing jailed code {} in {}, with PID {}",
                slug,
                sandbox_dir.display(),
                pid
            ),
        )
        .with_sandbox_dir(sandbox_dir)
        .with_pid(pid);
        log_event(&event);
    }

    pub fn jail_finished(slug: &str, pid: u32, status: i32, timed_out: bool) {
        let event = JailEvent::new(
            JailEventType::JailFinish,
            slug,
            format!("Jailed code {} finished: status={} timed_out={}", slug, status, timed_out),
        )
        .with_pid(pid)
        .with_status(status);
        log_event(&event);
    }

    pub fn watchdog_kill(slug: &str, pgid: i32, limit_secs: f64) {
        let event = JailEvent::new(
            JailEventType::WatchdogKill,
            slug,
            format!(
                "Killing process group {} of {}: over the {}s wall-clock limit",
                pgid, slug, limit_secs
            ),
        )
        .with_pid(pgid as u32);
        log_event(&event);
    }

    pub fn unsafe_execution(slug: &str) {
        let event = JailEvent::new(
            JailEventType::UnsafeExecution,
            slug,
            format!("Executing code unsafely: {}", slug),
        );
        log_event(&event);
    }

    pub fn cleanup_failure(slug: &str, sandbox_dir: &Path, error: String) {
        let event = JailEvent::new(
            JailEventType::CleanupFailure,
            slug,
            format!("Failed to remove {}: {}", sandbox_dir.display(), error),
        )
        .with_sandbox_dir(sandbox_dir);
        log_event(&event);
    }
}
