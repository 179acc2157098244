//! Settings loading from a JSON document

use crate::config::types::{JailError, LimitName, Result, SandboxConfig, PYTHON};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One extra abstract command in the settings file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSettings {
    pub path: PathBuf,
    #[serde(default)]
    pub user: Option<String>,
}

/// Full settings structure
///
/// ```json
/// {
///   "python_bin": "/usr/bin/python3",
///   "user": "sandbox",
///   "limits": {"CPU": 1, "REALTIME": 1, "VMEM": 0, "FSIZE": 0}
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JailSettings {
    /// Interpreter registered as the "python" command
    #[serde(default)]
    pub python_bin: Option<PathBuf>,
    /// User the python command runs as
    #[serde(default)]
    pub user: Option<String>,
    /// Raw limit values keyed by limit name
    #[serde(default)]
    pub limits: BTreeMap<String, u64>,
    /// Additional abstract commands
    #[serde(default)]
    pub commands: BTreeMap<String, CommandSettings>,
    #[serde(default)]
    pub always_unsafe: bool,
    #[serde(default)]
    pub sandbox_root: Option<PathBuf>,
}

impl JailSettings {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| JailError::Config(format!("Invalid jail settings: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            JailError::Config(format!(
                "Failed to read jail settings {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&text)
    }

    /// Validate and turn the settings into an immutable config.
    pub fn into_config(self) -> Result<SandboxConfig> {
        let mut builder = SandboxConfig::builder().always_unsafe(self.always_unsafe);

        if let Some(python_bin) = self.python_bin {
            builder = builder.configure(PYTHON, python_bin, self.user.as_deref());
        } else if self.user.is_some() {
            log::warn!("Jail settings name a user but no python_bin; user is ignored");
        }

        for (name, command) in self.commands {
            if name == PYTHON {
                return Err(JailError::Config(
                    "Configure python through python_bin, not commands".to_string(),
                ));
            }
            builder = builder.configure(&name, command.path, command.user.as_deref());
        }

        for (name, value) in self.limits {
            let limit: LimitName = name.parse()?;
            builder = builder.set_limit(limit, value);
        }

        if let Some(root) = self.sandbox_root {
            if !root.is_dir() {
                return Err(JailError::Config(format!(
                    "Sandbox root {} is not a directory",
                    root.display()
                )));
            }
            builder = builder.sandbox_root(root);
        }

        Ok(builder.build())
    }
}

/// Read a settings file and build the config in one step.
pub fn load_config(path: &Path) -> Result<SandboxConfig> {
    JailSettings::load(path)?.into_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::FileSizeLimit;
    use std::time::Duration;

    #[test]
    fn full_settings_build_a_config() {
        let settings = JailSettings::from_json(
            r#"{
                "python_bin": "/usr/bin/python3",
                "user": "sandbox",
                "limits": {"CPU": 2, "REALTIME": 5, "VMEM": 100000000, "FSIZE": 0},
                "commands": {"node": {"path": "/usr/bin/node"}}
            }"#,
        )
        .unwrap();
        let config = settings.into_config().unwrap();

        let python = config.command(PYTHON).unwrap();
        assert_eq!(python.user.as_deref(), Some("sandbox"));
        assert!(config.is_configured("node"));
        assert_eq!(config.command("node").unwrap().user, None);
        assert_eq!(config.limits.cpu_seconds, Some(2));
        assert_eq!(config.limits.realtime, Some(Duration::from_secs(5)));
        assert_eq!(config.limits.vmem_bytes, Some(100_000_000));
        assert_eq!(config.limits.fsize, FileSizeLimit::WritesDenied);
        assert!(!config.always_unsafe);
    }

    #[test]
    fn empty_settings_leave_python_unconfigured() {
        let config = JailSettings::from_json("{}").unwrap().into_config().unwrap();
        assert!(!config.is_configured(PYTHON));
        assert_eq!(config.limits, crate::config::types::ResourceLimits::default());
    }

    #[test]
    fn unknown_limit_is_rejected() {
        let settings = JailSettings::from_json(r#"{"limits": {"WALL": 3}}"#).unwrap();
        assert!(matches!(
            settings.into_config(),
            Err(JailError::Config(msg)) if msg.contains("WALL")
        ));
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(JailSettings::from_json(r#"{"python": "/usr/bin/python3"}"#).is_err());
    }

    #[test]
    fn python_cannot_be_configured_twice() {
        let settings =
            JailSettings::from_json(r#"{"commands": {"python": {"path": "/usr/bin/python3"}}}"#)
                .unwrap();
        assert!(settings.into_config().is_err());
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jail.json");
        std::fs::write(&path, r#"{"python_bin": "/usr/bin/python3", "always_unsafe": true}"#)
            .unwrap();
        let config = load_config(&path).unwrap();
        assert!(config.is_configured(PYTHON));
        assert!(config.always_unsafe);

        assert!(load_config(&dir.path().join("missing.json")).is_err());
    }
}
