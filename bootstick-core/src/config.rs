//! Tunables of the provisioning pipeline.
//!
//! Defaults match what has proven reliable with stock udev setups. All of them
//! can be overridden from a TOML file:
//!
//! ```toml
//! settle_interval_secs = 5
//! privilege_command = "sudo"
//! ```
use crate::error::{ProvisionError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Location checked when no explicit config file is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/bootstick/config.toml";

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionConfig {
    /// Pause after asking the kernel to re-read the partition table. The
    /// existence poll that follows is what actually guarantees the node is
    /// there; this only gives udev a head start.
    pub settle_interval_secs: u64,
    pub verify_attempts: u32,
    pub verify_interval_secs: u64,
    pub unmount_attempts: u32,
    pub unmount_backoff_ms: u64,
    /// Minimum spacing of progress updates during the copy.
    pub progress_interval_ms: u64,
    pub image_mount: PathBuf,
    pub target_mount: PathBuf,
    /// Program every command is run through, e.g. `sudo`.
    pub privilege_command: Option<String>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            settle_interval_secs: 3,
            verify_attempts: 5,
            verify_interval_secs: 1,
            unmount_attempts: 3,
            unmount_backoff_ms: 500,
            progress_interval_ms: 500,
            image_mount: PathBuf::from("/tmp/bootable_iso_mount"),
            target_mount: PathBuf::from("/tmp/bootable_usb_mount"),
            privilege_command: None,
        }
    }
}

impl ProvisionConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| ProvisionError::validation(format!("bad configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, or [`DEFAULT_CONFIG_PATH`] if it exists, or the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        tracing::debug!(path = %path.display(), "loading configuration");
        let text = fs::read_to_string(&path)?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.verify_attempts == 0 {
            return Err(ProvisionError::validation(
                "verify_attempts must be at least 1",
            ));
        }
        if self.unmount_attempts == 0 {
            return Err(ProvisionError::validation(
                "unmount_attempts must be at least 1",
            ));
        }
        if self.image_mount == self.target_mount {
            return Err(ProvisionError::validation(
                "image_mount and target_mount must be different directories",
            ));
        }
        Ok(())
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_secs(self.settle_interval_secs)
    }

    pub fn verify_interval(&self) -> Duration {
        Duration::from_secs(self.verify_interval_secs)
    }

    pub fn unmount_backoff(&self) -> Duration {
        Duration::from_millis(self.unmount_backoff_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(
            ProvisionConfig::from_toml("").unwrap(),
            ProvisionConfig::default()
        );
    }

    #[test]
    fn overrides_are_applied() {
        let config = ProvisionConfig::from_toml(
            r#"
            settle_interval_secs = 6
            privilege_command = "sudo"
            target_mount = "/run/bootstick/target"
            "#,
        )
        .unwrap();
        assert_eq!(config.settle_interval(), Duration::from_secs(6));
        assert_eq!(config.privilege_command.as_deref(), Some("sudo"));
        assert_eq!(config.target_mount, PathBuf::from("/run/bootstick/target"));
        assert_eq!(config.verify_attempts, 5);
    }

    #[test]
    fn unknown_keys_and_zero_budgets_are_rejected() {
        assert!(matches!(
            ProvisionConfig::from_toml("settle = 3"),
            Err(ProvisionError::Validation(_))
        ));
        assert!(matches!(
            ProvisionConfig::from_toml("verify_attempts = 0"),
            Err(ProvisionError::Validation(_))
        ));
    }
}
