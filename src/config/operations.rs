//! Config loading, validation, and utility operations.

use super::model::{CONFIG_FILE, Config};
use crate::distributed::GuardianSettings;
use crate::error::{GuardError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully loaded and validated config
    /// * `Err(GuardError::UserError)` - Read error, parse error or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            GuardError::UserError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Resolve the config for a CLI invocation.
    ///
    /// An explicit path must exist. Otherwise `jobguard.yaml` in `dir` is
    /// used when present, and the defaults when it is not.
    pub fn discover(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            debug!(path = %candidate.display(), "loading config");
            Self::load(candidate)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse config from a YAML string.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| GuardError::UserError(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            GuardError::UserError(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - timeouts and `lease_stale_minutes` must be positive
    /// - `namespace` must be non-empty and must not contain `/`
    /// - `hostname`, when set, must be non-empty
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("lock_timeout_secs", self.lock_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("lease_stale_minutes", u64::from(self.lease_stale_minutes)),
        ] {
            if value == 0 {
                return Err(GuardError::UserError(format!(
                    "config validation failed: {} must be greater than 0",
                    name
                )));
            }
        }

        if self.namespace.is_empty() || self.namespace.contains('/') {
            return Err(GuardError::UserError(format!(
                "config validation failed: namespace must be a single non-empty name (found '{}')",
                self.namespace
            )));
        }

        if self.hostname.as_deref().is_some_and(|h| h.trim().is_empty()) {
            return Err(GuardError::UserError(
                "config validation failed: hostname must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Store directory, relative paths resolved against `dir`.
    pub fn root_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.root)
    }

    /// How long to wait for a description lock.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// How long to keep trying to reach the coordination service.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Guardian settings for this config's namespace and host name.
    pub fn guardian_settings(&self) -> GuardianSettings {
        let settings = GuardianSettings::new(&self.namespace);
        match &self.hostname {
            Some(hostname) => settings.with_hostname(hostname),
            None => settings,
        }
    }
}
