//! Converter configuration
//!
//! Settings come from three places, in increasing precedence: built-in
//! defaults, an optional TOML file, and `OFFICE_CONVERT_*` environment
//! variables.

use crate::error::{ConvertError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default converter binary
pub const DEFAULT_BINARY: &str = "libreoffice";

/// Default conversion timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Settings shared by every conversion a handler runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Converter executable, looked up on `PATH` unless it contains a separator
    pub binary: String,

    /// Directory the converter writes into (None = next to the source file)
    pub working_dir: Option<PathBuf>,

    /// Seconds to wait before killing the converter
    pub timeout_secs: u64,

    /// Point `HOME` at the temp directory when the real one is not writable
    pub home_override: bool,

    /// Run each conversion with a fresh, randomly named profile directory
    pub isolate_profile: bool,

    /// Parent directory for isolated profiles (None = system temp dir)
    pub profile_root: Option<PathBuf>,

    /// Fail instead of returning the converter's default-named file when
    /// the final rename does not succeed
    pub strict_rename: bool,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            working_dir: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            home_override: true,
            isolate_profile: true,
            profile_root: None,
            strict_rename: false,
        }
    }
}

impl ConverterConfig {
    /// Defaults overlaid with environment variables
    ///
    /// Environment variables:
    /// - `OFFICE_CONVERT_BIN`: converter binary (default: "libreoffice")
    /// - `OFFICE_CONVERT_WORKDIR`: output directory
    /// - `OFFICE_CONVERT_TIMEOUT_SECS`: timeout, must be positive (default: 120)
    /// - `OFFICE_CONVERT_HOME_OVERRIDE`: "true"/"false" (default: true)
    /// - `OFFICE_CONVERT_ISOLATE_PROFILE`: "true"/"false" (default: true)
    /// - `OFFICE_CONVERT_PROFILE_ROOT`: parent directory for isolated profiles
    /// - `OFFICE_CONVERT_STRICT_RENAME`: "true"/"false" (default: false)
    #[must_use = "creates config from environment variables"]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `OFFICE_CONVERT_*` variables on top of `self`.
    /// Unparseable values are ignored.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides read through `lookup`, which maps an
    /// `OFFICE_CONVERT_*` name to its value
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<bool>().ok());

        if let Some(bin) = text("OFFICE_CONVERT_BIN") {
            self.binary = bin;
        }
        if let Some(dir) = text("OFFICE_CONVERT_WORKDIR") {
            self.working_dir = Some(PathBuf::from(dir));
        }
        match lookup("OFFICE_CONVERT_TIMEOUT_SECS").and_then(|v| v.trim().parse::<u64>().ok()) {
            Some(0) => warn!("Ignoring OFFICE_CONVERT_TIMEOUT_SECS=0"),
            Some(secs) => self.timeout_secs = secs,
            None => {}
        }
        if let Some(flag) = parsed("OFFICE_CONVERT_HOME_OVERRIDE") {
            self.home_override = flag;
        }
        if let Some(flag) = parsed("OFFICE_CONVERT_ISOLATE_PROFILE") {
            self.isolate_profile = flag;
        }
        if let Some(dir) = text("OFFICE_CONVERT_PROFILE_ROOT") {
            self.profile_root = Some(PathBuf::from(dir));
        }
        if let Some(flag) = parsed("OFFICE_CONVERT_STRICT_RENAME") {
            self.strict_rename = flag;
        }
        self
    }

    /// Reject settings no conversion could run with
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(ConvertError::Config(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.binary.trim().is_empty() {
            return Err(ConvertError::Config("binary must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Sub-second remainders round up to the next whole second.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout.as_secs();
        self.timeout_secs = if timeout.subsec_nanos() > 0 { secs + 1 } else { secs };
        self
    }

    #[must_use]
    pub fn with_home_override(mut self, enabled: bool) -> Self {
        self.home_override = enabled;
        self
    }

    #[must_use]
    pub fn with_profile_isolation(mut self, enabled: bool) -> Self {
        self.isolate_profile = enabled;
        self
    }

    #[must_use]
    pub fn with_profile_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.profile_root = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_strict_rename(mut self, strict: bool) -> Self {
        self.strict_rename = strict;
        self
    }
}

/// `<config dir>/office-convert/config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "office-convert")
        .ok_or_else(|| ConvertError::Config("Could not determine config directory".to_string()))?;
    Ok(dirs.config_dir().join("config.toml"))
}

/// Load a TOML config file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<ConverterConfig> {
    if !path.exists() {
        return Ok(ConverterConfig::default());
    }

    let contents = std::fs::read_to_string(path).map_err(|e| {
        ConvertError::Config(format!("Failed to read config file {}: {e}", path.display()))
    })?;
    parse_config(&contents)
}

/// Parse TOML text into a validated config
pub fn parse_config(contents: &str) -> Result<ConverterConfig> {
    let config: ConverterConfig = toml::from_str(contents)
        .map_err(|e| ConvertError::Config(format!("Failed to parse config file as TOML: {e}")))?;
    config.validate()?;
    Ok(config)
}
