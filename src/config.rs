use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default location of the crash-handler config, relative to the cwd.
pub const CONFIG_FILE: &str = "crash_handler.toml";

/// Top-level configuration loaded from crash_handler.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct CrashHandlerConfig {
    pub crash_reports: CrashReportConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CrashReportConfig {
    /// The user consented to crash reports being sent.
    pub enabled: bool,
    /// Webhook endpoint that receives the crash report.
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for CrashReportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

/// Errors that can occur while loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "cannot parse {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl CrashHandlerConfig {
    /// Load and parse the config, failing on a missing or malformed file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load the config, falling back to defaults on any error.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::debug!(error = %e, "using default crash-handler config");
                Self::default()
            }
        }
    }
}
