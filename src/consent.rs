use crate::config::CrashHandlerConfig;
use std::path::PathBuf;

/// Source of the user's permission to send crash data off the machine.
pub trait Consent {
    fn consent_allowed(&self) -> bool;
}

/// Fixed answer, for callers that already know.
impl Consent for bool {
    fn consent_allowed(&self) -> bool {
        *self
    }
}

/// Reads consent from the config file each time it is asked.
///
/// A missing, unreadable or malformed config counts as "no consent".
#[derive(Debug, Clone)]
pub struct ConsentGate {
    path: PathBuf,
}

impl ConsentGate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Consent for ConsentGate {
    fn consent_allowed(&self) -> bool {
        match CrashHandlerConfig::load(&self.path) {
            Ok(cfg) => cfg.crash_reports.enabled,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "no valid configuration found, assuming crash reports are off"
                );
                false
            }
        }
    }
}
