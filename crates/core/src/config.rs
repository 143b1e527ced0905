//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. Environment values are handed in by the binaries; nothing here
//! reads the process environment during a request.

use crate::constants::DEFAULT_INTENT;
use crate::{FormError, FormResult};
use forms_types::IntentName;
use openmrs::FormIntent;
use std::path::{Path, PathBuf};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    registry_dir: PathBuf,
    forms_dir: PathBuf,
    default_intent: IntentName,
    strict_versions: bool,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    pub fn new(
        registry_dir: PathBuf,
        forms_dir: PathBuf,
        default_intent: String,
        strict_versions: bool,
    ) -> FormResult<Self> {
        let default_intent = IntentName::new(default_intent)
            .map_err(|e| FormError::InvalidInput(format!("default_intent: {e}")))?;

        Ok(Self {
            registry_dir,
            forms_dir,
            default_intent,
            strict_versions,
        })
    }

    pub fn registry_dir(&self) -> &Path {
        &self.registry_dir
    }

    pub fn forms_dir(&self) -> &Path {
        &self.forms_dir
    }

    pub fn default_intent(&self) -> &str {
        self.default_intent.as_str()
    }

    pub fn strict_versions(&self) -> bool {
        self.strict_versions
    }

    /// The requested session intent, or the configured default when none was given.
    pub fn session_intent(&self, requested: Option<&str>) -> FormResult<FormIntent> {
        match requested {
            Some(raw) => parse_intent(raw),
            None => Ok(FormIntent::from(self.default_intent())),
        }
    }
}

/// Validate a session intent given by a caller.
pub fn parse_intent(raw: &str) -> FormResult<FormIntent> {
    IntentName::new(raw)
        .map(|name| FormIntent::from(name.as_str()))
        .map_err(|e| FormError::InvalidInput(format!("intent: {e}")))
}

/// Resolve a form directory without reading environment variables.
///
/// If `override_dir` is provided it must be an existing directory. Otherwise `default_name` is
/// looked up relative to the current working directory and then walking up from
/// `CARGO_MANIFEST_DIR`.
pub fn resolve_dir(override_dir: Option<PathBuf>, default_name: &str) -> FormResult<PathBuf> {
    if let Some(dir) = override_dir {
        if dir.is_dir() {
            return Ok(dir);
        }
        return Err(FormError::InvalidInput(format!(
            "configured directory does not exist: {}",
            dir.display()
        )));
    }

    let cwd_relative = PathBuf::from(default_name);
    if cwd_relative.is_dir() {
        return Ok(cwd_relative);
    }

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    for ancestor in manifest_dir.ancestors() {
        let candidate = ancestor.join(default_name);
        if candidate.is_dir() {
            return Ok(candidate);
        }
    }

    Err(FormError::InvalidInput(format!(
        "could not locate {default_name}/ directory"
    )))
}

/// Parse the strict-version flag from an optional string value.
///
/// `None` or blank means non-strict.
pub fn strict_versions_from_env_value(value: Option<String>) -> FormResult<bool> {
    let Some(value) = value.map(|v| v.trim().to_ascii_lowercase()) else {
        return Ok(false);
    };

    match value.as_str() {
        "" | "0" | "false" | "no" => Ok(false),
        "1" | "true" | "yes" => Ok(true),
        other => Err(FormError::InvalidInput(format!(
            "invalid strict version flag: {other}"
        ))),
    }
}

/// Parse the default session intent from an optional string value.
///
/// `None` or blank falls back to the wildcard intent.
pub fn intent_from_env_value(value: Option<String>) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_INTENT.to_string())
}
