#![forbid(unsafe_code)]

//! History options.
//!
//! [`HistoryOptions`] is fixed when an engine is built. With the
//! `config-files` feature it can also be loaded from TOML or JSON at startup:
//!
//! ```toml
//! # branchlog.toml
//! use_branching_history = true
//! max_history_length = 200
//! default_switch_policy = "last_known_position_on_branch"
//! ```
//!
//! ```rust,ignore
//! let options = HistoryOptions::from_toml_file("branchlog.toml")?;
//! let options = HistoryOptions::from_json_str(json)?;
//! ```
//!
//! Missing keys keep their defaults.

use std::num::NonZeroUsize;
#[cfg(feature = "config-files")]
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::travel::BranchSwitchPolicy;

/// Behavior switches for a history engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryOptions {
    /// Keep the discarded future on a side branch instead of dropping it
    /// when a new entry is recorded in the past.
    pub use_branching_history: bool,
    /// Maximum entries on the current branch; `None` is unbounded.
    pub max_history_length: Option<NonZeroUsize>,
    /// Policy used when a branch switch does not name one.
    pub default_switch_policy: BranchSwitchPolicy,
}

impl HistoryOptions {
    /// Linear, unbounded history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable branching history.
    #[must_use]
    pub fn with_branching(mut self, enabled: bool) -> Self {
        self.use_branching_history = enabled;
        self
    }

    /// Cap the current branch length.
    #[must_use]
    pub fn with_max_length(mut self, max: Option<NonZeroUsize>) -> Self {
        self.max_history_length = max;
        self
    }

    /// Set the policy used by switches that do not name one.
    #[must_use]
    pub fn with_default_switch_policy(mut self, policy: BranchSwitchPolicy) -> Self {
        self.default_switch_policy = policy;
        self
    }

    /// Whether entries are ever evicted.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.max_history_length.is_some()
    }

    /// Load from a TOML string.
    #[cfg(feature = "config-files")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "config-files")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "config-files")]
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    /// Load from a JSON file on disk.
    #[cfg(feature = "config-files")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&content)
    }
}

/// Errors from loading [`HistoryOptions`].
#[cfg(feature = "config-files")]
#[derive(Debug)]
pub enum ConfigError {
    /// File I/O error.
    Io(std::io::Error),
    /// TOML parse error.
    Toml(toml::de::Error),
    /// JSON parse error.
    Json(serde_json::Error),
}

#[cfg(feature = "config-files")]
impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Toml(e) => write!(f, "TOML parse error: {e}"),
            Self::Json(e) => write!(f, "JSON parse error: {e}"),
        }
    }
}

#[cfg(feature = "config-files")]
impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Toml(e) => Some(e),
            Self::Json(e) => Some(e),
        }
    }
}
