//! Configuration management for Inkwatch
//!
//! This module provides the verifier configuration: timing defaults, log
//! behaviour, and the selectors that describe where chat messages live in the
//! observed document.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::Result;

/// Verification engine configuration
///
/// Loaded from `inkwatch.toml` (or any path the caller chooses).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Timeout applied when a caller does not pass one
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Polling cadence for snapshot and count polling
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay between attempts to find the observed container
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Mirror every log entry to `tracing`
    #[serde(default = "default_verbose")]
    pub verbose: bool,

    /// Characters of the expected fragment quoted in log messages
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,

    /// Characters of matched content kept in scan locations
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,

    /// Where messages live in the document
    #[serde(default)]
    pub selectors: SelectorConfig,
}

/// Selectors describing the chat transcript layout
///
/// `message`, `body` and `raw` are evaluated inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Message-list container the change feed subscribes to
    #[serde(default = "default_container")]
    pub container: String,

    /// One element per chat message
    #[serde(default = "default_message")]
    pub message: String,

    /// Rendered message body
    #[serde(default = "default_body")]
    pub body: String,

    /// Message elements carrying the raw-source attribute
    #[serde(default = "default_raw")]
    pub raw: String,

    /// Name of the raw-source attribute
    #[serde(default = "default_raw_attribute")]
    pub raw_attribute: String,
}

// Default value providers
fn default_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_verbose() -> bool {
    true
}

fn default_preview_chars() -> usize {
    50
}

fn default_excerpt_chars() -> usize {
    200
}

fn default_container() -> String {
    ".messages".to_string()
}

fn default_message() -> String {
    ".message".to_string()
}

fn default_body() -> String {
    ".message .message-body".to_string()
}

fn default_raw() -> String {
    ".message[data-raw]".to_string()
}

fn default_raw_attribute() -> String {
    "data-raw".to_string()
}

impl VerifierConfig {
    /// Load configuration from `path` or use defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content).map_err(|e| {
                crate::InkwatchError::Config(format!("Failed to parse config file: {}", e))
            })?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Write the default configuration to `path`
    pub fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, Self::default().to_toml()?)?;
        Ok(())
    }

    /// Render the configuration as pretty TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            crate::InkwatchError::Config(format!("Failed to serialize config: {}", e))
        })
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.default_timeout_ms == 0 {
            return Err(crate::InkwatchError::Config(
                "default_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(crate::InkwatchError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.selectors.raw_attribute.trim().is_empty() {
            return Err(crate::InkwatchError::Config(
                "selectors.raw_attribute must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Resolve a caller-supplied timeout; `None` or zero means the default
    pub fn timeout_or_default(&self, timeout: Option<Duration>) -> Duration {
        timeout
            .filter(|t| !t.is_zero())
            .unwrap_or_else(|| self.default_timeout())
    }

    /// Resolve a caller-supplied poll interval; `None` or zero means the default
    pub fn poll_or_default(&self, poll: Option<Duration>) -> Duration {
        poll.filter(|p| !p.is_zero())
            .unwrap_or_else(|| self.poll_interval())
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            verbose: default_verbose(),
            preview_chars: default_preview_chars(),
            excerpt_chars: default_excerpt_chars(),
            selectors: SelectorConfig::default(),
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            container: default_container(),
            message: default_message(),
            body: default_body(),
            raw: default_raw(),
            raw_attribute: default_raw_attribute(),
        }
    }
}
