//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use super::worker::resolve;
use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if `cache_version` or `origin` is empty.
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `origin` is not an absolute http(s) URL
    /// - a `precache` entry or `offline_url` is not an http(s) URL
    /// - `offline_url` does not resolve to a `precache` entry
    /// - a pass-through marker is empty
    /// - `max_bytes` is 0 or exceeds 50MB
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_version.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "cache_version".into(),
                hint: "Set WAYPOST_CACHE_VERSION environment variable".into(),
            });
        }

        if self.origin.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "origin".into(),
                hint: "Set WAYPOST_ORIGIN environment variable".into(),
            });
        }
        let origin = match url::Url::parse(&self.origin) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => u,
            Ok(u) => {
                return Err(ConfigError::Invalid {
                    field: "origin".into(),
                    reason: format!("unsupported scheme: {}", u.scheme()),
                });
            }
            Err(e) => return Err(ConfigError::Invalid { field: "origin".into(), reason: e.to_string() }),
        };

        // Compared after resolution, so "offline.html" matches "/offline.html".
        let offline_url = resolve(&origin, &self.offline_url, "offline_url")?;
        let precache = self
            .precache
            .iter()
            .map(|entry| resolve(&origin, entry, "precache"))
            .collect::<Result<Vec<_>, _>>()?;
        if !precache.contains(&offline_url) {
            return Err(ConfigError::Invalid {
                field: "offline_url".into(),
                reason: format!("{} must be listed in precache", self.offline_url),
            });
        }

        if self.passthrough_markers.iter().any(|m| m.is_empty()) {
            return Err(ConfigError::Invalid {
                field: "passthrough_markers".into(),
                reason: "markers must not be empty (an empty marker matches every URL)".into(),
            });
        }

        if self.max_bytes == 0 {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must be greater than 0".into() });
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must not exceed 50MB".into() });
        }

        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if self.passthrough_markers.is_empty() {
            tracing::warn!("passthrough_markers is empty; API and dev-tooling requests will be intercepted");
        }

        Ok(())
    }
}
