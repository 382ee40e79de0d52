//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (WAYPOST_*)
//! 2. TOML config file (if WAYPOST_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! [`AppConfig`] is the loaded, mutable-by-layers view. A manager never reads
//! it directly: it receives an immutable [`WorkerConfig`] built from it, one per
//! deployed cache version.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;
mod worker;

pub use validation::ConfigError;
pub use worker::WorkerConfig;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (WAYPOST_*)
/// 2. TOML config file (if WAYPOST_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to SQLite cache database.
    ///
    /// Set via WAYPOST_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Origin the manager serves, e.g. `http://localhost:5000`.
    ///
    /// Set via WAYPOST_ORIGIN environment variable.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Cache generation identifier. Bump it to discard every cached entry.
    ///
    /// Set via WAYPOST_CACHE_VERSION environment variable.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Offline fallback document, relative to the origin.
    ///
    /// Set via WAYPOST_OFFLINE_URL environment variable.
    #[serde(default = "default_offline_url")]
    pub offline_url: String,

    /// Resources stored before the manager becomes active.
    ///
    /// Origin-relative paths or absolute URLs. Set via WAYPOST_PRECACHE
    /// (e.g. `WAYPOST_PRECACHE='["/", "/offline.html"]'`).
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,

    /// URL substrings that are never intercepted.
    ///
    /// Set via WAYPOST_PASSTHROUGH_MARKERS environment variable.
    #[serde(default = "default_passthrough_markers")]
    pub passthrough_markers: Vec<String>,

    /// Activate right after a successful install instead of waiting.
    ///
    /// Set via WAYPOST_SKIP_WAITING_ON_INSTALL environment variable.
    #[serde(default = "default_true")]
    pub skip_waiting_on_install: bool,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via WAYPOST_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum bytes to fetch per request.
    ///
    /// Set via WAYPOST_MAX_BYTES environment variable.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via WAYPOST_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./waypost-cache.sqlite")
}

fn default_origin() -> String {
    "http://localhost:5000".into()
}

fn default_cache_version() -> String {
    "punk-eco-v1".into()
}

fn default_offline_url() -> String {
    "/offline.html".into()
}

fn default_precache() -> Vec<String> {
    [
        "/",
        "/static/css/base.css",
        "/static/css/header.css",
        "/static/css/footer.css",
        "/static/css/custom.css",
        "/static/js/main.js",
        "/static/img/logo.png",
        "/static/img/favicon.ico",
        "https://fonts.googleapis.com/css2?family=Fira+Code:wght@300;400;500;700&family=Inter:wght@300;400;500;600;700&display=swap",
        "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css",
        "/offline.html",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_passthrough_markers() -> Vec<String> {
    vec!["/api/".into(), "sockjs".into(), "hot-update".into()]
}

fn default_user_agent() -> String {
    "waypost/0.1".into()
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            origin: default_origin(),
            cache_version: default_cache_version(),
            offline_url: default_offline_url(),
            precache: default_precache(),
            passthrough_markers: default_passthrough_markers(),
            skip_waiting_on_install: true,
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `WAYPOST_`
    /// 2. TOML file from `WAYPOST_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = Self::figment()
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("WAYPOST_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment.merge(
            Env::prefixed("WAYPOST_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        )
    }

    /// Build the immutable per-version configuration handed to a manager.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the origin or any manifest entry
    /// cannot be resolved to an absolute URL.
    pub fn worker_config(&self) -> Result<WorkerConfig, ConfigError> {
        WorkerConfig::from_app_config(self)
    }
}
