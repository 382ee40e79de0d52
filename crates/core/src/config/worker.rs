//! Immutable per-version worker configuration.

use url::Url;

use super::{AppConfig, ConfigError};

/// Configuration of one deployed cache version.
///
/// Built once and shared behind an `Arc`; two managers with different
/// versions can run side by side against the same cache database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    version: String,
    origin: Url,
    precache: Vec<Url>,
    offline_url: Url,
    passthrough_markers: Vec<String>,
    skip_waiting_on_install: bool,
}

impl WorkerConfig {
    /// A config with an empty manifest whose fallback is `/offline.html`.
    ///
    /// The fallback is not precached until it is added with [`with_precache`](Self::with_precache).
    pub fn new(version: impl Into<String>, origin: Url) -> Result<Self, ConfigError> {
        let offline_url = resolve(&origin, "/offline.html", "offline_url")?;
        Ok(Self {
            version: version.into(),
            origin,
            precache: Vec::new(),
            offline_url,
            passthrough_markers: vec!["/api/".into(), "sockjs".into(), "hot-update".into()],
            skip_waiting_on_install: true,
        })
    }

    pub(crate) fn from_app_config(app: &AppConfig) -> Result<Self, ConfigError> {
        let origin = Url::parse(&app.origin)
            .map_err(|e| ConfigError::Invalid { field: "origin".into(), reason: e.to_string() })?;

        Ok(Self::new(app.cache_version.clone(), origin)?
            .with_precache(&app.precache)?
            .with_offline_url(&app.offline_url)?
            .with_passthrough_markers(app.passthrough_markers.clone())
            .with_skip_waiting_on_install(app.skip_waiting_on_install))
    }

    /// Replace the manifest. Entries are resolved against the origin; duplicates
    /// keep their first position.
    pub fn with_precache<S: AsRef<str>>(mut self, entries: &[S]) -> Result<Self, ConfigError> {
        let mut resolved: Vec<Url> = Vec::with_capacity(entries.len());
        for entry in entries {
            let url = resolve(&self.origin, entry.as_ref(), "precache")?;
            if !resolved.contains(&url) {
                resolved.push(url);
            }
        }
        self.precache = resolved;
        Ok(self)
    }

    pub fn with_offline_url(mut self, path: &str) -> Result<Self, ConfigError> {
        self.offline_url = resolve(&self.origin, path, "offline_url")?;
        Ok(self)
    }

    pub fn with_passthrough_markers(mut self, markers: Vec<String>) -> Self {
        self.passthrough_markers = markers;
        self
    }

    pub fn with_skip_waiting_on_install(mut self, skip: bool) -> Self {
        self.skip_waiting_on_install = skip;
        self
    }

    /// Generation identifier.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn precache(&self) -> &[Url] {
        &self.precache
    }

    pub fn offline_url(&self) -> &Url {
        &self.offline_url
    }

    pub fn passthrough_markers(&self) -> &[String] {
        &self.passthrough_markers
    }

    pub fn skip_waiting_on_install(&self) -> bool {
        self.skip_waiting_on_install
    }

    /// The first API or dev-tooling marker the URL carries, if any.
    pub fn passthrough_marker(&self, url: &Url) -> Option<&str> {
        let s = url.as_str();
        self.passthrough_markers
            .iter()
            .map(String::as_str)
            .find(|m| s.contains(m))
    }
}

pub(super) fn resolve(origin: &Url, entry: &str, field: &str) -> Result<Url, ConfigError> {
    let mut url = origin
        .join(entry.trim())
        .map_err(|e| ConfigError::Invalid { field: field.into(), reason: format!("{entry}: {e}") })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            field: field.into(),
            reason: format!("{entry}: unsupported scheme: {}", url.scheme()),
        });
    }
    url.set_fragment(None);
    Ok(url)
}
