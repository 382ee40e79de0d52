//! The offline cache manager.
//!
//! One manager serves one cache version. It precaches the manifest on
//! install, prunes every other generation on activate, and then answers
//! intercepted requests:
//!
//! - navigations go network-first, falling back to the cached page, then the
//!   offline document, then a network-error response;
//! - subresources go cache-first, storing cacheable network responses.
//!
//! Network failures are never returned as errors from [`OfflineCacheManager::handle_fetch`].
//! Opportunistic cache writes run on spawned tasks; a caller that stops
//! waiting does not cancel them, and [`OfflineCacheManager::wait_until_idle`]
//! drains them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::try_join_all;
use tokio::task::JoinHandle;
use url::Url;
use waypost_core::{
    CacheDb, ControlMessage, Error, Lifecycle, LifecycleEvent, Request, RequestMode, ResponseSnapshot, WorkerConfig,
    WorkerState,
};

use super::strategy::{Route, route};
use crate::fetch::Network;

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    OfflineFallback,
    /// Synthetic error response; nothing else was available.
    NetworkError,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Network => "network",
            ResponseSource::Cache => "cache",
            ResponseSource::OfflineFallback => "offline_fallback",
            ResponseSource::NetworkError => "network_error",
        }
    }
}

/// Result of intercepting a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not intercepted; the host performs the request itself.
    PassThrough,
    Respond { response: ResponseSnapshot, source: ResponseSource },
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&ResponseSnapshot> {
        match self {
            FetchOutcome::PassThrough => None,
            FetchOutcome::Respond { response, .. } => Some(response),
        }
    }

    pub fn source(&self) -> Option<ResponseSource> {
        match self {
            FetchOutcome::PassThrough => None,
            FetchOutcome::Respond { source, .. } => Some(*source),
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, FetchOutcome::PassThrough)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub version: String,
    /// Number of manifest entries stored.
    pub precached: usize,
    /// Whether the manager may activate without waiting.
    pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateOutcome {
    pub version: String,
    /// Generations removed during activation.
    pub deleted: Vec<String>,
}

/// Offline cache manager for one cache version.
pub struct OfflineCacheManager {
    config: Arc<WorkerConfig>,
    cache: CacheDb,
    network: Arc<dyn Network>,
    lifecycle: Mutex<Lifecycle>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport failures are expected offline; anything else is worth a warning.
fn fetch_failed(request: &Request, error: &Error, message: &str) {
    if error.is_network_failure() {
        tracing::debug!(url = %request.url, %error, "{message}");
    } else {
        tracing::warn!(url = %request.url, %error, "{message}");
    }
}

impl OfflineCacheManager {
    pub fn new(config: Arc<WorkerConfig>, cache: CacheDb, network: Arc<dyn Network>) -> Self {
        Self { config, cache, network, lifecycle: Mutex::new(Lifecycle::new()), pending: Mutex::new(Vec::new()) }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn version(&self) -> &str {
        self.config.version()
    }

    pub fn state(&self) -> WorkerState {
        lock(&self.lifecycle).state()
    }

    pub fn is_waiting(&self) -> bool {
        lock(&self.lifecycle).is_waiting()
    }

    pub fn ready_to_activate(&self) -> bool {
        lock(&self.lifecycle).ready_to_activate()
    }

    pub fn controls_clients(&self) -> bool {
        lock(&self.lifecycle).controls_clients()
    }

    fn transition(&self, event: LifecycleEvent) -> Result<WorkerState, Error> {
        Ok(lock(&self.lifecycle).apply(event)?)
    }

    /// Precache the manifest into this version's generation.
    ///
    /// All entries are fetched first; the generation is written in one
    /// transaction only if every fetch returned an OK response. On failure
    /// nothing is stored and the manager can be installed again.
    pub async fn install(&self) -> Result<InstallOutcome, Error> {
        let version = self.version();
        self.transition(LifecycleEvent::Install)?;
        tracing::info!(version, entries = self.config.precache().len(), "installing");

        match self.precache().await {
            Ok(precached) => {
                let skip_waiting = {
                    let mut lifecycle = lock(&self.lifecycle);
                    lifecycle.apply(LifecycleEvent::InstallSucceeded)?;
                    if self.config.skip_waiting_on_install() {
                        lifecycle.request_skip_waiting();
                    }
                    lifecycle.skip_waiting()
                };
                tracing::info!(version, precached, skip_waiting, "installed");
                Ok(InstallOutcome { version: version.to_string(), precached, skip_waiting })
            }
            Err(e) => {
                // A retired manager stays redundant.
                self.transition(LifecycleEvent::InstallFailed).ok();
                tracing::warn!(version, error = %e, "install failed");
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<usize, Error> {
        let fetches = self.config.precache().iter().map(|url| async move {
            let request = Request::new("GET", url.clone(), RequestMode::Cors);
            let response = self
                .network
                .fetch(&request)
                .await
                .map_err(|e| Error::PrecacheFailed { url: url.to_string(), reason: e.to_string() })?;
            if !response.is_ok() {
                return Err(Error::PrecacheFailed { url: url.to_string(), reason: format!("status {}", response.status) });
            }
            Ok::<_, Error>((request, response))
        });

        let pairs = try_join_all(fetches).await?;
        self.cache.put_all(self.version(), &pairs).await?;
        Ok(pairs.len())
    }

    /// Delete every other generation and take control of clients.
    pub async fn activate(&self) -> Result<ActivateOutcome, Error> {
        let version = self.version();
        self.transition(LifecycleEvent::Activate)?;

        let deleted = match self.prune_generations().await {
            Ok(deleted) => deleted,
            Err(e) => {
                // A retired manager stays redundant.
                self.transition(LifecycleEvent::ActivateFailed).ok();
                tracing::warn!(version, error = %e, "activation failed");
                return Err(e);
            }
        };

        {
            let mut lifecycle = lock(&self.lifecycle);
            lifecycle.apply(LifecycleEvent::ActivateSucceeded)?;
            lifecycle.claim_clients()?;
        }
        tracing::info!(version, deleted = deleted.len(), "activated; clients claimed");

        Ok(ActivateOutcome { version: version.to_string(), deleted })
    }

    async fn prune_generations(&self) -> Result<Vec<String>, Error> {
        // Stamp first: a missing generation must fail before anything is pruned.
        if !self.cache.mark_generation_activated(self.version()).await? {
            return Err(Error::GenerationMissing(self.version().to_string()));
        }
        let deleted = self.cache.delete_generations_except(self.version()).await?;
        for name in &deleted {
            tracing::info!(generation = %name, "deleted stale cache generation");
        }
        Ok(deleted)
    }

    /// Handle a control message from a page.
    ///
    /// Returns true when the manager is now installed and free to activate.
    pub fn handle_message(&self, message: ControlMessage) -> bool {
        let mut lifecycle = lock(&self.lifecycle);
        match message {
            ControlMessage::SkipWaiting => lifecycle.request_skip_waiting(),
        }
        tracing::debug!(version = self.version(), message = message.type_name(), state = %lifecycle.state(), "control message");
        lifecycle.ready_to_activate()
    }

    /// Mark this manager as replaced by a newer version.
    pub fn retire(&self) {
        if let Err(e) = self.transition(LifecycleEvent::Replace) {
            tracing::debug!(version = self.version(), error = %e, "already retired");
        }
    }

    /// Intercept a request.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        if !self.controls_clients() {
            return FetchOutcome::PassThrough;
        }

        match route(&self.config, request) {
            Route::PassThrough(reason) => {
                tracing::trace!(url = %request.url, ?reason, "not intercepted");
                FetchOutcome::PassThrough
            }
            Route::NetworkFirst => self.network_first(request).await,
            Route::CacheFirst => self.cache_first(request).await,
        }
    }

    async fn network_first(&self, request: &Request) -> FetchOutcome {
        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    self.store_in_background(request.clone(), response.clone());
                }
                FetchOutcome::Respond { response, source: ResponseSource::Network }
            }
            Err(e) => {
                fetch_failed(request, &e, "navigation failed; trying cache");

                if let Some(response) = self.lookup(&request.method, &request.url).await {
                    return FetchOutcome::Respond { response, source: ResponseSource::Cache };
                }

                if let Some(response) = self.lookup("GET", self.config.offline_url()).await {
                    tracing::debug!(url = %request.url, "serving offline document");
                    return FetchOutcome::Respond { response, source: ResponseSource::OfflineFallback };
                }

                tracing::warn!(url = %request.url, "offline document missing from cache");
                FetchOutcome::Respond { response: ResponseSnapshot::network_error(), source: ResponseSource::NetworkError }
            }
        }
    }

    async fn cache_first(&self, request: &Request) -> FetchOutcome {
        if let Some(response) = self.lookup(&request.method, &request.url).await {
            tracing::debug!(url = %request.url, "cache hit");
            return FetchOutcome::Respond { response, source: ResponseSource::Cache };
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    self.store_in_background(request.clone(), response.clone());
                } else {
                    tracing::debug!(
                        url = %request.url,
                        status = response.status,
                        response_type = %response.response_type,
                        "not cacheable"
                    );
                }
                FetchOutcome::Respond { response, source: ResponseSource::Network }
            }
            Err(e) => {
                fetch_failed(request, &e, "subresource unavailable");
                FetchOutcome::Respond { response: ResponseSnapshot::network_error(), source: ResponseSource::NetworkError }
            }
        }
    }

    /// Cache lookup that degrades to a miss when the store is unavailable.
    async fn lookup(&self, method: &str, url: &Url) -> Option<ResponseSnapshot> {
        match self.cache.match_entry(self.version(), method, url).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(%url, error = %e, "cache lookup failed; treating as miss");
                None
            }
        }
    }

    fn store_in_background(&self, request: Request, response: ResponseSnapshot) {
        let cache = self.cache.clone();
        let version = self.version().to_string();
        let handle = tokio::spawn(async move {
            match cache.put_entry(&version, &request, &response).await {
                Ok(true) => tracing::debug!(url = %request.url, "cached"),
                Ok(false) => tracing::debug!(url = %request.url, %version, "generation gone; write dropped"),
                Err(e) => tracing::warn!(url = %request.url, error = %e, "cache write failed"),
            }
        });

        let mut pending = lock(&self.pending);
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait for every spawned cache write to settle.
    pub async fn wait_until_idle(&self) {
        loop {
            let handles = std::mem::take(&mut *lock(&self.pending));
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "cache write task failed");
                }
            }
        }
    }
}
