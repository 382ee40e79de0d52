//! Version handover between cache managers.
//!
//! A registration owns at most one active manager, which intercepts requests,
//! and at most one waiting manager, which has installed a newer version and
//! waits for a skip-waiting request or for clients to be released. Both share
//! the same cache database and network, each reading and writing only its own
//! generation.
//!
//! Installs and promotions are serialized by a handover lock, always taken
//! before the slot lock. A manager still precaching sits in the installing
//! slot so control messages reach it.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use waypost_core::{CacheDb, ControlMessage, Error, Request, WorkerConfig, WorkerState};

use super::manager::{ActivateOutcome, FetchOutcome, InstallOutcome, OfflineCacheManager};
use crate::fetch::Network;

#[derive(Default)]
struct Slots {
    installing: Option<Arc<OfflineCacheManager>>,
    active: Option<Arc<OfflineCacheManager>>,
    waiting: Option<Arc<OfflineCacheManager>>,
}

/// Result of registering a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The version is already active or waiting.
    Unchanged { version: String },
    Activated { install: InstallOutcome, activation: ActivateOutcome },
    /// Installed, waiting for the active version to let go.
    Waiting { install: InstallOutcome },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub version: String,
    pub state: WorkerState,
    pub controls_clients: bool,
    pub ready_to_activate: bool,
}

impl WorkerStatus {
    fn of(manager: &OfflineCacheManager) -> Self {
        Self {
            version: manager.version().to_string(),
            state: manager.state(),
            controls_clients: manager.controls_clients(),
            ready_to_activate: manager.ready_to_activate(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationStatus {
    pub installing: Option<WorkerStatus>,
    pub active: Option<WorkerStatus>,
    pub waiting: Option<WorkerStatus>,
}

pub struct Registration {
    cache: CacheDb,
    network: Arc<dyn Network>,
    slots: RwLock<Slots>,
    handover: Mutex<()>,
}

impl Registration {
    pub fn new(cache: CacheDb, network: Arc<dyn Network>) -> Self {
        Self { cache, network, slots: RwLock::new(Slots::default()), handover: Mutex::new(()) }
    }

    pub fn cache(&self) -> &CacheDb {
        &self.cache
    }

    pub fn network(&self) -> Arc<dyn Network> {
        Arc::clone(&self.network)
    }

    /// Install a version and activate it if nothing else is active or it may
    /// skip waiting.
    ///
    /// The active manager keeps serving while the new one installs. A failed
    /// install leaves the registration untouched. No promotion can run until
    /// the new manager has its slot.
    pub async fn register(&self, config: WorkerConfig) -> Result<RegisterOutcome, Error> {
        let _handover = self.handover.lock().await;
        {
            let slots = self.slots.read().await;
            let known = slots.active.iter().chain(slots.waiting.iter()).any(|m| m.version() == config.version());
            if known {
                tracing::debug!(version = config.version(), "version already registered");
                return Ok(RegisterOutcome::Unchanged { version: config.version().to_string() });
            }
        }

        let manager = Arc::new(OfflineCacheManager::new(Arc::new(config), self.cache.clone(), self.network()));
        self.slots.write().await.installing = Some(Arc::clone(&manager));
        let installed = manager.install().await;

        let mut slots = self.slots.write().await;
        slots.installing = None;
        let install = installed?;
        if let Some(previous) = slots.waiting.take() {
            tracing::info!(version = previous.version(), "waiting version superseded");
            previous.retire();
        }

        if slots.active.is_none() || manager.ready_to_activate() {
            let activation = Self::promote(&mut slots, manager).await?;
            Ok(RegisterOutcome::Activated { install, activation })
        } else {
            tracing::info!(version = manager.version(), "installed; waiting for active version to be released");
            slots.waiting = Some(manager);
            Ok(RegisterOutcome::Waiting { install })
        }
    }

    /// Activate `manager`, retiring the active one. On failure the manager is
    /// parked as waiting and the active one keeps serving.
    async fn promote(slots: &mut Slots, manager: Arc<OfflineCacheManager>) -> Result<ActivateOutcome, Error> {
        match manager.activate().await {
            Ok(outcome) => {
                if let Some(previous) = slots.active.replace(manager) {
                    previous.retire();
                }
                Ok(outcome)
            }
            Err(e) => {
                slots.waiting = Some(manager);
                Err(e)
            }
        }
    }

    /// Deliver a control message to the installing manager, else the waiting
    /// one, else the active one. A waiting manager told to skip waiting is
    /// promoted. An installing one acts on it once precaching finishes.
    pub async fn post_message(&self, message: ControlMessage) -> Result<Option<ActivateOutcome>, Error> {
        let installing = self.slots.read().await.installing.clone();
        if let Some(target) = installing {
            if !target.handle_message(message) {
                return Ok(None);
            }
            // Install finished in between; promote it below.
        }

        let _handover = self.handover.lock().await;
        let mut slots = self.slots.write().await;
        let Some(target) = slots.waiting.clone().or_else(|| slots.active.clone()) else {
            tracing::debug!(message = message.type_name(), "no worker to receive message");
            return Ok(None);
        };

        let ready = target.handle_message(message);
        let is_waiting = slots.waiting.as_ref().is_some_and(|w| Arc::ptr_eq(w, &target));
        if ready && is_waiting {
            slots.waiting = None;
            return Self::promote(&mut slots, target).await.map(Some);
        }
        Ok(None)
    }

    /// Every page controlled by the active version has gone away.
    pub async fn clients_released(&self) -> Result<Option<ActivateOutcome>, Error> {
        let _handover = self.handover.lock().await;
        let mut slots = self.slots.write().await;
        match slots.waiting.take() {
            Some(waiting) => Self::promote(&mut slots, waiting).await.map(Some),
            None => Ok(None),
        }
    }

    /// Route a request through the active manager.
    pub async fn fetch(&self, request: &Request) -> FetchOutcome {
        let active = self.slots.read().await.active.clone();
        match active {
            Some(manager) => manager.handle_fetch(request).await,
            None => FetchOutcome::PassThrough,
        }
    }

    pub async fn status(&self) -> RegistrationStatus {
        let slots = self.slots.read().await;
        RegistrationStatus {
            installing: slots.installing.as_deref().map(WorkerStatus::of),
            active: slots.active.as_deref().map(WorkerStatus::of),
            waiting: slots.waiting.as_deref().map(WorkerStatus::of),
        }
    }

    /// Wait for pending cache writes of both managers.
    pub async fn wait_until_idle(&self) {
        let managers: Vec<_> = {
            let slots = self.slots.read().await;
            slots.active.iter().chain(slots.waiting.iter()).cloned().collect()
        };
        for manager in managers {
            manager.wait_until_idle().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::ResponseSource;
    use crate::worker::fake::{ScriptedNetwork, url};

    fn config(version: &str) -> WorkerConfig {
        WorkerConfig::new(version, url("/"))
            .unwrap()
            .with_precache(&["/", "/static/css/base.css", "/offline.html"])
            .unwrap()
            .with_skip_waiting_on_install(false)
    }

    fn serve_site(network: &ScriptedNetwork, label: &str) {
        network.serve_text(&url("/"), &format!("<h1>home {label}</h1>"));
        network.serve_text(&url("/static/css/base.css"), &format!("/* {label} */"));
        network.serve_text(&url("/offline.html"), "<h1>offline</h1>");
    }

    async fn setup() -> (Arc<ScriptedNetwork>, CacheDb, Registration) {
        let network = Arc::new(ScriptedNetwork::new());
        serve_site(&network, "v1");
        let cache = CacheDb::open_in_memory().await.unwrap();
        let dyn_network: Arc<dyn Network> = network.clone();
        let registration = Registration::new(cache.clone(), dyn_network);
        (network, cache, registration)
    }

    async fn generation_names(cache: &CacheDb) -> Vec<String> {
        cache.list_generations().await.unwrap().into_iter().map(|g| g.name).collect()
    }

    #[tokio::test]
    async fn test_first_version_activates_immediately() {
        let (_network, _cache, registration) = setup().await;

        let outcome = registration.register(config("v1")).await.unwrap();
        assert!(matches!(outcome, RegisterOutcome::Activated { .. }));

        let status = registration.status().await;
        let active = status.active.unwrap();
        assert_eq!(active.version, "v1");
        assert_eq!(active.state, WorkerState::Activated);
        assert!(active.controls_clients);
        assert!(status.waiting.is_none());
    }

    #[tokio::test]
    async fn test_no_registration_passes_through() {
        let (_network, _cache, registration) = setup().await;
        let outcome = registration.fetch(&Request::get(url("/static/css/base.css"))).await;
        assert!(outcome.is_pass_through());
    }

    #[tokio::test]
    async fn test_same_version_unchanged() {
        let (network, _cache, registration) = setup().await;
        registration.register(config("v1")).await.unwrap();
        let calls = network.calls().len();

        let outcome = registration.register(config("v1")).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Unchanged { version: "v1".into() });
        assert_eq!(network.calls().len(), calls);
    }

    #[tokio::test]
    async fn test_new_version_waits_and_old_keeps_serving() {
        let (network, cache, registration) = setup().await;
        registration.register(config("v1")).await.unwrap();

        serve_site(&network, "v2");
        let outcome = registration.register(config("v2")).await.unwrap();
        assert!(matches!(outcome, RegisterOutcome::Waiting { .. }));
        assert_eq!(generation_names(&cache).await, vec!["v1".to_string(), "v2".to_string()]);

        let css = registration.fetch(&Request::get(url("/static/css/base.css"))).await;
        assert_eq!(css.source(), Some(ResponseSource::Cache));
        assert_eq!(css.response().unwrap().text(), "/* v1 */");

        network.set_offline(true);
        let page = registration.fetch(&Request::navigate(url("/"))).await;
        assert_eq!(page.response().unwrap().text(), "<h1>home v1</h1>");

        let status = registration.status().await;
        assert_eq!(status.active.unwrap().version, "v1");
        let waiting = status.waiting.unwrap();
        assert_eq!(waiting.version, "v2");
        assert_eq!(waiting.state, WorkerState::Installed);
        assert!(!waiting.ready_to_activate);
    }

    #[tokio::test]
    async fn test_skip_waiting_message_promotes() {
        let (network, cache, registration) = setup().await;
        registration.register(config("v1")).await.unwrap();
        serve_site(&network, "v2");
        registration.register(config("v2")).await.unwrap();

        let activation = registration.post_message(ControlMessage::SkipWaiting).await.unwrap().unwrap();
        assert_eq!(activation.version, "v2");
        assert_eq!(activation.deleted, vec!["v1".to_string()]);
        assert_eq!(generation_names(&cache).await, vec!["v2".to_string()]);

        let css = registration.fetch(&Request::get(url("/static/css/base.css"))).await;
        assert_eq!(css.response().unwrap().text(), "/* v2 */");
        assert!(registration.status().await.waiting.is_none());
    }

    #[tokio::test]
    async fn test_skip_waiting_to_active_is_noop() {
        let (_network, _cache, registration) = setup().await;
        assert_eq!(registration.post_message(ControlMessage::SkipWaiting).await.unwrap(), None);

        registration.register(config("v1")).await.unwrap();
        assert_eq!(registration.post_message(ControlMessage::SkipWaiting).await.unwrap(), None);
        assert_eq!(registration.status().await.active.unwrap().version, "v1");
    }

    #[tokio::test]
    async fn test_skip_waiting_on_install_activates_over_active() {
        let (network, cache, registration) = setup().await;
        registration.register(config("v1")).await.unwrap();

        serve_site(&network, "v2");
        let outcome = registration
            .register(config("v2").with_skip_waiting_on_install(true))
            .await
            .unwrap();

        let RegisterOutcome::Activated { activation, .. } = outcome else {
            panic!("expected activation, got {outcome:?}");
        };
        assert_eq!(activation.deleted, vec!["v1".to_string()]);
        assert_eq!(generation_names(&cache).await, vec!["v2".to_string()]);
    }

    #[tokio::test]
    async fn test_clients_released_promotes_waiting() {
        let (network, cache, registration) = setup().await;
        registration.register(config("v1")).await.unwrap();
        assert_eq!(registration.clients_released().await.unwrap(), None);

        serve_site(&network, "v2");
        registration.register(config("v2")).await.unwrap();
        let activation = registration.clients_released().await.unwrap().unwrap();

        assert_eq!(activation.version, "v2");
        assert_eq!(generation_names(&cache).await, vec!["v2".to_string()]);
    }

    #[tokio::test]
    async fn test_newer_waiting_version_supersedes_older() {
        let (network, _cache, registration) = setup().await;
        registration.register(config("v1")).await.unwrap();
        serve_site(&network, "v2");
        registration.register(config("v2")).await.unwrap();
        serve_site(&network, "v3");
        registration.register(config("v3")).await.unwrap();

        let status = registration.status().await;
        assert_eq!(status.waiting.unwrap().version, "v3");

        let activation = registration.clients_released().await.unwrap().unwrap();
        let mut deleted = activation.deleted;
        deleted.sort();
        assert_eq!(deleted, vec!["v1".to_string(), "v2".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_install_keeps_active_version() {
        let (network, cache, registration) = setup().await;
        registration.register(config("v1")).await.unwrap();

        network.fail(&url("/static/css/base.css"));
        let result = registration.register(config("v2")).await;
        assert!(matches!(result, Err(Error::PrecacheFailed { .. })));

        assert_eq!(generation_names(&cache).await, vec!["v1".to_string()]);
        let status = registration.status().await;
        assert_eq!(status.active.unwrap().version, "v1");
        assert!(status.waiting.is_none());
        let css = registration.fetch(&Request::get(url("/static/css/base.css"))).await;
        assert_eq!(css.source(), Some(ResponseSource::Cache));
    }

    #[tokio::test]
    async fn test_release_during_install_waits_for_new_version() {
        let (network, cache, registration) = setup().await;
        let registration = Arc::new(registration);
        registration.register(config("v1")).await.unwrap();
        serve_site(&network, "v2");
        registration.register(config("v2")).await.unwrap();

        serve_site(&network, "v3");
        let gate = network.hold(&url("/offline.html"));
        let install = tokio::spawn({
            let registration = Arc::clone(&registration);
            async move { registration.register(config("v3")).await }
        });
        gate.entered().await;
        assert_eq!(registration.status().await.installing.unwrap().version, "v3");

        let release = tokio::spawn({
            let registration = Arc::clone(&registration);
            async move { registration.clients_released().await }
        });
        tokio::task::yield_now().await;
        gate.open();

        let outcome = install.await.unwrap().unwrap();
        assert!(matches!(outcome, RegisterOutcome::Waiting { .. }));
        let activation = release.await.unwrap().unwrap().unwrap();
        assert_eq!(activation.version, "v3");
        assert_eq!(generation_names(&cache).await, vec!["v3".to_string()]);

        let status = registration.status().await;
        assert_eq!(status.active.unwrap().version, "v3");
        assert!(status.installing.is_none());
        assert!(status.waiting.is_none());

        network.set_offline(true);
        let page = registration.fetch(&Request::navigate(url("/reports/q3"))).await;
        assert_eq!(page.source(), Some(ResponseSource::OfflineFallback));
        assert_eq!(page.response().unwrap().text(), "<h1>offline</h1>");
    }

    #[tokio::test]
    async fn test_skip_waiting_during_install_is_kept() {
        let (network, cache, registration) = setup().await;
        let registration = Arc::new(registration);
        registration.register(config("v1")).await.unwrap();

        serve_site(&network, "v2");
        let gate = network.hold(&url("/offline.html"));
        let install = tokio::spawn({
            let registration = Arc::clone(&registration);
            async move { registration.register(config("v2")).await }
        });
        gate.entered().await;

        assert_eq!(registration.post_message(ControlMessage::SkipWaiting).await.unwrap(), None);
        let installing = registration.status().await.installing.unwrap();
        assert_eq!(installing.version, "v2");
        assert_eq!(installing.state, WorkerState::Installing);
        gate.open();

        let outcome = install.await.unwrap().unwrap();
        let RegisterOutcome::Activated { install, activation } = outcome else {
            panic!("expected activation, got {outcome:?}");
        };
        assert!(install.skip_waiting);
        assert_eq!(activation.deleted, vec!["v1".to_string()]);
        assert_eq!(generation_names(&cache).await, vec!["v2".to_string()]);
        assert_eq!(registration.status().await.active.unwrap().version, "v2");
    }

    #[tokio::test]
    async fn test_concurrent_register_same_version_installs_once() {
        let (network, _cache, registration) = setup().await;
        let registration = Arc::new(registration);
        let gate = network.hold(&url("/offline.html"));

        let first = tokio::spawn({
            let registration = Arc::clone(&registration);
            async move { registration.register(config("v1")).await }
        });
        gate.entered().await;
        let second = tokio::spawn({
            let registration = Arc::clone(&registration);
            async move { registration.register(config("v1")).await }
        });
        tokio::task::yield_now().await;
        gate.open();

        assert!(matches!(first.await.unwrap().unwrap(), RegisterOutcome::Activated { .. }));
        assert_eq!(second.await.unwrap().unwrap(), RegisterOutcome::Unchanged { version: "v1".into() });
        assert_eq!(network.call_count(&url("/offline.html")), 1);
    }

    #[tokio::test]
    async fn test_wait_until_idle_flushes_active_writes() {
        let (network, cache, registration) = setup().await;
        registration.register(config("v1")).await.unwrap();
        let chart = url("/static/img/chart.svg");
        network.serve_text(&chart, "<svg/>");

        registration.fetch(&Request::get(chart.clone())).await;
        registration.wait_until_idle().await;

        assert!(cache.match_entry("v1", "GET", &chart).await.unwrap().is_some());
    }
}
