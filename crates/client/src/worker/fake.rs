//! Scripted network for manager tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Notify, Semaphore};
use url::Url;
use waypost_core::{Error, Request, ResponseSnapshot, ResponseType};

use crate::fetch::Network;

pub(crate) const ORIGIN: &str = "http://localhost:5000";

pub(crate) fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Serves registered responses, 404 for everything else, or fails every
/// request while offline. Records each request it sees.
#[derive(Default)]
pub(crate) struct ScriptedNetwork {
    routes: Mutex<HashMap<String, ResponseSnapshot>>,
    failing: Mutex<Vec<String>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
}

/// Holds fetches of one URL until opened.
pub(crate) struct Gate {
    entered: Notify,
    release: Semaphore,
}

impl Gate {
    fn new() -> Self {
        Self { entered: Notify::new(), release: Semaphore::new(0) }
    }

    /// Resolves once a fetch is parked at the gate.
    pub(crate) async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Release parked fetches. The gate stays open afterwards.
    pub(crate) fn open(&self) {
        self.release.add_permits(1);
    }
}

impl ScriptedNetwork {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn serve(&self, url: &Url, response: ResponseSnapshot) {
        self.routes.lock().unwrap().insert(url.to_string(), response);
    }

    /// Serve a 200 body, `basic` when same-origin and `cors` otherwise.
    pub(crate) fn serve_text(&self, url: &Url, body: &str) {
        let ty = if url.origin() == Url::parse(ORIGIN).unwrap().origin() {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        };
        self.serve(url, ResponseSnapshot::ok(url, ty, body.to_string()));
    }

    /// Make one URL fail at the transport level.
    pub(crate) fn fail(&self, url: &Url) {
        self.failing.lock().unwrap().push(url.to_string());
    }

    /// Park every fetch of `url` until the returned gate is opened.
    pub(crate) fn hold(&self, url: &Url) -> Arc<Gate> {
        let gate = Arc::new(Gate::new());
        self.gates.lock().unwrap().insert(url.to_string(), Arc::clone(&gate));
        gate
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self, url: &Url) -> usize {
        let key = url.to_string();
        self.calls.lock().unwrap().iter().filter(|c| c.ends_with(&key)).count()
    }
}

#[async_trait::async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot, Error> {
        let key = request.url.to_string();
        self.calls.lock().unwrap().push(format!("{} {}", request.method, key));

        let gate = self.gates.lock().unwrap().get(&key).cloned();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            let _permit = gate.release.acquire().await.unwrap();
        }

        if self.offline.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&key) {
            return Err(Error::Network(format!("{key}: connection refused")));
        }

        let found = self.routes.lock().unwrap().get(&key).cloned();
        Ok(found.unwrap_or_else(|| {
            ResponseSnapshot::ok(&request.url, ResponseType::Basic, "not found").with_status(404, "Not Found")
        }))
    }
}
