//! Shared fixtures for tool tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use url::Url;
use waypost_client::{Network, Registration};
use waypost_core::{CacheDb, Error, Request, ResponseSnapshot, ResponseType, WorkerConfig};

pub(crate) const ORIGIN: &str = "http://localhost:5000";

/// Same-origin responses keyed by path; 404 for anything else.
#[derive(Default)]
pub(crate) struct StaticNetwork {
    pages: Mutex<HashMap<String, String>>,
    offline: AtomicBool,
}

impl StaticNetwork {
    pub(crate) fn serve(&self, path: &str, body: &str) {
        self.pages.lock().unwrap().insert(path.to_string(), body.to_string());
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Network for StaticNetwork {
    async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot, Error> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network(format!("{}: offline", request.url)));
        }
        let body = self.pages.lock().unwrap().get(request.url.path()).cloned();
        Ok(match body {
            Some(body) => ResponseSnapshot::ok(&request.url, ResponseType::Basic, body),
            None => ResponseSnapshot::ok(&request.url, ResponseType::Basic, "").with_status(404, "Not Found"),
        })
    }
}

pub(crate) fn config(version: &str) -> WorkerConfig {
    WorkerConfig::new(version, Url::parse(ORIGIN).unwrap())
        .unwrap()
        .with_precache(&["/", "/static/css/base.css", "/offline.html"])
        .unwrap()
        .with_skip_waiting_on_install(false)
}

/// A registration with version `v1` installed and active.
pub(crate) async fn registration() -> (Arc<StaticNetwork>, Registration) {
    let network = Arc::new(StaticNetwork::default());
    network.serve("/", "<h1>home</h1>");
    network.serve("/static/css/base.css", "body{}");
    network.serve("/offline.html", "<h1>offline</h1>");

    let cache = CacheDb::open_in_memory().await.unwrap();
    let dyn_network: Arc<dyn Network> = network.clone();
    let registration = Registration::new(cache, dyn_network);
    registration.register(config("v1")).await.unwrap();
    (network, registration)
}
