//! Request routing: which strategy, if any, handles a request.

use waypost_core::{Request, WorkerConfig};

/// Why a request is left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassThroughReason {
    /// Only GET requests are intercepted.
    NotGet(String),
    /// URL contains an API or dev-tooling marker.
    Marker(String),
}

/// How a request is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    PassThrough(PassThroughReason),
    /// Page loads: network, then cache, then offline document.
    NetworkFirst,
    /// Subresources: cache, then network.
    CacheFirst,
}

/// Decide the route for a request.
pub fn route(config: &WorkerConfig, request: &Request) -> Route {
    if !request.is_get() {
        return Route::PassThrough(PassThroughReason::NotGet(request.method.clone()));
    }

    if let Some(marker) = config.passthrough_marker(&request.url) {
        return Route::PassThrough(PassThroughReason::Marker(marker.to_string()));
    }

    if request.is_navigation() { Route::NetworkFirst } else { Route::CacheFirst }
}
