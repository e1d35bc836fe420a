//! Cache policy engine.
//!
//! This module provides the `CachePolicyEngine`, which owns the static and
//! runtime namespaces and implements the three lifecycle handlers:
//!
//! - `install`: cache the app-shell manifest into the static namespace
//! - `activate`: delete namespaces left behind by earlier deployments
//! - `route_request`: serve an intercepted request from cache or network
//!
//! Routing decisions are exposed separately through `Route` so hosts can
//! inspect them without performing I/O.

pub mod error;
pub mod policy;

use std::fmt;

pub use error::EngineError;
pub use policy::CachePolicyEngine;

/// Signals the engine sends back to the host that dispatches its events.
pub trait LifecycleHost: Send + Sync {
    /// Take effect immediately instead of waiting for open clients to close.
    fn skip_waiting(&self) {}

    /// Become the controller for every open client now.
    fn claim_clients(&self) {}
}

/// Host that ignores lifecycle signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl LifecycleHost for NoopHost {}

/// Which strategy applies to an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Non-GET or cross-origin: straight to network, caches untouched.
    Bypass,
    /// Same-origin GET under the API prefix: network first, runtime cache fallback.
    NetworkFirst,
    /// Every other same-origin GET: cache first, network on miss.
    CacheFirst,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Route::Bypass => "bypass",
            Route::NetworkFirst => "network-first",
            Route::CacheFirst => "cache-first",
        })
    }
}
