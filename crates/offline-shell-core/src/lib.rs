//! Core library for offline-shell.
//!
//! Provides the cache policy engine that gives a small web application
//! offline availability: the app shell is cached at install time, stale
//! namespaces are pruned at activation, and every intercepted request is
//! routed cache-first or network-first depending on its path.

pub mod cache;
pub mod config;
pub mod engine;
pub mod models;
pub mod network;
pub mod worker;

pub use cache::{CacheStorage, DiskStorage, MemoryStorage, StorageError};
pub use config::EngineConfig;
pub use engine::{CachePolicyEngine, EngineError, LifecycleHost, Route};
pub use models::{CachedEntry, Method, Request, RequestKey, Response};
pub use network::{Fetch, FetchError, HttpFetcher};
pub use worker::{Worker, WorkerState};
