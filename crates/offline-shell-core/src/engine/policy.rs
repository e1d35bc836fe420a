use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{EngineError, LifecycleHost, NoopHost, Route};
use crate::cache::CacheStorage;
use crate::config::EngineConfig;
use crate::models::{CachedEntry, Method, Request, RequestKey, Response};
use crate::network::Fetch;

/// Maximum concurrent asset fetches during install.
/// The app shell is a handful of files; 6 matches a browser's per-host limit.
const MAX_CONCURRENT_INSTALL_FETCHES: usize = 6;

pub struct CachePolicyEngine {
    config: Arc<EngineConfig>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetch>,
    host: Arc<dyn LifecycleHost>,
    /// Outstanding runtime fills started by cache-first misses.
    pending_fills: Mutex<Vec<JoinHandle<()>>>,
}

impl CachePolicyEngine {
    pub fn new(
        config: EngineConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetch>,
    ) -> Self {
        Self::with_host(config, storage, fetcher, Arc::new(NoopHost))
    }

    pub fn with_host(
        config: EngineConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetch>,
        host: Arc<dyn LifecycleHost>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            fetcher,
            host,
            pending_fills: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    // ===== Install =====

    /// Fetch every manifest asset and make them the whole static namespace.
    ///
    /// Nothing is written unless every asset was fetched with a 2xx status;
    /// entries from an earlier manifest under the same name are dropped.
    pub async fn install(&self, manifest: &[String]) -> Result<(), EngineError> {
        if manifest.is_empty() {
            return Err(EngineError::EmptyManifest);
        }

        let requests = manifest
            .iter()
            .map(|path| {
                self.config
                    .resolve(path)
                    .map(Request::get)
                    .map_err(|e| EngineError::InvalidUrl(format!("{}: {}", path, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let entries: Vec<CachedEntry> = stream::iter(requests)
            .map(|request| self.fetch_asset(request))
            .buffered(MAX_CONCURRENT_INSTALL_FETCHES)
            .try_collect()
            .await?;

        let name = &self.config.static_cache;
        self.storage.replace_all(name, entries).await?;
        info!(cache = %name, assets = manifest.len(), "App shell installed");

        self.host.skip_waiting();
        Ok(())
    }

    async fn fetch_asset(&self, request: Request) -> Result<CachedEntry, EngineError> {
        let response = self
            .fetcher
            .fetch(&request)
            .await
            .map_err(|e| EngineError::Install {
                url: request.url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.ok() {
            return Err(EngineError::Install {
                url: request.url.to_string(),
                reason: format!("status {}", response.status),
            });
        }

        Ok(CachedEntry::new(request.key(), response))
    }

    // ===== Activate =====

    /// Delete every namespace not in the configured version set.
    pub async fn activate(&self) -> Result<Vec<String>, EngineError> {
        self.activate_with(&self.config.version_set()).await
    }

    /// Delete every namespace not in `current`. Returns the deleted names.
    pub async fn activate_with(&self, current: &BTreeSet<String>) -> Result<Vec<String>, EngineError> {
        let stale: Vec<String> = self
            .storage
            .keys()
            .await?
            .into_iter()
            .filter(|name| !current.contains(name))
            .collect();

        for name in &stale {
            self.storage
                .delete(name)
                .await
                .map_err(|source| EngineError::Activate {
                    name: name.clone(),
                    source,
                })?;
            info!(cache = %name, "Deleted stale cache");
        }

        self.host.claim_clients();
        Ok(stale)
    }

    // ===== Fetch =====

    /// Decide which strategy applies to `request`. Performs no I/O.
    pub fn route(&self, request: &Request) -> Route {
        if request.method != Method::Get || !self.config.is_same_origin(&request.url) {
            Route::Bypass
        } else if self.config.is_api_path(&request.url) {
            Route::NetworkFirst
        } else {
            Route::CacheFirst
        }
    }

    pub async fn route_request(&self, request: &Request) -> Result<Response, EngineError> {
        let route = self.route(request);
        debug!(method = %request.method, url = %request.url, route = %route, "Routing request");

        match route {
            Route::Bypass => Ok(self.fetcher.fetch(request).await?),
            Route::NetworkFirst => self.network_first(request).await,
            Route::CacheFirst => self.cache_first(request).await,
        }
    }

    async fn network_first(&self, request: &Request) -> Result<Response, EngineError> {
        let key = request.key();

        let error = match self.fetcher.fetch(request).await {
            Ok(response) => {
                // Awaited so the entry is visible on return; the task
                // itself outlives a cancelled caller.
                let fill = self.spawn_fill(key, response.clone());
                if let Err(e) = fill.await {
                    warn!(error = %e, "Runtime cache fill task failed");
                }
                return Ok(response);
            }
            Err(e) => e,
        };

        let runtime = &self.config.runtime_cache;
        match self.storage.match_in(runtime, &key).await {
            Ok(Some(entry)) => {
                debug!(key = %key, error = %error, "Network failed, serving cached response");
                Ok(entry.response)
            }
            Ok(None) => Err(error.into()),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read runtime cache");
                Err(error.into())
            }
        }
    }

    async fn cache_first(&self, request: &Request) -> Result<Response, EngineError> {
        let key = request.key();

        for name in self.config.lookup_order() {
            match self.storage.match_in(name, &key).await {
                Ok(Some(entry)) => {
                    debug!(key = %key, cache = %name, "Cache hit");
                    return Ok(entry.response);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, cache = %name, error = %e, "Cache lookup failed, treating as miss");
                }
            }
        }

        debug!(key = %key, "Cache miss");
        let response = self.fetcher.fetch(request).await?;
        if response.ok() {
            let fill = self.spawn_fill(key, response.clone());
            self.track(fill).await;
        }
        Ok(response)
    }

    /// Write `response` into the runtime namespace on its own task.
    /// Failures are logged and never reach the caller.
    fn spawn_fill(&self, key: RequestKey, response: Response) -> JoinHandle<()> {
        let storage = Arc::clone(&self.storage);
        let name = self.config.runtime_cache.clone();
        tokio::spawn(async move {
            let label = key.to_string();
            match storage.put(&name, CachedEntry::new(key, response)).await {
                Ok(()) => debug!(key = %label, cache = %name, "Runtime cache filled"),
                Err(e) => warn!(key = %label, cache = %name, error = %e, "Failed to fill runtime cache"),
            }
        })
    }

    async fn track(&self, fill: JoinHandle<()>) {
        let mut pending = self.pending_fills.lock().await;
        pending.retain(|h| !h.is_finished());
        pending.push(fill);
    }

    /// Wait for every background runtime fill started so far.
    /// Returns how many were still tracked.
    pub async fn settle(&self) -> usize {
        let handles = std::mem::take(&mut *self.pending_fills.lock().await);
        let count = handles.len();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Runtime cache fill task failed");
            }
        }
        count
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryStorage, StorageError, StorageResult};
    use crate::network::FetchError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use url::Url;

    const ORIGIN: &str = "https://budget.test";

    #[derive(Default)]
    struct ScriptedFetcher {
        routes: std::sync::Mutex<HashMap<String, Response>>,
        offline: AtomicBool,
        /// Suffix each body with the call number, so responses differ.
        numbered: AtomicBool,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn serve(&self, path: &str, status: u16, body: &str) {
            let url = Url::parse(ORIGIN).unwrap().join(path).unwrap();
            self.routes
                .lock()
                .unwrap()
                .insert(url.to_string(), Response::new(url.as_str(), status, body));
        }

        fn serve_url(&self, url: &str, body: &str) {
            self.routes
                .lock()
                .unwrap()
                .insert(url.to_string(), Response::new(url, 200, body));
        }

        fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetch for ScriptedFetcher {
        async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.offline.load(Ordering::SeqCst) {
                return Err(FetchError::network("offline"));
            }
            let mut response = self
                .routes
                .lock()
                .unwrap()
                .get(request.url.as_str())
                .cloned()
                .ok_or_else(|| FetchError::network(format!("no route to {}", request.url)))?;
            if self.numbered.load(Ordering::SeqCst) {
                response.body.extend_from_slice(format!(" #{}", call).as_bytes());
            }
            Ok(response)
        }
    }

    /// Memory storage that counts every call and can refuse or hold writes.
    #[derive(Default)]
    struct CountingStorage {
        inner: MemoryStorage,
        ops: AtomicUsize,
        fail_writes: AtomicBool,
        /// While set, `put` parks until `release` is notified.
        hold_writes: AtomicBool,
        release: Notify,
        /// Body of the most recent `put` to land.
        last_put: std::sync::Mutex<Option<String>>,
        puts: AtomicUsize,
    }

    impl CountingStorage {
        fn ops(&self) -> usize {
            self.ops.load(Ordering::SeqCst)
        }

        fn tick(&self) {
            self.ops.fetch_add(1, Ordering::SeqCst);
        }

        fn check_write(&self) -> StorageResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                Err(StorageError::Backend("quota exceeded".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CacheStorage for CountingStorage {
        async fn open(&self, name: &str) -> StorageResult<()> {
            self.tick();
            self.inner.open(name).await
        }
        async fn has(&self, name: &str) -> StorageResult<bool> {
            self.tick();
            self.inner.has(name).await
        }
        async fn keys(&self) -> StorageResult<Vec<String>> {
            self.tick();
            self.inner.keys().await
        }
        async fn delete(&self, name: &str) -> StorageResult<bool> {
            self.tick();
            self.inner.delete(name).await
        }
        async fn match_in(&self, name: &str, key: &RequestKey) -> StorageResult<Option<CachedEntry>> {
            self.tick();
            self.inner.match_in(name, key).await
        }
        async fn put(&self, name: &str, entry: CachedEntry) -> StorageResult<()> {
            self.tick();
            if self.hold_writes.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            self.check_write()?;
            let body = entry.response.text();
            self.inner.put(name, entry).await?;
            *self.last_put.lock().unwrap() = Some(body);
            self.puts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn put_all(&self, name: &str, entries: Vec<CachedEntry>) -> StorageResult<()> {
            self.tick();
            self.check_write()?;
            self.inner.put_all(name, entries).await
        }
        async fn replace_all(&self, name: &str, entries: Vec<CachedEntry>) -> StorageResult<()> {
            self.tick();
            self.check_write()?;
            self.inner.replace_all(name, entries).await
        }
        async fn entries(&self, name: &str) -> StorageResult<Vec<CachedEntry>> {
            self.tick();
            self.inner.entries(name).await
        }
    }

    #[derive(Default)]
    struct RecordingHost {
        skipped_waiting: AtomicBool,
        claimed: AtomicBool,
    }

    impl LifecycleHost for RecordingHost {
        fn skip_waiting(&self) {
            self.skipped_waiting.store(true, Ordering::SeqCst);
        }
        fn claim_clients(&self) {
            self.claimed.store(true, Ordering::SeqCst);
        }
    }

    struct Harness {
        engine: CachePolicyEngine,
        fetcher: Arc<ScriptedFetcher>,
        storage: Arc<CountingStorage>,
        host: Arc<RecordingHost>,
    }

    fn harness_with(config: EngineConfig) -> Harness {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let storage = Arc::new(CountingStorage::default());
        let host = Arc::new(RecordingHost::default());
        let engine = CachePolicyEngine::with_host(
            config,
            storage.clone(),
            fetcher.clone(),
            host.clone(),
        );
        Harness {
            engine,
            fetcher,
            storage,
            host,
        }
    }

    fn harness() -> Harness {
        harness_with(
            EngineConfig::new(Url::parse(ORIGIN).unwrap()).with_manifest(["/", "/index.html"]),
        )
    }

    fn get(path: &str) -> Request {
        Request::get(Url::parse(ORIGIN).unwrap().join(path).unwrap())
    }

    fn manifest(h: &Harness) -> Vec<String> {
        h.engine.config().manifest.clone()
    }

    #[test]
    fn test_route_decisions() {
        let h = harness();
        assert_eq!(h.engine.route(&get("/")), Route::CacheFirst);
        assert_eq!(h.engine.route(&get("/api/transaction")), Route::NetworkFirst);
        assert_eq!(
            h.engine.route(&Request::new(Method::Post, get("/api/transaction").url)),
            Route::Bypass
        );
        assert_eq!(
            h.engine.route(&Request::get(Url::parse("https://cdn.test/api/x").unwrap())),
            Route::Bypass
        );
    }

    #[tokio::test]
    async fn test_bypass_never_touches_storage() {
        let h = harness();
        h.fetcher.serve("/api/transaction", 201, "{\"id\":7}");
        h.fetcher.serve_url("https://cdn.test/chart.js", "chart");

        let post = Request::new(Method::Post, get("/api/transaction").url).with_body("{}");
        let resp = h.engine.route_request(&post).await.unwrap();
        assert_eq!(resp.status, 201);

        let cross = Request::get(Url::parse("https://cdn.test/chart.js").unwrap());
        assert_eq!(h.engine.route_request(&cross).await.unwrap().text(), "chart");

        h.fetcher.set_offline(true);
        let err = h.engine.route_request(&post).await.unwrap_err();
        assert!(err.is_network());

        assert_eq!(h.storage.ops(), 0);
        assert_eq!(h.fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_install_caches_manifest_and_skips_waiting() {
        let h = harness();
        h.fetcher.serve("/", 200, "<html>root</html>");
        h.fetcher.serve("/index.html", 200, "<html>index</html>");

        h.engine.install(&manifest(&h)).await.unwrap();

        let entries = h.storage.entries("static-cache-v1").await.unwrap();
        let urls: Vec<_> = entries.iter().map(|e| e.key.url.as_str()).collect();
        assert_eq!(urls, vec!["https://budget.test/", "https://budget.test/index.html"]);
        assert!(h.host.skipped_waiting.load(Ordering::SeqCst));
        assert!(!h.storage.has("runtime-cache").await.unwrap());
    }

    #[tokio::test]
    async fn test_install_twice_is_idempotent() {
        let h = harness();
        h.fetcher.serve("/", 200, "root");
        h.fetcher.serve("/index.html", 200, "index");

        h.engine.install(&manifest(&h)).await.unwrap();
        let first: Vec<_> = h
            .storage
            .entries("static-cache-v1")
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.key, e.response))
            .collect();

        h.engine.install(&manifest(&h)).await.unwrap();
        let second: Vec<_> = h
            .storage
            .entries("static-cache-v1")
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.key, e.response))
            .collect();

        assert_eq!(first, second);
        assert_eq!(h.storage.keys().await.unwrap(), vec!["static-cache-v1"]);
    }

    #[tokio::test]
    async fn test_reinstall_drops_assets_missing_from_new_manifest() {
        let h = harness();
        h.fetcher.serve("/", 200, "root");
        h.fetcher.serve("/old.js", 200, "old");
        h.fetcher.serve("/new.js", 200, "new");

        h.engine.install(&["/".to_string(), "/old.js".to_string()]).await.unwrap();
        h.engine.install(&["/".to_string(), "/new.js".to_string()]).await.unwrap();

        let entries = h.storage.entries("static-cache-v1").await.unwrap();
        let urls: Vec<_> = entries.iter().map(|e| e.key.url.as_str()).collect();
        assert_eq!(urls, vec!["https://budget.test/", "https://budget.test/new.js"]);

        h.fetcher.set_offline(true);
        assert!(h.engine.route_request(&get("/old.js")).await.unwrap_err().is_network());
    }

    #[tokio::test]
    async fn test_install_storage_failure_leaves_no_namespace() {
        let h = harness();
        h.fetcher.serve("/", 200, "root");
        h.fetcher.serve("/index.html", 200, "index");
        h.storage.fail_writes.store(true, Ordering::SeqCst);

        let err = h.engine.install(&manifest(&h)).await.unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
        assert!(h.storage.keys().await.unwrap().is_empty());
        assert!(!h.host.skipped_waiting.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_install_failure_commits_nothing() {
        let h = harness();
        h.fetcher.serve("/", 200, "root");
        // /index.html unreachable

        let err = h.engine.install(&manifest(&h)).await.unwrap_err();
        match err {
            EngineError::Install { url, .. } => assert_eq!(url, "https://budget.test/index.html"),
            other => panic!("expected install error, got {other:?}"),
        }
        assert!(h.storage.keys().await.unwrap().is_empty());
        assert!(!h.host.skipped_waiting.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_install_rejects_error_status() {
        let h = harness();
        h.fetcher.serve("/", 200, "root");
        h.fetcher.serve("/index.html", 404, "not found");

        let err = h.engine.install(&manifest(&h)).await.unwrap_err();
        assert!(err.to_string().contains("status 404"));
        assert!(h.storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_rejects_empty_manifest() {
        let h = harness();
        let err = h.engine.install(&[]).await.unwrap_err();
        assert!(matches!(err, EngineError::EmptyManifest));
        assert_eq!(h.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_activate_deletes_exactly_stale_caches() {
        let h = harness_with(
            EngineConfig::new(Url::parse(ORIGIN).unwrap())
                .with_static_cache("static-v1")
                .with_runtime_cache("runtime"),
        );
        for name in ["static-v1", "runtime", "static-v0"] {
            h.storage.open(name).await.unwrap();
        }

        let deleted = h.engine.activate().await.unwrap();

        assert_eq!(deleted, vec!["static-v0"]);
        assert_eq!(h.storage.keys().await.unwrap(), vec!["static-v1", "runtime"]);
        assert!(h.host.claimed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_activate_with_explicit_version_set() {
        let h = harness();
        for name in ["static-cache-v1", "runtime-cache", "legacy"] {
            h.storage.open(name).await.unwrap();
        }
        let current: BTreeSet<String> = ["legacy".to_string()].into_iter().collect();

        let mut deleted = h.engine.activate_with(&current).await.unwrap();
        deleted.sort();

        assert_eq!(deleted, vec!["runtime-cache", "static-cache-v1"]);
        assert_eq!(h.storage.keys().await.unwrap(), vec!["legacy"]);
    }

    #[tokio::test]
    async fn test_api_online_returns_live_and_stores_copy() {
        let h = harness();
        h.fetcher.serve("/api/transactions", 200, "{\"id\":1}");
        let request = get("/api/transactions");

        let live = h.engine.route_request(&request).await.unwrap();
        assert_eq!(live.text(), "{\"id\":1}");

        let stored = h
            .storage
            .match_in("runtime-cache", &request.key())
            .await
            .unwrap()
            .expect("runtime entry");
        assert_eq!(stored.response, live);
    }

    #[tokio::test]
    async fn test_api_offline_falls_back_to_runtime() {
        let h = harness();
        h.fetcher.serve("/api/transactions", 200, "{\"id\":1}");
        let request = get("/api/transactions");
        h.engine.route_request(&request).await.unwrap();

        h.fetcher.set_offline(true);
        let cached = h.engine.route_request(&request).await.unwrap();
        assert_eq!(cached.text(), "{\"id\":1}");
        assert_eq!(h.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_api_offline_without_entry_is_network_error() {
        let h = harness();
        h.fetcher.set_offline(true);

        let err = h.engine.route_request(&get("/api/transactions")).await.unwrap_err();
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn test_api_fallback_ignores_static_cache() {
        let h = harness();
        let request = get("/api/transactions");
        h.storage
            .put(
                "static-cache-v1",
                CachedEntry::new(request.key(), Response::new(request.url.as_str(), 200, "stale")),
            )
            .await
            .unwrap();
        h.fetcher.set_offline(true);

        assert!(h.engine.route_request(&request).await.unwrap_err().is_network());
    }

    #[tokio::test]
    async fn test_api_error_status_returned_and_stored() {
        let h = harness();
        h.fetcher.serve("/api/transactions", 200, "{\"id\":1}");
        let request = get("/api/transactions");
        h.engine.route_request(&request).await.unwrap();

        // An HTTP error is still a network success.
        h.fetcher.serve("/api/transactions", 500, "boom");
        let resp = h.engine.route_request(&request).await.unwrap();
        assert_eq!(resp.status, 500);

        let stored = h
            .storage
            .match_in("runtime-cache", &request.key())
            .await
            .unwrap()
            .expect("runtime entry");
        assert_eq!(stored.response, resp);
    }

    #[tokio::test]
    async fn test_api_write_completes_after_caller_dropped() {
        let h = harness();
        h.fetcher.serve("/api/transactions", 200, "[1,2]");
        h.storage.hold_writes.store(true, Ordering::SeqCst);
        let request = get("/api/transactions");

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), h.engine.route_request(&request)).await;
        assert!(abandoned.is_err());
        assert!(h.storage.entries("runtime-cache").await.unwrap().is_empty());

        h.storage.release.notify_one();
        let mut stored = None;
        for _ in 0..100 {
            stored = h.storage.match_in("runtime-cache", &request.key()).await.unwrap();
            if stored.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stored.expect("runtime entry").response.text(), "[1,2]");
    }

    #[tokio::test]
    async fn test_api_fill_failure_does_not_fail_request() {
        let h = harness();
        h.fetcher.serve("/api/transactions", 200, "[]");
        h.storage.fail_writes.store(true, Ordering::SeqCst);

        let resp = h.engine.route_request(&get("/api/transactions")).await.unwrap();
        assert_eq!(resp.text(), "[]");
        assert!(h.storage.entries("runtime-cache").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let h = harness();
        h.fetcher.serve("/", 200, "root");
        h.fetcher.serve("/index.html", 200, "index");
        h.engine.install(&manifest(&h)).await.unwrap();
        let calls_after_install = h.fetcher.calls();

        h.fetcher.set_offline(true);
        let resp = h.engine.route_request(&get("/")).await.unwrap();

        assert_eq!(resp.text(), "root");
        assert_eq!(h.fetcher.calls(), calls_after_install);
    }

    #[tokio::test]
    async fn test_cache_miss_fetches_once_and_fills_runtime() {
        let h = harness();
        h.fetcher.serve("/favicon.ico", 200, "ico");
        let request = get("/favicon.ico");

        let resp = h.engine.route_request(&request).await.unwrap();
        assert_eq!(resp.text(), "ico");
        assert_eq!(h.fetcher.calls(), 1);

        h.engine.settle().await;
        let stored = h.storage.match_in("runtime-cache", &request.key()).await.unwrap();
        assert_eq!(stored.unwrap().response, resp);

        h.fetcher.set_offline(true);
        assert_eq!(h.engine.route_request(&request).await.unwrap().text(), "ico");
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_miss_error_status_not_filled() {
        let h = harness();
        h.fetcher.serve("/missing.png", 404, "nope");

        let resp = h.engine.route_request(&get("/missing.png")).await.unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(h.engine.settle().await, 0);
        assert!(!h.storage.has("runtime-cache").await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_miss_offline_is_network_error() {
        let h = harness();
        h.fetcher.set_offline(true);

        let err = h.engine.route_request(&get("/styles.css")).await.unwrap_err();
        assert!(err.is_network());
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_static_takes_precedence_over_runtime() {
        let h = harness();
        let request = get("/index.js");
        for (cache, body) in [("runtime-cache", "runtime"), ("static-cache-v1", "static")] {
            h.storage
                .put(
                    cache,
                    CachedEntry::new(request.key(), Response::new(request.url.as_str(), 200, body)),
                )
                .await
                .unwrap();
        }

        assert_eq!(h.engine.route_request(&request).await.unwrap().text(), "static");
    }

    #[tokio::test]
    async fn test_concurrent_misses_keep_last_fill() {
        let h = harness();
        h.fetcher.serve("/logo.png", 200, "logo");
        h.fetcher.numbered.store(true, Ordering::SeqCst);
        let request = get("/logo.png");

        let (a, b) = tokio::join!(
            h.engine.route_request(&request),
            h.engine.route_request(&request)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a, b);
        assert_eq!(h.fetcher.calls(), 2);

        assert_eq!(h.engine.settle().await, 2);
        assert_eq!(h.storage.puts.load(Ordering::SeqCst), 2);

        let entries = h.storage.entries("runtime-cache").await.unwrap();
        assert_eq!(entries.len(), 1);
        let last = h.storage.last_put.lock().unwrap().clone();
        assert_eq!(Some(entries[0].response.text()), last);
        assert!([a.text(), b.text()].contains(&entries[0].response.text()));
    }

    #[tokio::test]
    async fn test_background_fill_failure_is_contained() {
        let h = harness();
        h.fetcher.serve("/about.html", 200, "about");
        h.storage.fail_writes.store(true, Ordering::SeqCst);

        let resp = h.engine.route_request(&get("/about.html")).await.unwrap();
        assert_eq!(resp.text(), "about");
        assert_eq!(h.engine.settle().await, 1);
        assert!(h.storage.entries("runtime-cache").await.unwrap().is_empty());
    }
}
