//! Host-side lifecycle for the cache policy engine.
//!
//! A `Worker` dispatches the `install`, `activate` and `fetch` events to its
//! engine in the order a host guarantees, and records the lifecycle signals
//! the engine sends back. Until a worker is activated its clients are
//! uncontrolled: their requests go straight to the network.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info};

use crate::cache::CacheStorage;
use crate::config::EngineConfig;
use crate::engine::{CachePolicyEngine, EngineError, LifecycleHost};
use crate::models::{Request, Response};
use crate::network::Fetch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Install failed; this worker will never control clients.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        })
    }
}

#[derive(Debug, Default)]
struct HostSignals {
    skip_waiting: AtomicBool,
    clients_claimed: AtomicBool,
}

impl LifecycleHost for HostSignals {
    fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    fn claim_clients(&self) {
        self.clients_claimed.store(true, Ordering::SeqCst);
    }
}

pub struct Worker {
    engine: CachePolicyEngine,
    fetcher: Arc<dyn Fetch>,
    signals: Arc<HostSignals>,
    state: Mutex<WorkerState>,
}

impl Worker {
    pub fn new(
        config: EngineConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetch>,
    ) -> Self {
        let signals = Arc::new(HostSignals::default());
        let engine =
            CachePolicyEngine::with_host(config, storage, Arc::clone(&fetcher), signals.clone());
        Self {
            engine,
            fetcher,
            signals,
            state: Mutex::new(WorkerState::Parsed),
        }
    }

    pub fn engine(&self) -> &CachePolicyEngine {
        &self.engine
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.lock().await
    }

    pub fn skipped_waiting(&self) -> bool {
        self.signals.skip_waiting.load(Ordering::SeqCst)
    }

    pub fn clients_claimed(&self) -> bool {
        self.signals.clients_claimed.load(Ordering::SeqCst)
    }

    /// Move from `from` to `to`, failing if the worker is elsewhere.
    async fn transition(&self, from: WorkerState, to: WorkerState) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        if *state != from {
            return Err(EngineError::Lifecycle(format!(
                "cannot move to {} while {}",
                to, *state
            )));
        }
        *state = to;
        Ok(())
    }

    async fn set_state(&self, to: WorkerState) {
        *self.state.lock().await = to;
    }

    /// Handle the `install` event with the configured manifest.
    pub async fn install(&self) -> Result<(), EngineError> {
        self.transition(WorkerState::Parsed, WorkerState::Installing)
            .await?;

        match self.engine.install(&self.engine.config().manifest).await {
            Ok(()) => {
                self.set_state(WorkerState::Installed).await;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Install failed, worker is redundant");
                self.set_state(WorkerState::Redundant).await;
                Err(e)
            }
        }
    }

    /// Handle the `activate` event. Returns the names of deleted caches.
    ///
    /// A failed activation leaves the worker installed so the event can be
    /// dispatched again; the remaining stale caches are retried then.
    pub async fn activate(&self) -> Result<Vec<String>, EngineError> {
        self.transition(WorkerState::Installed, WorkerState::Activating)
            .await?;

        match self.engine.activate().await {
            Ok(deleted) => {
                self.set_state(WorkerState::Activated).await;
                info!(deleted = deleted.len(), "Worker activated");
                Ok(deleted)
            }
            Err(e) => {
                error!(error = %e, "Activate failed");
                self.set_state(WorkerState::Installed).await;
                Err(e)
            }
        }
    }

    /// Install then activate.
    pub async fn start(&self) -> Result<Vec<String>, EngineError> {
        self.install().await?;
        self.activate().await
    }

    /// Handle the `fetch` event.
    pub async fn fetch(&self, request: &Request) -> Result<Response, EngineError> {
        if self.state().await == WorkerState::Activated {
            self.engine.route_request(request).await
        } else {
            Ok(self.fetcher.fetch(request).await?)
        }
    }

    /// Wait for background cache fills before shutting down.
    pub async fn shutdown(&self) {
        let settled = self.engine.settle().await;
        if settled > 0 {
            info!(fills = settled, "Flushed pending cache fills");
        }
    }
}
