//! Worker versions and their lifecycle.
//!
//! ```text
//! Uninstalled ──install──→ Installing ──ok──→ Waiting ──activate──→ Active ──newer active──→ Superseded
//!                               │
//!                               └──any manifest fetch fails──→ Redundant
//! ```
//!
//! Install is all-or-nothing: nothing is written under the new precache name
//! unless every manifest resource was fetched. Activation cleanup is
//! best-effort: a stale cache that cannot be deleted is logged and skipped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use offkit_net::{Request, RequestMode, Response, Transport};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache_name::CacheNames;
use crate::classify::Classifier;
use crate::config::SwConfig;
use crate::error::{SwError, SwResult};
use crate::policy::{FetchOutcome, Router};
use crate::store::CacheStorage;

/// Unique identifier for a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Worker version state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    /// Created, install not started.
    #[default]
    Uninstalled,
    /// Precaching the static manifest.
    Installing,
    /// Installed, not yet controlling clients.
    Waiting,
    /// Serving intercepted requests.
    Active,
    /// Replaced by a newer active version.
    Superseded,
    /// Install failed; this version never serves.
    Redundant,
}

impl WorkerState {
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, WorkerState::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Uninstalled => "uninstalled",
            WorkerState::Installing => "installing",
            WorkerState::Waiting => "waiting",
            WorkerState::Active => "active",
            WorkerState::Superseded => "superseded",
            WorkerState::Redundant => "redundant",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What activation cleanup did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub deleted: Vec<String>,
    /// Stale names that could not be deleted, with the reason.
    pub failed: Vec<(String, String)>,
}

/// One deployed build of the worker.
pub struct WorkerVersion {
    pub id: WorkerId,
    config: SwConfig,
    origin: Url,
    names: CacheNames,
    classifier: Arc<Classifier>,
    router: Router,
    caches: CacheStorage,
    transport: Arc<dyn Transport>,
    state: RwLock<WorkerState>,
}

impl fmt::Debug for WorkerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerVersion")
            .field("id", &self.id)
            .field("version", &self.config.version)
            .field("precache", &self.names.precache_name())
            .finish_non_exhaustive()
    }
}

impl WorkerVersion {
    /// Create a version from a validated configuration.
    pub fn new(
        config: SwConfig,
        caches: CacheStorage,
        transport: Arc<dyn Transport>,
    ) -> SwResult<Self> {
        config.validate()?;
        let origin = config.origin_url()?;
        let classifier = Arc::new(Classifier::from_config(&config)?);
        let router = Router::new(
            &config,
            caches.clone(),
            Arc::clone(&transport),
            Arc::clone(&classifier),
        )?;

        Ok(Self {
            id: WorkerId::new(),
            names: CacheNames::from_config(&config),
            origin,
            config,
            classifier,
            router,
            caches,
            transport,
            state: RwLock::new(WorkerState::Uninstalled),
        })
    }

    pub fn config(&self) -> &SwConfig {
        &self.config
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn names(&self) -> &CacheNames {
        &self.names
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    pub(crate) async fn set_state(&self, state: WorkerState) {
        let mut current = self.state.write().await;
        debug!(worker = %self.id, from = %*current, to = %state, "Worker state change");
        *current = state;
    }

    /// Precache every manifest resource. Returns the number of entries written.
    ///
    /// Any fetch failure or non-OK status fails the whole install. Entries are
    /// written to a staging cache that replaces the precache only once every
    /// write succeeded, so a failed install leaves any existing precache as it
    /// was.
    pub async fn install(&self) -> SwResult<usize> {
        let precache = self.names.precache_name();
        info!(worker = %self.id, cache = precache, "Installing");

        let urls = self.classifier.manifest().urls(&self.origin)?;
        let fetched = try_join_all(urls.into_iter().map(|url| self.fetch_manifest_entry(url))).await?;

        let staging = self.names.staging_name();
        if self.caches.delete(&staging).await? {
            debug!(cache = %staging, "Removed leftover staging cache");
        }
        let cache = self.caches.open(&staging).await?;
        for (request, response) in &fetched {
            if let Err(e) = cache.put(request, response).await {
                if let Err(cleanup) = self.caches.delete(&staging).await {
                    warn!(cache = %staging, error = %cleanup, "Could not remove staging cache");
                }
                return Err(e);
            }
        }
        self.caches.rename(&staging, precache).await?;

        info!(worker = %self.id, cache = precache, entries = fetched.len(), "Static assets cached");
        Ok(fetched.len())
    }

    async fn fetch_manifest_entry(&self, url: Url) -> SwResult<(Request, Response)> {
        let request = Request::get(url).mode(RequestMode::SameOrigin);
        let response = self
            .transport
            .fetch(&request)
            .await
            .map_err(|e| SwError::InstallFailed {
                url: request.url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.ok() {
            return Err(SwError::InstallFailed {
                url: request.url.to_string(),
                reason: format!("status {}", response.status),
            });
        }

        Ok((request, response))
    }

    /// Delete every cache that is not this version's precache or the runtime cache.
    pub async fn evict_stale(&self) -> EvictionReport {
        let mut report = EvictionReport::default();

        let names = match self.caches.keys().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Could not list caches; skipping cleanup");
                return report;
            }
        };

        for name in names.into_iter().filter(|n| !self.names.is_current(n)) {
            match self.caches.delete(&name).await {
                Ok(_) => {
                    info!(cache = %name, "Deleting old cache");
                    report.deleted.push(name);
                }
                Err(e) => {
                    warn!(cache = %name, error = %e, "Could not delete old cache");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        report
    }

    /// Serve an intercepted request.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        self.router.handle(request).await
    }

    /// Wait for outstanding runtime-cache writes, including those started by
    /// other versions sharing the same storage.
    pub async fn settle(&self) {
        self.router.settle().await;
    }
}
