//! Registration: the installing/waiting/active slots and everything that
//! moves a version between them.

use std::sync::Arc;

use offkit_net::{Request, Transport};
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::{Client, Clients};
use crate::config::SwConfig;
use crate::control::{BackgroundSync, ControlMessage, Notification, NoopSync};
use crate::error::{SwError, SwResult};
use crate::lifecycle::{WorkerId, WorkerState, WorkerVersion};
use crate::policy::FetchOutcome;
use crate::store::CacheStorage;

/// Events emitted to the embedding application.
#[derive(Debug, Clone)]
pub enum ServiceWorkerEvent {
    /// A version changed state.
    StateChange {
        worker_id: WorkerId,
        version: String,
        new_state: WorkerState,
    },
    /// A new version started installing.
    UpdateFound { version: String },
    /// A client is now controlled by a different version.
    ControllerChange {
        client_id: String,
        worker_id: WorkerId,
    },
    /// Display a notification for a push.
    ShowNotification(Notification),
    /// A window was opened in response to a notification click.
    OpenWindow { client_id: String, url: Url },
    /// Caches deleted on request.
    CachesCleared { deleted: Vec<String> },
}

#[derive(Default)]
struct Slots {
    installing: Option<Arc<WorkerVersion>>,
    waiting: Option<Arc<WorkerVersion>>,
    active: Option<Arc<WorkerVersion>>,
}

/// The single registration of the offline layer.
pub struct Registration {
    caches: CacheStorage,
    transport: Arc<dyn Transport>,
    slots: RwLock<Slots>,
    /// Serializes install, activation and restore.
    lifecycle: Mutex<()>,
    clients: RwLock<Clients>,
    sync: Arc<dyn BackgroundSync>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl Registration {
    /// Create an empty registration.
    pub fn new(
        caches: CacheStorage,
        transport: Arc<dyn Transport>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                caches,
                transport,
                slots: RwLock::new(Slots::default()),
                lifecycle: Mutex::new(()),
                clients: RwLock::new(Clients::new()),
                sync: Arc::new(NoopSync),
                event_tx,
            },
            event_rx,
        )
    }

    /// Replace the background sync hook.
    pub fn with_sync(mut self, sync: Arc<dyn BackgroundSync>) -> Self {
        self.sync = sync;
        self
    }

    pub fn caches(&self) -> &CacheStorage {
        &self.caches
    }

    pub async fn active(&self) -> Option<Arc<WorkerVersion>> {
        self.slots.read().await.active.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<WorkerVersion>> {
        self.slots.read().await.waiting.clone()
    }

    pub async fn installing(&self) -> Option<Arc<WorkerVersion>> {
        self.slots.read().await.installing.clone()
    }

    pub async fn clients(&self) -> RwLockReadGuard<'_, Clients> {
        self.clients.read().await
    }

    // ==================== Lifecycle ====================

    /// Install a new version.
    ///
    /// On success the version is waiting, or active if `skip_waiting` is set
    /// or nothing was active yet. On failure the version is redundant and the
    /// previously active version keeps serving.
    pub async fn register(&self, config: SwConfig) -> SwResult<Arc<WorkerVersion>> {
        let _guard = self.lifecycle.lock().await;

        let worker = Arc::new(WorkerVersion::new(
            config,
            self.caches.clone(),
            Arc::clone(&self.transport),
        )?);
        self.emit(ServiceWorkerEvent::UpdateFound {
            version: worker.version().to_string(),
        });

        self.slots.write().await.installing = Some(Arc::clone(&worker));
        self.transition(&worker, WorkerState::Installing).await;

        if let Err(e) = worker.install().await {
            self.slots.write().await.installing = None;
            self.transition(&worker, WorkerState::Redundant).await;
            warn!(worker = %worker.id, version = worker.version(), error = %e, "Install failed");
            return Err(e);
        }

        let replaced = {
            let mut slots = self.slots.write().await;
            slots.installing = None;
            slots.waiting.replace(Arc::clone(&worker))
        };
        if let Some(old) = replaced {
            self.transition(&old, WorkerState::Redundant).await;
        }
        self.transition(&worker, WorkerState::Waiting).await;

        let nothing_active = self.slots.read().await.active.is_none();
        if worker.config().skip_waiting || nothing_active {
            self.promote().await;
        }

        Ok(worker)
    }

    /// Activate the waiting version now. Returns it, or `None` if nothing was waiting.
    pub async fn skip_waiting(&self) -> Option<Arc<WorkerVersion>> {
        let _guard = self.lifecycle.lock().await;
        self.promote().await
    }

    /// Reinstate a version whose precache already exists, without refetching.
    ///
    /// Does nothing if a version is already active or the precache is missing.
    pub async fn restore(&self, config: SwConfig) -> SwResult<Option<Arc<WorkerVersion>>> {
        let _guard = self.lifecycle.lock().await;

        if self.slots.read().await.active.is_some() {
            return Ok(None);
        }

        let worker = Arc::new(WorkerVersion::new(
            config,
            self.caches.clone(),
            Arc::clone(&self.transport),
        )?);
        if !self.caches.has(worker.names().precache_name()).await? {
            debug!(cache = worker.names().precache_name(), "No precache to restore");
            return Ok(None);
        }

        self.slots.write().await.active = Some(Arc::clone(&worker));
        self.transition(&worker, WorkerState::Active).await;
        self.claim(&worker).await;
        info!(worker = %worker.id, version = worker.version(), "Restored from existing precache");

        Ok(Some(worker))
    }

    /// Waiting → active. Caller holds the lifecycle lock.
    async fn promote(&self) -> Option<Arc<WorkerVersion>> {
        let next = self.slots.write().await.waiting.take()?;

        let report = next.evict_stale().await;
        debug!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Activation cleanup finished"
        );

        let previous = self.slots.write().await.active.replace(Arc::clone(&next));
        if let Some(previous) = previous {
            self.transition(&previous, WorkerState::Superseded).await;
        }
        self.transition(&next, WorkerState::Active).await;
        self.claim(&next).await;

        info!(worker = %next.id, version = next.version(), "Activated");
        Some(next)
    }

    async fn claim(&self, worker: &WorkerVersion) {
        let claimed = self.clients.write().await.claim(worker.id);
        for client_id in claimed {
            self.emit(ServiceWorkerEvent::ControllerChange {
                client_id,
                worker_id: worker.id,
            });
        }
    }

    async fn transition(&self, worker: &WorkerVersion, state: WorkerState) {
        worker.set_state(state).await;
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id: worker.id,
            version: worker.version().to_string(),
            new_state: state,
        });
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }

    // ==================== Requests ====================

    /// Intercept a request. Without an active version nothing is intercepted.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        match self.active().await {
            Some(worker) => worker.handle_fetch(request).await,
            None => FetchOutcome::Passthrough,
        }
    }

    /// Wait for every outstanding cache write, including writes started by
    /// versions that have since been replaced.
    pub async fn settle(&self) {
        self.caches.settle().await;
    }

    // ==================== Clients ====================

    /// Add a window client. It is controlled by the active version, if any.
    pub async fn add_client(&self, url: Url) -> String {
        let mut client = Client::window(url);
        client.controller = self.active().await.map(|w| w.id);
        let id = client.id.clone();
        self.clients.write().await.add(client);
        id
    }

    /// Remove a client. When the last one goes, a waiting version takes over.
    pub async fn release_client(&self, id: &str) -> Option<Client> {
        let _guard = self.lifecycle.lock().await;

        let (removed, now_empty) = {
            let mut clients = self.clients.write().await;
            let removed = clients.remove(id);
            (removed, clients.is_empty())
        };

        if removed.is_some() && now_empty && self.slots.read().await.waiting.is_some() {
            self.promote().await;
        }
        removed
    }

    // ==================== Control ====================

    /// Handle a message from the client application.
    ///
    /// Returns the decoded message, or `None` if it was ignored.
    pub async fn post_message(&self, message: &JsonValue) -> Option<ControlMessage> {
        let Some(parsed) = ControlMessage::parse(message) else {
            debug!(%message, "Ignoring unrecognized message");
            return None;
        };

        match parsed {
            ControlMessage::SkipWaiting => {
                if self.skip_waiting().await.is_none() {
                    debug!("SKIP_WAITING with no waiting version");
                }
            }
            ControlMessage::ClearCache => {
                self.clear_all_caches().await;
            }
        }
        Some(parsed)
    }

    /// Delete every cache, current ones included. Best-effort.
    pub async fn clear_all_caches(&self) -> Vec<String> {
        let names = match self.caches.keys().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Could not list caches");
                return Vec::new();
            }
        };

        let mut deleted = Vec::with_capacity(names.len());
        for name in names {
            match self.caches.delete(&name).await {
                Ok(_) => deleted.push(name),
                Err(e) => warn!(cache = %name, error = %e, "Could not delete cache"),
            }
        }

        info!(count = deleted.len(), "All caches cleared");
        self.emit(ServiceWorkerEvent::CachesCleared {
            deleted: deleted.clone(),
        });
        deleted
    }

    /// Render and emit a notification for a push.
    pub async fn push(&self, payload: Option<&str>) -> Notification {
        let config = self.current_config().await;
        let notification = Notification::render(&config.notification, payload);
        self.emit(ServiceWorkerEvent::ShowNotification(notification.clone()));
        notification
    }

    /// Focus the app root window, opening one if none is showing it.
    pub async fn notification_click(&self) -> SwResult<Client> {
        let root = self
            .current_config()
            .await
            .origin_url()?
            .join("/")
            .map_err(|e| SwError::config(e.to_string()))?;
        let controller = self.active().await.map(|w| w.id);

        let mut clients = self.clients.write().await;
        if let Some(id) = clients.find_window(&root).map(|c| c.id.clone()) {
            clients.focus(&id)?;
            return clients
                .get(&id)
                .cloned()
                .ok_or_else(|| SwError::state(format!("client {id} vanished")));
        }

        let mut client = clients.open_window(root.clone());
        client.controller = controller;
        clients.add(client.clone());
        drop(clients);

        self.emit(ServiceWorkerEvent::OpenWindow {
            client_id: client.id.clone(),
            url: root,
        });
        Ok(client)
    }

    /// Run the sync hook for a registered tag. Returns whether it ran.
    pub async fn sync(&self, tag: &str) -> SwResult<bool> {
        let registered = match self.active().await {
            Some(worker) => worker.config().sync_tags.iter().any(|t| t == tag),
            None => false,
        };
        if !registered {
            debug!(tag, "Ignoring sync for unregistered tag");
            return Ok(false);
        }

        self.sync.sync(tag).await?;
        Ok(true)
    }

    async fn current_config(&self) -> SwConfig {
        let slots = self.slots.read().await;
        slots
            .active
            .as_ref()
            .or(slots.waiting.as_ref())
            .map(|w| w.config().clone())
            .unwrap_or_default()
    }
}
