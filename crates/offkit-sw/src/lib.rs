//! # OffKit Service Worker
//!
//! Offline request interception for a web client application.
//!
//! ## Features
//!
//! - **Versioned caches**: one precache per deployed version plus a shared
//!   runtime cache
//! - **Classification**: ordered rules tag every request with a resource class
//! - **Routing**: bypass, network-first or cache-first per class, with an
//!   offline page or synthesized 503 as the last resort
//! - **Lifecycle**: all-or-nothing install, best-effort activation cleanup
//! - **Control channel**: `SKIP_WAITING` / `CLEAR_CACHE` messages, push
//!   notifications, background sync hook
//!
//! ## Architecture
//!
//! ```text
//! Registration
//!     ├── installing / waiting / active (WorkerVersion)
//!     │       ├── Classifier   Request → ResourceClass
//!     │       └── Router       ResourceClass → Strategy → Response
//!     ├── Clients
//!     └── event channel → ServiceWorkerEvent
//!
//! CacheStorage
//!     └── CacheStore (MemoryStore | DiskStore)
//!             └── cache name → RequestKey → CacheEntry
//! ```

pub mod cache_name;
pub mod classify;
pub mod clients;
pub mod config;
pub mod control;
pub mod error;
pub mod lifecycle;
pub mod manifest;
pub mod policy;
pub mod registration;
pub mod store;

pub use cache_name::{CacheName, CacheNames};
pub use classify::{Classifier, HostPattern, ResourceClass, Rule};
pub use clients::{Client, ClientType, Clients};
pub use config::{NotificationConfig, SwConfig};
pub use control::{BackgroundSync, ControlMessage, NoopSync, Notification, NotificationData};
pub use error::{SwError, SwResult};
pub use lifecycle::{EvictionReport, WorkerId, WorkerState, WorkerVersion};
pub use manifest::StaticManifest;
pub use policy::{offline_response, FetchOutcome, Populate, Router, Strategy, OFFLINE_MESSAGE};
pub use registration::{Registration, ServiceWorkerEvent};
pub use store::{
    CacheEntry, CacheHandle, CacheStorage, CacheStore, DiskStore, MemoryStore, RequestKey,
};
