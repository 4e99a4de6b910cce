//! Cache naming.
//!
//! Exactly two logical caches exist once a version is active: a precache whose
//! name embeds the build version, and a runtime cache whose name never changes.
//! Everything else in storage is stale.

use std::fmt;

use crate::config::SwConfig;

/// A cache name, tagged by role.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheName {
    /// Build-time assets, replaced wholesale on every deploy.
    Precache { prefix: String, version: String },
    /// Lazily populated, shared across versions.
    Runtime { prefix: String },
}

impl CacheName {
    pub fn precache(prefix: &str, version: &str) -> Self {
        let version = version.trim();
        Self::Precache {
            prefix: prefix.to_string(),
            version: version.strip_prefix('v').unwrap_or(version).to_string(),
        }
    }

    pub fn runtime(prefix: &str) -> Self {
        Self::Runtime {
            prefix: prefix.to_string(),
        }
    }

    pub fn is_precache(&self) -> bool {
        matches!(self, CacheName::Precache { .. })
    }

    /// The version token, for precaches.
    pub fn version(&self) -> Option<&str> {
        match self {
            CacheName::Precache { version, .. } => Some(version),
            CacheName::Runtime { .. } => None,
        }
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheName::Precache { prefix, version } if prefix.is_empty() => {
                write!(f, "v{version}")
            }
            CacheName::Precache { prefix, version } => write!(f, "{prefix}-v{version}"),
            CacheName::Runtime { prefix } if prefix.is_empty() => f.write_str("runtime"),
            CacheName::Runtime { prefix } => write!(f, "{prefix}-runtime"),
        }
    }
}

/// The live pair of cache names for one worker version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
    precache: CacheName,
    runtime: CacheName,
    // Rendered once; these are compared against storage listings a lot.
    precache_str: String,
    runtime_str: String,
}

impl CacheNames {
    pub fn new(prefix: &str, version: &str) -> Self {
        let precache = CacheName::precache(prefix, version);
        let runtime = CacheName::runtime(prefix);
        Self {
            precache_str: precache.to_string(),
            runtime_str: runtime.to_string(),
            precache,
            runtime,
        }
    }

    pub fn from_config(config: &SwConfig) -> Self {
        Self::new(&config.cache_prefix, &config.version)
    }

    pub fn precache(&self) -> &CacheName {
        &self.precache
    }

    pub fn runtime(&self) -> &CacheName {
        &self.runtime
    }

    pub fn precache_name(&self) -> &str {
        &self.precache_str
    }

    pub fn runtime_name(&self) -> &str {
        &self.runtime_str
    }

    /// Lookup order for cache matches: precache first, then runtime.
    pub fn search_order(&self) -> [&str; 2] {
        [&self.precache_str, &self.runtime_str]
    }

    /// Order for the offline document fallback: the runtime copy is the most
    /// recent capture, so it wins over the install-time precache copy.
    pub fn document_order(&self) -> [&str; 2] {
        [&self.runtime_str, &self.precache_str]
    }

    /// Scratch cache an install fills before it replaces the precache.
    pub fn staging_name(&self) -> String {
        format!("{}.staging", self.precache_str)
    }

    /// Whether a stored cache name belongs to this version's live pair.
    pub fn is_current(&self, name: &str) -> bool {
        name == self.precache_str || name == self.runtime_str
    }
}
