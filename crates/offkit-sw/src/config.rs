//! Worker configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::classify::HostPattern;
use crate::error::{SwError, SwResult};

/// Configuration for one worker version.
///
/// A deploy is a new `version`; everything else usually stays put.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwConfig {
    /// Origin of the client application, e.g. `https://app.example`
    pub origin: String,

    /// Prefix shared by both cache names
    pub cache_prefix: String,

    /// Build version embedded in the precache name
    pub version: String,

    /// Paths precached on install, in order
    pub static_manifest: Vec<String>,

    /// Canonical document path; successful navigations are stored under it
    pub main_document: String,

    /// Offline page path, preferred over a synthesized 503
    pub offline_page: String,

    /// Hosts never intercepted (backend API, geolocation)
    pub bypass_hosts: Vec<HostPattern>,

    /// CDN, font and module hosts whose responses are cached
    pub cacheable_hosts: Vec<HostPattern>,

    /// Activate right after install instead of waiting for clients to go away
    pub skip_waiting: bool,

    /// Push notification rendering
    pub notification: NotificationConfig,

    /// Background sync tags this worker answers
    pub sync_tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Fixed notification title
    pub title: String,

    /// Body used when a push carries no payload
    pub body: String,

    pub icon: String,

    pub badge: String,

    /// Vibration pattern in milliseconds
    pub vibrate: Vec<u32>,
}

impl Default for SwConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost".to_string(),
            cache_prefix: "offkit".to_string(),
            version: "1.0.0".to_string(),
            static_manifest: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
                "/icon-192.png".to_string(),
                "/icon-512.png".to_string(),
            ],
            main_document: "/index.html".to_string(),
            offline_page: "/offline.html".to_string(),
            bypass_hosts: vec![
                HostPattern::Contains("supabase.co".to_string()),
                HostPattern::Contains("ipapi.co".to_string()),
                HostPattern::Contains("ipify.org".to_string()),
            ],
            cacheable_hosts: vec![
                HostPattern::Contains("cdn.".to_string()),
                HostPattern::Contains("fonts.".to_string()),
                HostPattern::Contains("esm.sh".to_string()),
            ],
            skip_waiting: true,
            notification: NotificationConfig::default(),
            sync_tags: vec!["sync-outbox".to_string()],
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "OffKit".to_string(),
            body: "New notification".to_string(),
            icon: "/icon-192.png".to_string(),
            badge: "/icon-72.png".to_string(),
            vibrate: vec![200, 100, 200],
        }
    }
}

impl SwConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(raw: &str) -> SwResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file(path: &Path) -> SwResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SwError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// The application origin as a URL.
    pub fn origin_url(&self) -> SwResult<Url> {
        let url = Url::parse(&self.origin)
            .map_err(|e| SwError::config(format!("origin {:?}: {}", self.origin, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SwError::config(format!(
                "origin must be http or https, got {}",
                url.scheme()
            )));
        }
        Ok(url)
    }

    /// Check the invariants the rest of the layer relies on.
    pub fn validate(&self) -> SwResult<()> {
        self.origin_url()?;

        if self.version.trim().is_empty() {
            return Err(SwError::config("version must not be empty"));
        }

        for path in self
            .static_manifest
            .iter()
            .chain([&self.main_document, &self.offline_page])
        {
            if !path.starts_with('/') {
                return Err(SwError::config(format!(
                    "path {path:?} must start with '/'"
                )));
            }
        }

        Ok(())
    }
}
