//! Static manifest: the paths that must be precached on install.

use url::Url;

use crate::error::{SwError, SwResult};

/// Ordered, duplicate-free set of same-origin paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticManifest {
    paths: Vec<String>,
}

impl StaticManifest {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut manifest = Self::default();
        for path in paths {
            let path = path.into();
            if !manifest.paths.contains(&path) {
                manifest.paths.push(path);
            }
        }
        manifest
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Resolve every path against `origin`.
    pub fn urls(&self, origin: &Url) -> SwResult<Vec<Url>> {
        self.paths
            .iter()
            .map(|path| {
                origin
                    .join(path)
                    .map_err(|e| SwError::config(format!("manifest path {path:?}: {e}")))
            })
            .collect()
    }
}
