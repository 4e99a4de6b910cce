//! Resource classification.
//!
//! Every intercepted request is tagged with a [`ResourceClass`] by walking an
//! ordered rule list; the first matching rule wins. Bypass rules come before
//! everything else so dynamic API traffic is never cached, even when it
//! shares a path with a static asset.

use http::Method;
use offkit_net::Request;
use serde::{Deserialize, Serialize};
use url::{Origin, Url};

use crate::config::SwConfig;
use crate::error::SwResult;
use crate::manifest::StaticManifest;

/// Class of an intercepted request. Derived per request, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    /// Top-level document.
    Navigation,
    /// Member of the static manifest.
    StaticAsset,
    /// CDN, font or module host.
    CdnAsset,
    /// Never intercepted.
    ApiBypass,
    Other,
}

impl ResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Navigation => "navigation",
            ResourceClass::StaticAsset => "static-asset",
            ResourceClass::CdnAsset => "cdn-asset",
            ResourceClass::ApiBypass => "api-bypass",
            ResourceClass::Other => "other",
        }
    }
}

/// Host matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostPattern {
    /// Exact host match.
    Exact(String),
    /// Suffix match (e.g., a parent domain).
    Suffix(String),
    /// Contains substring.
    Contains(String),
}

impl HostPattern {
    /// Check if a host matches this pattern. Comparison is ASCII case-insensitive.
    pub fn matches(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        match self {
            HostPattern::Exact(p) => host == p.to_ascii_lowercase(),
            HostPattern::Suffix(p) => host.ends_with(&p.to_ascii_lowercase()),
            HostPattern::Contains(p) => host.contains(&p.to_ascii_lowercase()),
        }
    }

    fn any_matches(patterns: &[HostPattern], url: &Url) -> bool {
        url.host_str()
            .map(|host| patterns.iter().any(|p| p.matches(host)))
            .unwrap_or(false)
    }
}

/// A classification predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Method other than GET.
    NonGet,
    /// Host is a backend or geolocation API.
    BypassHost(Vec<HostPattern>),
    /// Same-origin navigation, or the site root / main document path.
    Navigation,
    /// Host is a CDN, font or module host.
    CdnHost(Vec<HostPattern>),
    /// Same-origin path listed in the static manifest.
    InManifest,
    /// Always matches.
    Any,
}

/// Maps requests to resource classes.
#[derive(Debug, Clone)]
pub struct Classifier {
    origin: Origin,
    main_document: String,
    manifest: StaticManifest,
    cacheable_hosts: Vec<HostPattern>,
    rules: Vec<(Rule, ResourceClass)>,
}

impl Classifier {
    pub fn new(
        origin: &Url,
        main_document: impl Into<String>,
        manifest: StaticManifest,
        bypass_hosts: Vec<HostPattern>,
        cacheable_hosts: Vec<HostPattern>,
    ) -> Self {
        let rules = vec![
            (Rule::NonGet, ResourceClass::ApiBypass),
            (Rule::BypassHost(bypass_hosts), ResourceClass::ApiBypass),
            (Rule::Navigation, ResourceClass::Navigation),
            (Rule::CdnHost(cacheable_hosts.clone()), ResourceClass::CdnAsset),
            (Rule::InManifest, ResourceClass::StaticAsset),
            (Rule::Any, ResourceClass::Other),
        ];

        Self {
            origin: origin.origin(),
            main_document: main_document.into(),
            manifest,
            cacheable_hosts,
            rules,
        }
    }

    pub fn from_config(config: &SwConfig) -> SwResult<Self> {
        Ok(Self::new(
            &config.origin_url()?,
            config.main_document.clone(),
            StaticManifest::new(config.static_manifest.iter().cloned()),
            config.bypass_hosts.clone(),
            config.cacheable_hosts.clone(),
        ))
    }

    /// The rules in priority order.
    pub fn rules(&self) -> &[(Rule, ResourceClass)] {
        &self.rules
    }

    pub fn manifest(&self) -> &StaticManifest {
        &self.manifest
    }

    /// Classify a request. Total: the last rule always matches.
    pub fn classify(&self, request: &Request) -> ResourceClass {
        self.rules
            .iter()
            .find(|(rule, _)| self.matches(rule, request))
            .map(|(_, class)| *class)
            .unwrap_or(ResourceClass::Other)
    }

    /// Whether a response for this request may be stored by the gated strategy.
    pub fn is_cacheable(&self, request: &Request) -> bool {
        HostPattern::any_matches(&self.cacheable_hosts, &request.url)
            || self.in_manifest(&request.url)
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin
    }

    /// Evaluate a single rule.
    pub fn matches(&self, rule: &Rule, request: &Request) -> bool {
        match rule {
            Rule::NonGet => request.method != Method::GET,
            Rule::BypassHost(patterns) => HostPattern::any_matches(patterns, &request.url),
            Rule::Navigation => {
                self.is_same_origin(&request.url)
                    && (request.is_navigation()
                        || request.url.path() == "/"
                        || request.url.path() == self.main_document)
            }
            Rule::CdnHost(patterns) => HostPattern::any_matches(patterns, &request.url),
            Rule::InManifest => self.in_manifest(&request.url),
            Rule::Any => true,
        }
    }

    fn in_manifest(&self, url: &Url) -> bool {
        self.is_same_origin(url) && self.manifest.contains(url.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn classifier() -> Classifier {
        Classifier::from_config(&SwConfig {
            origin: "https://app.example".to_string(),
            static_manifest: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
                "/icon-192.png".to_string(),
            ],
            ..Default::default()
        })
        .unwrap()
    }

    fn get(url: &str) -> Request {
        Request::parse_get(url).unwrap()
    }

    #[test]
    fn test_rule_order_is_visible() {
        let c = classifier();
        let classes: Vec<ResourceClass> = c.rules().iter().map(|(_, class)| *class).collect();
        assert_eq!(
            classes,
            vec![
                ResourceClass::ApiBypass,
                ResourceClass::ApiBypass,
                ResourceClass::Navigation,
                ResourceClass::CdnAsset,
                ResourceClass::StaticAsset,
                ResourceClass::Other,
            ]
        );
        assert_eq!(c.rules()[0].0, Rule::NonGet);
        assert_eq!(c.rules().last().unwrap().0, Rule::Any);
    }

    #[test]
    fn test_non_get_is_bypass_even_for_manifest_paths() {
        let c = classifier();
        let url = Url::parse("https://app.example/manifest.json").unwrap();
        let post = Request::post(url, Bytes::from_static(b"{}"));
        assert_eq!(c.classify(&post), ResourceClass::ApiBypass);
    }

    #[test]
    fn test_backend_and_geolocation_hosts_bypass() {
        let c = classifier();
        for url in [
            "https://xyzcompany.supabase.co/rest/v1/guides",
            "https://ipapi.co/json/",
            "https://api.ipify.org/?format=json",
        ] {
            assert_eq!(c.classify(&get(url)), ResourceClass::ApiBypass, "{url}");
        }
    }

    #[test]
    fn test_bypass_wins_over_navigation_flag() {
        let c = classifier();
        let request = Request::navigate(Url::parse("https://x.supabase.co/").unwrap());
        assert_eq!(c.classify(&request), ResourceClass::ApiBypass);
    }

    #[test]
    fn test_navigation() {
        let c = classifier();
        assert_eq!(
            c.classify(&get("https://app.example/")),
            ResourceClass::Navigation
        );
        assert_eq!(
            c.classify(&get("https://app.example/index.html")),
            ResourceClass::Navigation
        );
        let deep = Request::navigate(Url::parse("https://app.example/guides/42").unwrap());
        assert_eq!(c.classify(&deep), ResourceClass::Navigation);
    }

    #[test]
    fn test_cross_origin_root_is_not_navigation() {
        let c = classifier();
        assert_eq!(
            c.classify(&get("https://cdn.tailwindcss.com/")),
            ResourceClass::CdnAsset
        );
        let foreign = Request::navigate(Url::parse("https://elsewhere.example/").unwrap());
        assert_eq!(c.classify(&foreign), ResourceClass::Other);
    }

    #[test]
    fn test_cdn_hosts() {
        let c = classifier();
        for url in [
            "https://cdn.tailwindcss.com",
            "https://fonts.googleapis.com/css2?family=Noto+Sans+TC",
            "https://fonts.gstatic.com/s/noto.woff2",
            "https://esm.sh/react@18",
        ] {
            assert_eq!(c.classify(&get(url)), ResourceClass::CdnAsset, "{url}");
        }
    }

    #[test]
    fn test_static_assets_and_other() {
        let c = classifier();
        assert_eq!(
            c.classify(&get("https://app.example/manifest.json")),
            ResourceClass::StaticAsset
        );
        assert_eq!(
            c.classify(&get("https://app.example/icon-192.png?v=3")),
            ResourceClass::StaticAsset
        );
        assert_eq!(
            c.classify(&get("https://app.example/img/photo.jpg")),
            ResourceClass::Other
        );
        // Manifest paths only count on the app origin.
        assert_eq!(
            c.classify(&get("https://elsewhere.example/manifest.json")),
            ResourceClass::Other
        );
    }

    #[test]
    fn test_is_cacheable() {
        let c = classifier();
        assert!(c.is_cacheable(&get("https://esm.sh/preact")));
        assert!(c.is_cacheable(&get("https://app.example/manifest.json")));
        assert!(!c.is_cacheable(&get("https://app.example/img/photo.jpg")));
    }

    #[test]
    fn test_host_patterns() {
        assert!(HostPattern::Exact("a.example".into()).matches("A.Example"));
        assert!(!HostPattern::Exact("a.example".into()).matches("b.a.example"));
        assert!(HostPattern::Suffix(".example".into()).matches("b.a.example"));
        assert!(HostPattern::Contains("cdn.".into()).matches("cdn.jsdelivr.net"));
        assert!(!HostPattern::Contains("cdn.".into()).matches("mycdn-host.net"));
    }

    #[test]
    fn test_class_names() {
        assert_eq!(ResourceClass::StaticAsset.as_str(), "static-asset");
        assert_eq!(ResourceClass::ApiBypass.as_str(), "api-bypass");
    }
}
