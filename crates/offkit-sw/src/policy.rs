//! Routing policy: one strategy per resource class.
//!
//! | Class                        | Strategy                         |
//! |------------------------------|----------------------------------|
//! | `ApiBypass`                  | bypass                           |
//! | `Navigation`                 | network-first                    |
//! | `StaticAsset`, `CdnAsset`    | cache-first, always populate     |
//! | `Other`                      | cache-first, populate if allowed |
//!
//! Population writes run on detached tasks owned by the [`CacheStorage`]. The
//! caller's response never waits for them and never sees their failures.
//!
//! Offline navigations look for the document in the runtime cache before the
//! precache, so the last page captured online wins over the install-time copy.

use std::sync::Arc;

use http::header::CONTENT_TYPE;
use http::HeaderValue;
use offkit_net::{Request, Response, Transport};
use tracing::{debug, warn};

use crate::cache_name::CacheNames;
use crate::classify::{Classifier, ResourceClass};
use crate::config::SwConfig;
use crate::error::{SwError, SwResult};
use crate::store::{CacheStorage, RequestKey};

/// Body of the synthesized response when nothing better is available offline.
pub const OFFLINE_MESSAGE: &str = "Offline: unable to reach the network";

/// Whether a cache-first miss may be written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Populate {
    /// Store every eligible response.
    Always,
    /// Store only responses for cacheable hosts or manifest paths.
    Gated,
}

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Bypass,
    NetworkFirst,
    CacheFirst { populate: Populate },
}

impl Strategy {
    pub fn for_class(class: ResourceClass) -> Self {
        match class {
            ResourceClass::ApiBypass => Strategy::Bypass,
            ResourceClass::Navigation => Strategy::NetworkFirst,
            ResourceClass::StaticAsset | ResourceClass::CdnAsset => Strategy::CacheFirst {
                populate: Populate::Always,
            },
            ResourceClass::Other => Strategy::CacheFirst {
                populate: Populate::Gated,
            },
        }
    }
}

/// Result of intercepting a request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Not intercepted; the caller goes to the network itself.
    Passthrough,
    /// Answered by the layer.
    Respond(Response),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::Passthrough => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::Passthrough => None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, FetchOutcome::Passthrough)
    }
}

/// A response may be stored only if it is a 200 and not a network error.
pub fn is_storable(response: &Response) -> bool {
    response.status == 200 && !response.is_error()
}

/// The synthesized 503 served when offline with no fallback cached.
pub fn offline_response() -> Response {
    Response::new(503, OFFLINE_MESSAGE)
        .with_status_text("Service Unavailable")
        .with_header(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        )
}

/// Executes the strategy for each request class.
pub struct Router {
    caches: CacheStorage,
    transport: Arc<dyn Transport>,
    names: CacheNames,
    classifier: Arc<Classifier>,
    document_key: RequestKey,
    root_key: RequestKey,
    offline_key: RequestKey,
}

impl Router {
    pub fn new(
        config: &SwConfig,
        caches: CacheStorage,
        transport: Arc<dyn Transport>,
        classifier: Arc<Classifier>,
    ) -> SwResult<Self> {
        let origin = config.origin_url()?;
        let resolve = |path: &str| {
            origin
                .join(path)
                .map(|url| RequestKey::get(&url))
                .map_err(|e| SwError::config(format!("path {path:?}: {e}")))
        };

        Ok(Self {
            document_key: resolve(&config.main_document)?,
            root_key: resolve("/")?,
            offline_key: resolve(&config.offline_page)?,
            names: CacheNames::from_config(config),
            caches,
            transport,
            classifier,
        })
    }

    pub fn names(&self) -> &CacheNames {
        &self.names
    }

    /// Classify and route.
    pub async fn handle(&self, request: &Request) -> FetchOutcome {
        let class = self.classifier.classify(request);
        self.route(request, class).await
    }

    /// Serve `request` with the strategy for `class`.
    pub async fn route(&self, request: &Request, class: ResourceClass) -> FetchOutcome {
        let strategy = Strategy::for_class(class);
        debug!(
            url = %request.url,
            class = class.as_str(),
            ?strategy,
            "Routing request"
        );

        match strategy {
            Strategy::Bypass => FetchOutcome::Passthrough,
            Strategy::NetworkFirst => FetchOutcome::Respond(self.network_first(request).await),
            Strategy::CacheFirst { populate } => {
                FetchOutcome::Respond(self.cache_first(request, populate).await)
            }
        }
    }

    async fn network_first(&self, request: &Request) -> Response {
        match self.transport.fetch(request).await {
            Ok(response) => {
                if is_storable(&response) {
                    self.populate(self.document_key.clone(), response.clone());
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Navigation fetch failed, trying cache");
                let order = self.names.document_order();
                if let Some(cached) = self.lookup_in(&self.document_key, &order).await {
                    return cached;
                }
                if let Some(cached) = self.lookup_in(&self.root_key, &order).await {
                    return cached;
                }
                warn!(url = %request.url, "No cached document for offline navigation");
                Response::network_error()
            }
        }
    }

    async fn cache_first(&self, request: &Request, populate: Populate) -> Response {
        let key = RequestKey::for_request(request);
        if let Some(cached) = self.lookup(&key).await {
            debug!(url = %request.url, "Serving from cache");
            return cached;
        }

        match self.transport.fetch(request).await {
            Ok(response) => {
                let allowed = match populate {
                    Populate::Always => true,
                    Populate::Gated => self.classifier.is_cacheable(request),
                };
                if allowed && is_storable(&response) {
                    self.populate(key, response.clone());
                }
                response
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Fetch failed");
                match self.lookup(&self.offline_key).await {
                    Some(page) => page,
                    None => offline_response(),
                }
            }
        }
    }

    /// Cache lookup in precache then runtime.
    async fn lookup(&self, key: &RequestKey) -> Option<Response> {
        self.lookup_in(key, &self.names.search_order()).await
    }

    /// Store errors count as a miss.
    async fn lookup_in(&self, key: &RequestKey, order: &[&str]) -> Option<Response> {
        match self.caches.match_key(key, order).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    /// Write `response` into the runtime cache on a detached task.
    fn populate(&self, key: RequestKey, response: Response) {
        self.caches.put_detached(self.names.runtime_name(), key, response);
    }

    /// Wait for every population write started so far.
    pub async fn settle(&self) {
        self.caches.settle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offkit_net::{CannedTransport, ResponseType};
    use url::Url;

    const ORIGIN: &str = "https://app.example";

    struct Fixture {
        router: Router,
        caches: CacheStorage,
        net: Arc<CannedTransport>,
        names: CacheNames,
    }

    fn fixture() -> Fixture {
        let config = SwConfig {
            origin: ORIGIN.to_string(),
            cache_prefix: "app".to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        };
        let caches = CacheStorage::in_memory();
        let net = Arc::new(CannedTransport::new());
        let classifier = Arc::new(Classifier::from_config(&config).unwrap());
        let router = Router::new(&config, caches.clone(), net.clone(), classifier).unwrap();
        Fixture {
            names: CacheNames::from_config(&config),
            router,
            caches,
            net,
        }
    }

    fn url(path: &str) -> String {
        format!("{ORIGIN}{path}")
    }

    async fn runtime_has(f: &Fixture, url: &str) -> bool {
        let key = RequestKey::get(&Url::parse(url).unwrap());
        f.caches
            .match_key(&key, &[f.names.runtime_name()])
            .await
            .unwrap()
            .is_some()
    }

    #[test]
    fn test_strategy_table() {
        assert_eq!(Strategy::for_class(ResourceClass::ApiBypass), Strategy::Bypass);
        assert_eq!(
            Strategy::for_class(ResourceClass::Navigation),
            Strategy::NetworkFirst
        );
        assert_eq!(
            Strategy::for_class(ResourceClass::CdnAsset),
            Strategy::CacheFirst {
                populate: Populate::Always
            }
        );
        assert_eq!(
            Strategy::for_class(ResourceClass::Other),
            Strategy::CacheFirst {
                populate: Populate::Gated
            }
        );
    }

    #[test]
    fn test_storable() {
        assert!(is_storable(&Response::new(200, "x")));
        assert!(!is_storable(&Response::new(204, "")));
        assert!(!is_storable(&Response::new(404, "")));
        assert!(!is_storable(&Response::network_error()));
    }

    #[tokio::test]
    async fn test_bypass_is_passthrough_and_untouched() {
        let f = fixture();
        let request = Request::parse_get("https://abc.supabase.co/rest/v1/guides").unwrap();

        let outcome = f.router.handle(&request).await;
        f.router.settle().await;

        assert!(outcome.is_passthrough());
        assert_eq!(f.net.fetch_count(), 0);
        assert!(f.caches.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_navigation_prefers_network_and_stores_document() {
        let f = fixture();
        let stale = Request::parse_get(&url("/index.html")).unwrap();
        f.caches
            .open(f.names.runtime_name())
            .await
            .unwrap()
            .put(&stale, &Response::new(200, "old shell"))
            .await
            .unwrap();
        f.net.route_ok(&url("/"), "new shell");

        let request = Request::navigate(Url::parse(&url("/")).unwrap());
        let response = f.router.handle(&request).await.into_response().unwrap();
        f.router.settle().await;

        assert_eq!(response.text(), "new shell");
        let stored = f
            .caches
            .match_request(&stale, &[f.names.runtime_name()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.text(), "new shell");
    }

    #[tokio::test]
    async fn test_navigation_non_200_is_returned_not_stored() {
        let f = fixture();
        f.net.route(&url("/index.html"), Response::new(500, "boom"));

        let request = Request::navigate(Url::parse(&url("/index.html")).unwrap());
        let response = f.router.handle(&request).await.into_response().unwrap();
        f.router.settle().await;

        assert_eq!(response.status, 500);
        assert!(!runtime_has(&f, &url("/index.html")).await);
    }

    #[tokio::test]
    async fn test_navigation_offline_falls_back_to_root_then_no_response() {
        let f = fixture();
        f.net.set_offline(true);
        let request = Request::navigate(Url::parse(&url("/guides/7")).unwrap());

        let none = f.router.handle(&request).await.into_response().unwrap();
        assert!(none.is_error());

        let root = Request::parse_get(&url("/")).unwrap();
        f.caches
            .open(f.names.precache_name())
            .await
            .unwrap()
            .put(&root, &Response::new(200, "root shell"))
            .await
            .unwrap();

        let fallback = f.router.handle(&request).await.into_response().unwrap();
        assert_eq!(fallback.text(), "root shell");
    }

    #[tokio::test]
    async fn test_offline_navigation_serves_latest_capture() {
        let f = fixture();
        let index = Request::parse_get(&url("/index.html")).unwrap();
        f.caches
            .open(f.names.precache_name())
            .await
            .unwrap()
            .put(&index, &Response::new(200, "shell from install"))
            .await
            .unwrap();
        f.net.route_ok(&url("/index.html"), "shell captured later");

        let request = Request::navigate(Url::parse(&url("/index.html")).unwrap());
        f.router.handle(&request).await;
        f.router.settle().await;

        f.net.set_offline(true);
        let offline = f.router.handle(&request).await.into_response().unwrap();
        assert_eq!(offline.text(), "shell captured later");

        // Cache-first lookups still consult the precache first.
        let asset = f.router.route(&index, ResourceClass::StaticAsset).await;
        assert_eq!(asset.into_response().unwrap().text(), "shell from install");
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let f = fixture();
        let request = Request::parse_get("https://cdn.tailwindcss.com/").unwrap();
        f.caches
            .open(f.names.runtime_name())
            .await
            .unwrap()
            .put(&request, &Response::new(200, "tw"))
            .await
            .unwrap();

        let response = f.router.handle(&request).await.into_response().unwrap();
        assert_eq!(response.text(), "tw");
        assert_eq!(f.net.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_miss_populates_runtime() {
        let f = fixture();
        let target = "https://esm.sh/preact@10";
        f.net.route_ok(target, "export default {}");

        let request = Request::parse_get(target).unwrap();
        let first = f.router.handle(&request).await.into_response().unwrap();
        f.router.settle().await;
        assert_eq!(first.text(), "export default {}");
        assert!(runtime_has(&f, target).await);

        let second = f.router.handle(&request).await.into_response().unwrap();
        assert_eq!(second.text(), "export default {}");
        assert_eq!(f.net.fetches_for(target), 1);
    }

    #[tokio::test]
    async fn test_cdn_failure_statuses_are_returned_not_stored() {
        let f = fixture();
        let missing = "https://esm.sh/not-a-package";
        let errored = "https://fonts.gstatic.com/s/broken.woff2";
        f.net
            .route(missing, Response::new(404, "not found"))
            .route(errored, Response::new(200, "").with_type(ResponseType::Error));

        let first = f
            .router
            .handle(&Request::parse_get(missing).unwrap())
            .await
            .into_response()
            .unwrap();
        let second = f
            .router
            .handle(&Request::parse_get(errored).unwrap())
            .await
            .into_response()
            .unwrap();
        f.router.settle().await;

        assert_eq!(first.status, 404);
        assert!(second.is_error());
        assert!(!runtime_has(&f, missing).await);
        assert!(!runtime_has(&f, errored).await);

        f.router.handle(&Request::parse_get(missing).unwrap()).await;
        assert_eq!(f.net.fetches_for(missing), 2);
    }

    #[tokio::test]
    async fn test_other_class_is_not_stored() {
        let f = fixture();
        let target = url("/img/photo.jpg");
        f.net.route_ok(&target, "jpeg");

        let request = Request::parse_get(&target).unwrap();
        let response = f.router.handle(&request).await.into_response().unwrap();
        f.router.settle().await;

        assert_eq!(response.text(), "jpeg");
        assert!(!runtime_has(&f, &target).await);
    }

    #[tokio::test]
    async fn test_other_class_gate_admits_cacheable_hosts() {
        let f = fixture();
        let target = "https://cdn.jsdelivr.net/npm/lib.js";
        f.net.route_ok(target, "lib");

        let request = Request::parse_get(target).unwrap();
        f.router.route(&request, ResourceClass::Other).await;
        f.router.settle().await;

        assert!(runtime_has(&f, target).await);
    }

    #[tokio::test]
    async fn test_offline_prefers_cached_offline_page() {
        let f = fixture();
        f.net.set_offline(true);
        let offline = Request::parse_get(&url("/offline.html")).unwrap();
        f.caches
            .open(f.names.precache_name())
            .await
            .unwrap()
            .put(&offline, &Response::new(200, "you are offline"))
            .await
            .unwrap();

        let request = Request::parse_get(&url("/img/photo.jpg")).unwrap();
        let response = f.router.handle(&request).await.into_response().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "you are offline");
    }

    #[tokio::test]
    async fn test_offline_without_fallback_synthesizes_503() {
        let f = fixture();
        f.net.set_offline(true);

        let request = Request::parse_get(&url("/img/photo.jpg")).unwrap();
        let response = f.router.handle(&request).await.into_response().unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(response.status_text, "Service Unavailable");
        assert_eq!(response.text(), OFFLINE_MESSAGE);
        assert_eq!(
            response.headers.get(CONTENT_TYPE).unwrap(),
            "text/html; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn test_settle_with_nothing_pending() {
        let f = fixture();
        f.router.settle().await;
        f.router.settle().await;
    }
}
