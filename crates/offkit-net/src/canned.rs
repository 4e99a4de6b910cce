//! In-memory transport serving canned responses.
//!
//! Routes are keyed by full URL. A route can answer with a response or fail
//! like an unreachable host, and the whole transport can be switched offline.
//! Every call is counted, which makes it the natural network double for
//! exercising caching strategies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tracing::trace;

use crate::{NetError, Request, Response, ResponseType, Transport};

#[derive(Debug, Clone)]
enum Route {
    Respond(Response),
    Fail,
}

/// A [`Transport`] backed by a route table.
#[derive(Debug, Default)]
pub struct CannedTransport {
    routes: RwLock<HashMap<String, Route>>,
    hits: RwLock<HashMap<String, usize>>,
    offline: AtomicBool,
    fetches: AtomicUsize,
}

impl CannedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `response`.
    pub fn route(&self, url: &str, response: Response) -> &Self {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), Route::Respond(response));
        self
    }

    /// Answer `url` with a 200 carrying `body`.
    pub fn route_ok(&self, url: &str, body: &str) -> &Self {
        self.route(url, Response::new(200, body.to_string()))
    }

    /// Make `url` fail as if the host were unreachable.
    pub fn fail(&self, url: &str) -> &Self {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), Route::Fail);
        self
    }

    /// Fail every request while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Total number of fetch calls, including failed ones.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of fetch calls for a specific URL.
    pub fn fetches_for(&self, url: &str) -> usize {
        self.hits
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Transport for CannedTransport {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let url = request.url.as_str();
        self.fetches.fetch_add(1, Ordering::SeqCst);
        *self
            .hits
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.to_string())
            .or_insert(0) += 1;

        if self.offline.load(Ordering::SeqCst) {
            trace!(url, "Canned transport offline");
            return Err(NetError::Offline(url.to_string()));
        }

        let route = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned();

        match route {
            Some(Route::Respond(response)) => {
                let response_type = match response.response_type {
                    ResponseType::Default => ResponseType::Basic,
                    other => other,
                };
                Ok(response
                    .with_type(response_type)
                    .with_url(request.url.clone()))
            }
            Some(Route::Fail) => Err(NetError::Offline(url.to_string())),
            None => Ok(Response::new(404, "Not Found")
                .with_type(ResponseType::Basic)
                .with_url(request.url.clone())),
        }
    }
}
