//! Caching strategies.
//!
//! Every strategy produces a response: network failures fall back to the
//! cache, then to a synthetic 503.

use std::sync::Arc;

use agrimarket_net::{Fetcher, Request, Response};
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use serde_json::json;
use tracing::{debug, trace, warn};
use url::Url;

use crate::cache::SharedCacheStorage;
use crate::lifetime::WaitUntil;
use crate::router::Strategy;

/// Everything a strategy needs to serve one request.
#[derive(Clone)]
pub struct StrategyContext {
    pub caches: SharedCacheStorage,
    pub fetcher: Arc<dyn Fetcher>,
    /// Lifetime of the fetch event; background revalidation joins it.
    pub wait_until: WaitUntil,
    pub offline_message: Arc<str>,
}

/// Plain-text offline response.
pub fn offline_response(url: &Url) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    Response::from_parts(url.clone(), StatusCode::SERVICE_UNAVAILABLE, headers, "Offline")
}

/// JSON offline response for data requests.
pub fn offline_json_response(url: &Url, message: &str) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let body = json!({ "error": "Offline", "message": message }).to_string();
    Response::from_parts(url.clone(), StatusCode::SERVICE_UNAVAILABLE, headers, body)
}

/// Store a response; a failed write is logged and otherwise ignored.
async fn store(caches: &SharedCacheStorage, cache_name: &str, request: &Request, response: &Response) {
    if let Err(e) = caches.put(cache_name, request, response).await {
        warn!(cache = cache_name, url = %request.url, error = %e, "Cache write failed");
    }
}

/// Serve from the cache; on a miss, fetch and store.
pub async fn cache_first(ctx: &StrategyContext, request: Request, cache_name: &str) -> Response {
    if let Some(hit) = ctx.caches.match_in(cache_name, &request).await {
        trace!(url = %request.url, cache = cache_name, "Cache hit");
        return hit;
    }

    match ctx.fetcher.fetch(request.clone()).await {
        Ok(response) => {
            if response.ok() {
                store(&ctx.caches, cache_name, &request, &response).await;
            }
            response
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Network failed, no cached copy");
            match ctx.caches.match_in(cache_name, &request).await {
                Some(hit) => hit,
                None => offline_response(&request.url),
            }
        }
    }
}

/// Fetch and store; fall back to the cache when the network fails.
pub async fn network_first(ctx: &StrategyContext, request: Request, cache_name: &str) -> Response {
    match ctx.fetcher.fetch(request.clone()).await {
        Ok(response) => {
            if response.ok() {
                store(&ctx.caches, cache_name, &request, &response).await;
            }
            response
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Network failed, trying cache");
            match ctx.caches.match_in(cache_name, &request).await {
                Some(hit) => hit,
                None => offline_json_response(&request.url, &ctx.offline_message),
            }
        }
    }
}

/// Serve the cached copy at once and refresh it in the background. Without
/// a cached copy, wait for the network.
pub async fn stale_while_revalidate(ctx: &StrategyContext, request: Request, cache_name: &str) -> Response {
    let Some(hit) = ctx.caches.match_in(cache_name, &request).await else {
        return match ctx.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                if response.ok() {
                    store(&ctx.caches, cache_name, &request, &response).await;
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, no cached copy");
                offline_response(&request.url)
            }
        };
    };

    let caches = ctx.caches.clone();
    let fetcher = Arc::clone(&ctx.fetcher);
    let cache_name = cache_name.to_string();
    ctx.wait_until.extend("revalidate", async move {
        match fetcher.fetch(request.clone()).await {
            Ok(response) if response.ok() => {
                store(&caches, &cache_name, &request, &response).await;
                trace!(url = %request.url, "Revalidated");
            }
            Ok(response) => {
                debug!(url = %request.url, status = %response.status, "Revalidation not stored");
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Revalidation failed");
            }
        }
        Ok(())
    });

    hit
}

/// Run `strategy` for a request against the named cache.
pub async fn execute(strategy: Strategy, ctx: &StrategyContext, request: Request, cache_name: &str) -> Response {
    match strategy {
        Strategy::CacheFirst => cache_first(ctx, request, cache_name).await,
        Strategy::NetworkFirst => network_first(ctx, request, cache_name).await,
        Strategy::StaleWhileRevalidate => stale_while_revalidate(ctx, request, cache_name).await,
    }
}
