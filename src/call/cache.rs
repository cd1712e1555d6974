//! The Cache interceptor (§4.1 point 4): serves a fresh cached response
//! without touching the network, and stores cacheable network responses.

use std::time::Duration;

use async_trait::async_trait;
use http::Method;

use crate::{
    body::ResponseBody,
    cache::CacheEntry,
    call::interceptor::{Chain, Interceptor},
    error::Error,
    response::Response,
};

/// Used when neither the request nor a stored policy names a TTL. The core
/// ships no HTTP cache-control response-header parser (§1 Non-goal); callers
/// that need RFC 7234 freshness semantics supply their own [`crate::cache::Cache`].
const DEFAULT_FRESHNESS: Duration = Duration::from_secs(0);

pub(crate) struct CacheInterceptor;

#[async_trait]
impl Interceptor for CacheInterceptor {
    async fn intercept(&self, mut chain: Chain) -> Result<Response, Error> {
        let cache = match &chain.state().config.cache {
            Some(cache) => cache.clone(),
            None => return chain.proceed().await,
        };
        if chain.request().method() != Method::GET {
            return chain.proceed().await;
        }

        let cache_control = chain.request().cache_control().clone();
        let cached = if cache_control.no_cache {
            None
        } else {
            cache.get(chain.request()).await
        };

        if let Some(entry) = &cached {
            let freshness = cache_control.max_age.unwrap_or(DEFAULT_FRESHNESS);
            if entry.is_fresh(freshness) {
                return Ok(cached_response(chain.request(), entry));
            }
        }

        if cache_control.only_if_cached {
            return Err(Error::protocol("only-if-cached request had no fresh cache entry"));
        }

        if let Some(entry) = &cached {
            add_conditional_headers(&mut chain, entry);
        }

        let response = chain.proceed().await?;

        if response.status() == http::StatusCode::NOT_MODIFIED {
            if let Some(entry) = cached {
                cache.update(response.request(), response.meta()).await;
                return Ok(revalidated_response(response, entry));
            }
        }

        if response.status() == http::StatusCode::OK && !cache_control.no_store {
            let meta = response.meta();
            return buffer_and_store(cache, response, meta).await;
        }

        Ok(response)
    }
}

fn add_conditional_headers(chain: &mut Chain, entry: &CacheEntry) {
    if let Some(etag) = entry.meta.headers.get(http::header::ETAG) {
        let etag = etag.clone();
        chain.request_mut().headers_mut().insert(http::header::IF_NONE_MATCH, etag);
    }
    if let Some(last_modified) = entry.meta.headers.get(http::header::LAST_MODIFIED) {
        let last_modified = last_modified.clone();
        chain
            .request_mut()
            .headers_mut()
            .insert(http::header::IF_MODIFIED_SINCE, last_modified);
    }
}

fn cached_response(request: &crate::request::Request, entry: &CacheEntry) -> Response {
    let mut response = Response::new(
        std::sync::Arc::new(clone_request_for_cache_hit(request)),
        entry.meta.status,
        entry.meta.protocol,
        entry.meta.headers.clone(),
        ResponseBody::from_bytes(entry.body.clone()),
    );
    response.cache_response = Some(Box::new(entry.meta.clone()));
    response
}

fn revalidated_response(network_response: Response, entry: CacheEntry) -> Response {
    let request = network_response.request.clone();
    let network_meta = Box::new(network_response.meta());
    let mut response = Response::new(
        request,
        entry.meta.status,
        entry.meta.protocol,
        entry.meta.headers,
        ResponseBody::from_bytes(entry.body),
    );
    response.network_response = Some(network_meta);
    response.cache_response = Some(Box::new(entry.meta));
    response
}

async fn buffer_and_store(
    cache: std::sync::Arc<dyn crate::cache::Cache>,
    response: Response,
    meta: crate::response::ResponseMeta,
) -> Result<Response, Error> {
    let request = response.request.clone();
    let network_meta = Box::new(meta.clone());
    let bytes = response.bytes().await?;
    cache
        .put(
            &request,
            CacheEntry {
                meta: meta.clone(),
                body: bytes.clone(),
                stored_at: std::time::Instant::now(),
                vary_headers: meta.headers.clone(),
            },
        )
        .await;
    let mut rebuilt = Response::new(request, meta.status, meta.protocol, meta.headers, ResponseBody::from_bytes(bytes));
    rebuilt.network_response = Some(network_meta);
    Ok(rebuilt)
}

/// The cache hit path never touched the network, so it has no live
/// `Request` to borrow; `Request` isn't `Clone` (its body may be a
/// single-pass stream), so a cache hit is reconstructed with an empty body
/// — cached GET requests never carry one anyway.
fn clone_request_for_cache_hit(request: &crate::request::Request) -> crate::request::Request {
    crate::request::RequestBuilder::new(request.method().clone(), request.url().as_str())
        .build()
        .unwrap_or_else(|_| {
            crate::request::RequestBuilder::new(Method::GET, "http://invalid.invalid/")
                .build()
                .expect("static fallback url always builds")
        })
}
