//! §3 `Request` and the §6 request builder surface.

use std::{collections::HashMap, fmt, sync::Arc};

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;

use crate::{body::Body, error::Error};

/// Controls how the cache interceptor (§4.1 point 4) treats this request,
/// mirroring the HTTP `Cache-Control` request directives.
#[derive(Debug, Clone, Default)]
pub struct CacheControl {
    pub no_cache: bool,
    pub no_store: bool,
    pub max_age: Option<std::time::Duration>,
    pub only_if_cached: bool,
}

/// An immutable, fully-built HTTP request (§3).
///
/// Not `Clone`: a streaming [`Body`] cannot be duplicated. Use
/// [`Request::try_clone`] where a replayable copy is required.
pub struct Request {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<Body>,
    pub(crate) tags: Arc<HashMap<&'static str, Arc<dyn std::any::Any + Send + Sync>>>,
    pub(crate) cache_control: CacheControl,
}

impl Request {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn cache_control(&self) -> &CacheControl {
        &self.cache_control
    }

    pub fn tag<T: 'static + Send + Sync>(&self, key: &'static str) -> Option<Arc<T>> {
        self.tags
            .get(key)
            .and_then(|v| v.clone().downcast::<T>().ok())
    }

    /// Try to clone this request including a replayable body (bytes-backed
    /// bodies only). Used by the retry/follow-up interceptor (§4.1 point 2,
    /// §7) to reissue a request on a fresh connection.
    pub(crate) fn try_clone(&self) -> Option<Request> {
        let body = match &self.body {
            None => None,
            Some(b) => Some(b.try_clone()?),
        };
        Some(Request {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body,
            tags: self.tags.clone(),
            cache_control: self.cache_control.clone(),
        })
    }

    pub(crate) fn with_url_and_method(&self, url: Url, method: Method) -> Request {
        Request {
            method,
            url,
            headers: self.headers.clone(),
            body: self.body.as_ref().and_then(|b| b.try_clone()),
            tags: self.tags.clone(),
            cache_control: self.cache_control.clone(),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .finish()
    }
}

/// Builds a [`Request`] (§6: `method`, `url`, `header`, `addHeader`,
/// `removeHeader`, `cacheControl`, `tag`).
#[derive(Debug)]
pub struct RequestBuilder {
    method: Method,
    url: Result<Url, Error>,
    headers: HeaderMap,
    body: Option<Body>,
    tags: HashMap<&'static str, Arc<dyn std::any::Any + Send + Sync>>,
    cache_control: CacheControl,
}

impl RequestBuilder {
    pub fn new(method: Method, url: &str) -> Self {
        RequestBuilder {
            method,
            url: url.parse().map_err(|e| Error::builder(format!("invalid url: {e}"))),
            headers: HeaderMap::new(),
            body: None,
            tags: HashMap::new(),
            cache_control: CacheControl::default(),
        }
    }

    /// Override the method set at construction time.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn add_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn remove_header(mut self, name: &HeaderName) -> Self {
        self.headers.remove(name);
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn cache_control(mut self, cache_control: CacheControl) -> Self {
        self.cache_control = cache_control;
        self
    }

    pub fn tag<T: 'static + Send + Sync>(mut self, key: &'static str, value: T) -> Self {
        self.tags.insert(key, Arc::new(value));
        self
    }

    /// Validate and finish building the request.
    ///
    /// `GET`/`HEAD` reject a body; the other common verbs require one
    /// (possibly zero-length), per §6.
    pub fn build(self) -> Result<Request, Error> {
        let url = self.url?;
        let has_body = self.body.is_some();

        if matches!(self.method, Method::GET | Method::HEAD) && has_body {
            return Err(Error::builder(format!(
                "{} requests must not have a body",
                self.method
            )));
        }

        let needs_body = matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        );
        let body = if needs_body {
            Some(self.body.unwrap_or_else(Body::empty))
        } else {
            self.body
        };

        Ok(Request {
            method: self.method,
            url,
            headers: self.headers,
            body,
            tags: Arc::new(self.tags),
            cache_control: self.cache_control,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_rejects_a_body() {
        let err = RequestBuilder::new(Method::GET, "https://example.test/")
            .body("nope")
            .build()
            .unwrap_err();
        assert!(err.is_status() == false);
    }

    #[test]
    fn post_defaults_to_empty_body() {
        let req = RequestBuilder::new(Method::POST, "https://example.test/").build().unwrap();
        assert!(req.body().unwrap().is_empty());
    }

    #[test]
    fn tags_round_trip() {
        let req = RequestBuilder::new(Method::GET, "https://example.test/")
            .tag("trace-id", 42u64)
            .build()
            .unwrap();
        assert_eq!(*req.tag::<u64>("trace-id").unwrap(), 42);
        assert!(req.tag::<String>("trace-id").is_none());
    }

    #[test]
    fn header_overwrites_add_header_appends() {
        let req = RequestBuilder::new(Method::GET, "https://example.test/")
            .header(http::header::ACCEPT, HeaderValue::from_static("a"))
            .add_header(http::header::ACCEPT, HeaderValue::from_static("b"))
            .build()
            .unwrap();
        let values: Vec<_> = req.headers().get_all(http::header::ACCEPT).iter().collect();
        assert_eq!(values.len(), 2);
    }
}
