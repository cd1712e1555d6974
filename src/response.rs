//! §3 `Response`.

use std::sync::Arc;

use http::{HeaderMap, StatusCode};

use crate::{
    body::ResponseBody,
    error::Error,
    request::Request,
    tls::HandshakeInfo,
};

/// The wire protocol a response was obtained over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http10,
    Http11,
    H2,
    H2c,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http10 => "http/1.0",
            Protocol::Http11 => "http/1.1",
            Protocol::H2 => "h2",
            Protocol::H2c => "h2c",
        }
    }
}

/// A response, with references back to its originating request and to the
/// network/cache sub-responses that produced it (§3; either may be absent,
/// e.g. a pure cache hit has no network response, a pure network miss has
/// no cache response).
pub struct Response {
    pub(crate) request: Arc<Request>,
    pub(crate) status: StatusCode,
    pub(crate) reason: Option<String>,
    pub(crate) protocol: Protocol,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<ResponseBody>,
    pub(crate) handshake: Option<HandshakeInfo>,
    pub(crate) network_response: Option<Box<ResponseMeta>>,
    pub(crate) cache_response: Option<Box<ResponseMeta>>,
}

/// A lightweight snapshot of a sub-response (network- or cache-obtained)
/// kept for diagnostics without requiring the body be retained twice.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub protocol: Protocol,
}

impl Response {
    pub(crate) fn new(
        request: Arc<Request>,
        status: StatusCode,
        protocol: Protocol,
        headers: HeaderMap,
        body: ResponseBody,
    ) -> Self {
        Response {
            request,
            status,
            reason: None,
            protocol,
            headers,
            body: Some(body),
            handshake: None,
            network_response: None,
            cache_response: None,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn handshake(&self) -> Option<&HandshakeInfo> {
        self.handshake.as_ref()
    }

    pub fn network_response(&self) -> Option<&ResponseMeta> {
        self.network_response.as_deref()
    }

    pub fn cache_response(&self) -> Option<&ResponseMeta> {
        self.cache_response.as_deref()
    }

    /// Take ownership of the single-pass response body (§3).
    pub fn into_body(mut self) -> ResponseBody {
        self.body.take().unwrap_or_else(ResponseBody::empty)
    }

    /// Buffer and return the body as bytes.
    pub async fn bytes(self) -> Result<bytes::Bytes, Error> {
        self.into_body().bytes().await
    }

    /// Buffer and decode the body as UTF-8 text.
    pub async fn text(self) -> Result<String, Error> {
        self.into_body().text().await
    }

    /// Turns a 4xx/5xx response into an `Err(Error)`, otherwise returns
    /// `Ok(self)` unchanged.
    pub fn error_for_status(self) -> Result<Self, Error> {
        if self.status.is_client_error() || self.status.is_server_error() {
            let uri: http::Uri = self.request.url().as_str().parse().unwrap_or_else(|_| http::Uri::default());
            Err(Error::status(uri, self.status))
        } else {
            Ok(self)
        }
    }

    pub(crate) fn meta(&self) -> ResponseMeta {
        ResponseMeta {
            status: self.status,
            headers: self.headers.clone(),
            protocol: self.protocol,
        }
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("protocol", &self.protocol)
            .field("headers", &self.headers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBuilder;
    use http::Method;

    fn req() -> Arc<Request> {
        Arc::new(RequestBuilder::new(Method::GET, "https://example.test/").build().unwrap())
    }

    #[test]
    fn error_for_status_passes_through_2xx() {
        let resp = Response::new(req(), StatusCode::OK, Protocol::H2, HeaderMap::new(), ResponseBody::empty());
        assert!(resp.error_for_status().is_ok());
    }

    #[test]
    fn error_for_status_fails_4xx() {
        let resp = Response::new(req(), StatusCode::NOT_FOUND, Protocol::H2, HeaderMap::new(), ResponseBody::empty());
        let err = resp.error_for_status().unwrap_err();
        assert!(err.is_status());
        assert_eq!(err.status_code(), Some(StatusCode::NOT_FOUND));
    }
}
