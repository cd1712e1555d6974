//! The Bridge interceptor (§4.1 point 3): translates an application
//! [`Request`] into the exact headers the wire needs, and folds cookies and
//! response headers back for the caller.

use async_trait::async_trait;
use http::{
    header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, COOKIE, HOST, SET_COOKIE, TRANSFER_ENCODING, USER_AGENT},
    HeaderValue,
};

use crate::{
    call::interceptor::{Chain, Interceptor},
    error::Error,
    response::Response,
};

const DEFAULT_USER_AGENT: &str = concat!("corewire/", env!("CARGO_PKG_VERSION"));

pub(crate) struct BridgeInterceptor;

#[async_trait]
impl Interceptor for BridgeInterceptor {
    async fn intercept(&self, mut chain: Chain) -> Result<Response, Error> {
        let listener = chain.state().config.event_listener.clone();
        let cookie_jar = chain.state().config.cookie_jar.clone();
        let url = chain.request().url().clone();

        let host_header = host_header_value(&url)?;
        let body_len = chain.request().body().and_then(|b| b.content_length());
        let has_body = chain.request().body().is_some();
        let cookies = cookie_jar.load_for_request(&url);

        let headers = chain.request_mut().headers_mut();
        if headers.get(HOST).is_none() {
            headers.insert(HOST, host_header);
        }
        if headers.get(USER_AGENT).is_none() {
            headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        }
        let transparent_gzip = headers.get(ACCEPT_ENCODING).is_none();
        if transparent_gzip {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(default_accept_encoding()));
        }
        match body_len {
            Some(len) => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from_str(&len.to_string()).unwrap());
            }
            None if has_body => {
                headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
            None => {}
        }
        for cookie in cookies {
            headers.append(COOKIE, cookie);
        }

        listener.request_headers(chain.request());
        let mut response = chain.proceed().await?;

        listener.response_headers(&response);
        let set_cookies: Vec<_> = response.headers().get_all(SET_COOKIE).iter().cloned().collect();
        if !set_cookies.is_empty() {
            cookie_jar.save_from_response(&url, set_cookies);
        }

        if transparent_gzip && is_gzip_encoded(&response) {
            decode_gzip(&mut response);
        }

        Ok(response)
    }
}

fn host_header_value(url: &url::Url) -> Result<HeaderValue, Error> {
    let host = url.host_str().ok_or_else(|| Error::builder("request url has no host"))?;
    let value = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    HeaderValue::from_str(&value).map_err(|e| Error::builder(format!("invalid Host header: {e}")))
}

#[cfg(feature = "gzip")]
fn default_accept_encoding() -> &'static str {
    "gzip"
}

#[cfg(not(feature = "gzip"))]
fn default_accept_encoding() -> &'static str {
    "identity"
}

fn is_gzip_encoded(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"))
}

#[cfg(feature = "gzip")]
fn decode_gzip(response: &mut Response) {
    response.headers.remove(CONTENT_ENCODING);
    response.headers.remove(CONTENT_LENGTH);
    if let Some(body) = response.body.take() {
        response.body = Some(body.gunzip());
    }
}

#[cfg(not(feature = "gzip"))]
fn decode_gzip(_response: &mut Response) {}

#[cfg(all(test, feature = "gzip"))]
mod tests {
    use super::*;
    use crate::{
        body::ResponseBody,
        call::interceptor::{CallState, Interceptor, Rest},
        config::EngineBuilder,
        request::RequestBuilder,
        response::Protocol,
    };
    use std::io::Write;
    use std::sync::Arc;

    /// Stands in for the network: returns a canned gzip-encoded response and
    /// lets the test assert on the request headers the bridge built.
    struct TerminalInterceptor {
        compressed: Vec<u8>,
    }

    #[async_trait]
    impl Interceptor for TerminalInterceptor {
        async fn intercept(&self, chain: crate::call::interceptor::Chain) -> Result<Response, Error> {
            assert_eq!(chain.request().headers().get(ACCEPT_ENCODING).unwrap(), "gzip");
            let mut headers = http::HeaderMap::new();
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            headers.insert(CONTENT_LENGTH, HeaderValue::from_str(&self.compressed.len().to_string()).unwrap());
            let request = Arc::new(chain.request().try_clone().unwrap());
            Ok(Response::new(
                request,
                http::StatusCode::OK,
                Protocol::Http11,
                headers,
                ResponseBody::from_bytes(bytes::Bytes::from(self.compressed.clone())),
            ))
        }
    }

    async fn run_bridge(compressed: Vec<u8>) -> Response {
        let config = Arc::new(EngineBuilder::new().build());
        let state = CallState::new(config);
        let interceptors: Arc<Vec<Arc<dyn Interceptor>>> =
            Arc::new(vec![Arc::new(BridgeInterceptor), Arc::new(TerminalInterceptor { compressed })]);
        let request = RequestBuilder::new(http::Method::GET, "https://example.test/").build().unwrap();
        Rest::new(interceptors, state).invoke(request).await.unwrap()
    }

    #[tokio::test]
    async fn transparently_decodes_a_gzip_response_when_caller_set_no_accept_encoding() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"decoded by the bridge").unwrap();
        let compressed = encoder.finish().unwrap();

        let response = run_bridge(compressed).await;
        assert!(response.headers().get(CONTENT_ENCODING).is_none());
        let body = response.bytes().await.unwrap();
        assert_eq!(body, bytes::Bytes::from_static(b"decoded by the bridge"));
    }
}
