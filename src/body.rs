//! A request/response body producer (§3): either a known-length in-memory
//! buffer or a streaming source.

use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_core::Stream;

use crate::error::{BoxError, Error};

type DynStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send + Sync>>;

enum Inner {
    Empty,
    Bytes(Bytes),
    Streaming { len: Option<u64>, stream: DynStream },
}

/// A request or response body.
///
/// A `Body` constructed from bytes is cheaply cloneable (and therefore
/// replayable for redirects and retries, §7); a streaming `Body` is not.
pub struct Body {
    inner: Inner,
}

impl Body {
    /// An empty, zero-length body (valid for `POST`/`PUT`/`PATCH`/`DELETE`,
    /// which the builder surface requires a body for, §6).
    pub fn empty() -> Self {
        Body { inner: Inner::Empty }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Body { inner: Inner::Bytes(bytes.into()) }
    }

    /// A streaming body of unknown or known length. Streaming bodies without
    /// a known length force `Transfer-Encoding: chunked` in the bridge
    /// interceptor.
    pub fn streaming<S>(len: Option<u64>, stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, BoxError>> + Send + Sync + 'static,
    {
        Body {
            inner: Inner::Streaming { len, stream: Box::pin(stream) },
        }
    }

    /// Exact length, if known up front (drives the `Content-Length` vs.
    /// `Transfer-Encoding: chunked` choice in the bridge interceptor, §4.1).
    pub fn content_length(&self) -> Option<u64> {
        match &self.inner {
            Inner::Empty => Some(0),
            Inner::Bytes(b) => Some(b.len() as u64),
            Inner::Streaming { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.inner, Inner::Empty) || matches!(&self.inner, Inner::Bytes(b) if b.is_empty())
    }

    /// Clone this body if it is replayable (bytes-backed); streaming bodies
    /// return `None`, which the redirect/retry interceptors use to decide
    /// whether a follow-up request can be reissued (§7).
    pub fn try_clone(&self) -> Option<Body> {
        match &self.inner {
            Inner::Empty => Some(Body::empty()),
            Inner::Bytes(b) => Some(Body::from_bytes(b.clone())),
            Inner::Streaming { .. } => None,
        }
    }

    pub(crate) fn into_stream(self) -> DynStream {
        match self.inner {
            Inner::Empty => Box::pin(futures_util::stream::empty()),
            Inner::Bytes(b) => Box::pin(futures_util::stream::once(async move { Ok(b) })),
            Inner::Streaming { stream, .. } => stream,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Empty => f.write_str("Body(empty)"),
            Inner::Bytes(b) => write!(f, "Body({} bytes)", b.len()),
            Inner::Streaming { len, .. } => write!(f, "Body(streaming, len={len:?})"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::from_bytes(b)
    }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self {
        Body::from_bytes(b)
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::from_bytes(s.into_bytes())
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::from_bytes(s.as_bytes())
    }
}

/// A single-pass response body consumer (§3): bytes delivered are exactly
/// the wire bytes after transfer-encoding and content-encoding have been
/// removed (invariant (e)).
pub struct ResponseBody {
    pub(crate) stream: DynStream,
}

impl ResponseBody {
    pub(crate) fn new(stream: DynStream) -> Self {
        ResponseBody { stream }
    }

    pub(crate) fn from_bytes(bytes: Bytes) -> Self {
        ResponseBody::new(Box::pin(futures_util::stream::once(async move { Ok(bytes) })))
    }

    pub(crate) fn empty() -> Self {
        ResponseBody::new(Box::pin(futures_util::stream::empty()))
    }

    /// Buffer the entire body into memory.
    pub async fn bytes(mut self) -> Result<Bytes, Error> {
        use futures_util::StreamExt;
        let mut buf = Vec::new();
        while let Some(chunk) = self.stream.next().await {
            buf.extend_from_slice(&chunk.map_err(Error::protocol)?);
        }
        Ok(Bytes::from(buf))
    }

    /// Buffer the entire body and decode it as UTF-8 text.
    pub async fn text(self) -> Result<String, Error> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(Error::protocol)
    }
}

#[cfg(feature = "gzip")]
impl ResponseBody {
    /// Transparently inflates a gzip-encoded body (§4.1 point 3, invariant
    /// (e)): the compressed body is buffered, then decoded as one chunk.
    pub(crate) fn gunzip(self) -> ResponseBody {
        ResponseBody::new(Box::pin(futures_util::stream::once(async move {
            let compressed = self.bytes().await.map_err(|e| -> BoxError { Box::new(e) })?;
            let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
            let mut out = Vec::new();
            std::io::Read::read_to_end(&mut decoder, &mut out).map_err(|e| -> BoxError { Box::new(e) })?;
            Ok(Bytes::from(out))
        })))
    }
}

impl Stream for ResponseBody {
    type Item = Result<Bytes, BoxError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseBody")
    }
}

#[cfg(all(test, feature = "gzip"))]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn gunzip_inflates_a_compressed_body() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"the quick brown fox jumps over the lazy dog").unwrap();
        let compressed = encoder.finish().unwrap();

        let body = ResponseBody::from_bytes(Bytes::from(compressed)).gunzip();
        let inflated = body.bytes().await.unwrap();
        assert_eq!(inflated, Bytes::from_static(b"the quick brown fox jumps over the lazy dog"));
    }
}
