//! The engine's single error type.
//!
//! Every failure surfaced to a caller is a [`Error`] wrapping one of a closed
//! set of [`Kind`]s (see §7 of the specification this crate implements).
//! Callers are expected to branch on the `is_*` predicates, not the `Debug`
//! output.

use std::{error::Error as StdError, fmt, io};

use http::Uri;

/// A `Result` alias where the `Err` case is [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// A boxed error type used internally to erase the concrete source error.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// The error returned by every fallible operation in this crate.
pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: Kind,
    source: Option<BoxError>,
    uri: Option<Uri>,
}

/// §7 error kinds: what the caller should do about the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// The call was cancelled. Terminal; the engine never retries it.
    Canceled,
    /// A call/connect/read/write bound was exceeded.
    Timeout,
    /// DNS resolution returned no addresses.
    UnknownHost,
    /// TCP connect or proxy `CONNECT` failed.
    Connect,
    /// TLS handshake or certificate validation failed.
    TlsHandshake,
    /// A wire-level protocol violation (HTTP/1.1, HTTP/2, or WebSocket).
    Protocol,
    /// The peer reset an HTTP/2 stream.
    Http2StreamReset,
    /// The connection observed GOAWAY or otherwise stopped taking exchanges.
    ConnectionShutdown,
    /// An unclassified I/O error.
    Io,
    /// A WebSocket text message's payload was not valid UTF-8 (close code
    /// 1007, distinct from other protocol violations which close 1002).
    InvalidUtf8,
    /// A WebSocket ping went unanswered within its interval.
    WebsocketTimeout,
    /// The WebSocket peer never completed the close handshake in time.
    ClosedAbnormally,
    /// Programming error: e.g. an interceptor called `proceed` twice.
    Programming,
    /// Request/response builder misuse.
    Builder,
    /// A redirect could not be followed as specified by the active policy.
    Redirect,
    /// The server responded with an HTTP error status surfaced via
    /// `Response::error_for_status`.
    Status(http::StatusCode),
}

impl Error {
    pub(crate) fn new<E>(kind: Kind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(Inner {
                kind,
                source: source.map(Into::into),
                uri: None,
            }),
        }
    }

    pub(crate) fn canceled() -> Error {
        Error::new(Kind::Canceled, None::<BoxError>)
    }

    pub(crate) fn timeout<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Timeout, Some(e))
    }

    pub(crate) fn unknown_host(host: &str) -> Error {
        Error::new(Kind::UnknownHost, Some(format!("no addresses for {host}")))
    }

    pub(crate) fn connect<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Connect, Some(e))
    }

    pub(crate) fn tls_handshake<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::TlsHandshake, Some(e))
    }

    pub(crate) fn protocol<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Protocol, Some(e))
    }

    pub(crate) fn http2_reset(code: u32) -> Error {
        Error::new(Kind::Http2StreamReset, Some(format!("stream reset, code={code}")))
    }

    pub(crate) fn connection_shutdown() -> Error {
        Error::new(Kind::ConnectionShutdown, None::<BoxError>)
    }

    pub(crate) fn io(e: io::Error) -> Error {
        Error::new(Kind::Io, Some(e))
    }

    pub(crate) fn invalid_utf8<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::InvalidUtf8, Some(e))
    }

    pub(crate) fn websocket_timeout() -> Error {
        Error::new(Kind::WebsocketTimeout, None::<BoxError>)
    }

    pub(crate) fn closed_abnormally() -> Error {
        Error::new(Kind::ClosedAbnormally, None::<BoxError>)
    }

    pub(crate) fn programming<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Programming, Some(e))
    }

    pub(crate) fn builder<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Builder, Some(e))
    }

    pub(crate) fn redirect<E: Into<BoxError>>(e: E, uri: Uri) -> Error {
        Error::new(Kind::Redirect, Some(e)).with_uri(uri)
    }

    pub(crate) fn status(uri: Uri, status: http::StatusCode) -> Error {
        Error::new(Kind::Status(status), None::<BoxError>).with_uri(uri)
    }

    /// The kind of failure this error represents.
    pub fn kind(&self) -> Kind {
        self.inner.kind
    }

    /// Attach a URI to this error (overwriting any existing one).
    pub fn with_uri(mut self, uri: Uri) -> Self {
        self.inner.uri = Some(uri);
        self
    }

    /// The URI related to this error, if any.
    pub fn uri(&self) -> Option<&Uri> {
        self.inner.uri.as_ref()
    }

    /// True if the engine will not retry this call on its own.
    pub fn is_canceled(&self) -> bool {
        matches!(self.inner.kind, Kind::Canceled)
    }

    /// True if some bound (call/connect/read/write) was exceeded.
    pub fn is_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::Timeout | Kind::WebsocketTimeout)
    }

    /// True if DNS resolution failed.
    pub fn is_unknown_host(&self) -> bool {
        matches!(self.inner.kind, Kind::UnknownHost)
    }

    /// True if the failure happened while establishing a connection.
    pub fn is_connect(&self) -> bool {
        matches!(self.inner.kind, Kind::Connect | Kind::TlsHandshake)
    }

    /// True if the failure was a wire-level protocol violation.
    pub fn is_protocol(&self) -> bool {
        matches!(self.inner.kind, Kind::Protocol | Kind::InvalidUtf8)
    }

    /// True if the failure came from following a redirect.
    pub fn is_redirect(&self) -> bool {
        matches!(self.inner.kind, Kind::Redirect)
    }

    /// True if this error was generated from `error_for_status`.
    pub fn is_status(&self) -> bool {
        matches!(self.inner.kind, Kind::Status(_))
    }

    /// The status code, if this error came from `error_for_status`.
    pub fn status_code(&self) -> Option<http::StatusCode> {
        match self.inner.kind {
            Kind::Status(code) => Some(code),
            _ => None,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut b = f.debug_struct("corewire::Error");
        b.field("kind", &self.inner.kind);
        if let Some(uri) = &self.inner.uri {
            b.field("uri", uri);
        }
        if let Some(source) = &self.inner.source {
            b.field("source", source);
        }
        b.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.kind {
            Kind::Canceled => f.write_str("call canceled")?,
            Kind::Timeout => f.write_str("timed out")?,
            Kind::UnknownHost => f.write_str("unknown host")?,
            Kind::Connect => f.write_str("connect failed")?,
            Kind::TlsHandshake => f.write_str("tls handshake failed")?,
            Kind::Protocol => f.write_str("protocol error")?,
            Kind::Http2StreamReset => f.write_str("http/2 stream reset")?,
            Kind::ConnectionShutdown => f.write_str("connection is shutting down")?,
            Kind::Io => f.write_str("io error")?,
            Kind::InvalidUtf8 => f.write_str("invalid utf-8 in websocket text message")?,
            Kind::WebsocketTimeout => f.write_str("websocket ping timed out")?,
            Kind::ClosedAbnormally => f.write_str("websocket closed abnormally")?,
            Kind::Programming => f.write_str("programming error")?,
            Kind::Builder => f.write_str("builder error")?,
            Kind::Redirect => f.write_str("error following redirect")?,
            Kind::Status(code) => write!(f, "http status error ({code})")?,
        }
        if let Some(uri) = &self.inner.uri {
            write!(f, " for uri ({uri})")?;
        }
        if let Some(e) = &self.inner.source {
            write!(f, ": {e}")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_ref().map(|e| &**e as _)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn error_is_send_sync() {
        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn kind_predicates() {
        let e = Error::canceled();
        assert!(e.is_canceled());
        assert!(!e.is_timeout());

        let e = Error::timeout("slow");
        assert!(e.is_timeout());
    }

    #[test]
    fn source_chain() {
        let root = Error::connect("dns failed");
        let wrapped = Error::protocol(root);
        assert!(wrapped.source().is_some());
    }

    #[test]
    fn display_includes_uri() {
        let uri: Uri = "https://example.test/a".parse().unwrap();
        let e = Error::redirect("too many redirects", uri.clone());
        let s = e.to_string();
        assert!(s.contains("example.test"));
        assert_eq!(e.uri(), Some(&uri));
    }
}
