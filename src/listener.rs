//! §6 `EventListener`: observability callbacks at well-defined moments.
//! Implementations must be cheap and non-blocking; they are invoked inline
//! on the calling task.

use std::{fmt, net::SocketAddr, time::Duration};

use crate::{
    address::Route,
    error::Error,
    request::Request,
    response::Response,
    trace::{debug, trace, warn},
};

/// Observability callbacks fired by the Bridge and Connect interceptors and
/// by the Connection Coordinator at the moments named below (§6).
#[allow(unused_variables)]
pub trait EventListener: Send + Sync {
    fn call_start(&self, request: &Request) {}
    fn dns_start(&self, host: &str) {}
    fn dns_end(&self, host: &str, result: Result<(), &Error>) {}
    fn connect_start(&self, route: &Route) {}
    fn connect_end(&self, route: &Route, result: Result<(), &Error>) {}
    fn secure_connect_start(&self, route: &Route) {}
    fn secure_connect_end(&self, route: &Route, result: Result<(), &Error>) {}
    fn connection_acquired(&self, route: &Route) {}
    fn connection_released(&self, route: &Route) {}
    fn request_headers(&self, request: &Request) {}
    fn request_body(&self, bytes_written: u64) {}
    fn response_headers(&self, response: &Response) {}
    fn response_body(&self, bytes_read: u64) {}
    fn call_end(&self, request: &Request, duration: Duration) {}
    fn call_failed(&self, request: &Request, error: &Error, duration: Duration) {}
}

impl fmt::Debug for dyn EventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn EventListener")
    }
}

/// Used only so call sites that take a `Route` but have no socket address
/// yet can still log something meaningful for `connect_start`.
#[allow(dead_code)]
pub(crate) fn route_addr(route: &Route) -> SocketAddr {
    SocketAddr::new(route.peer(), route.address().port())
}

/// The zero-config default: discards every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventListener;

impl EventListener for NoopEventListener {}

/// Emits one `tracing` event per callback at `debug` level (§2's ambient
/// logging addition).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventListener;

impl EventListener for TracingEventListener {
    fn call_start(&self, request: &Request) {
        debug!(url = %request.url(), method = %request.method(), "call_start");
    }

    fn dns_start(&self, host: &str) {
        debug!(host, "dns_start");
    }

    fn dns_end(&self, host: &str, result: Result<(), &Error>) {
        debug!(host, ok = result.is_ok(), "dns_end");
    }

    fn connect_start(&self, route: &Route) {
        debug!(host = route.address().host(), peer = %route.peer(), "connect_start");
    }

    fn connect_end(&self, route: &Route, result: Result<(), &Error>) {
        debug!(host = route.address().host(), ok = result.is_ok(), "connect_end");
    }

    fn secure_connect_start(&self, route: &Route) {
        debug!(host = route.address().host(), "secure_connect_start");
    }

    fn secure_connect_end(&self, route: &Route, result: Result<(), &Error>) {
        debug!(host = route.address().host(), ok = result.is_ok(), "secure_connect_end");
    }

    fn connection_acquired(&self, route: &Route) {
        debug!(host = route.address().host(), "connection_acquired");
    }

    fn connection_released(&self, route: &Route) {
        debug!(host = route.address().host(), "connection_released");
    }

    fn request_headers(&self, request: &Request) {
        trace!(url = %request.url(), "request_headers");
    }

    fn request_body(&self, bytes_written: u64) {
        trace!(bytes_written, "request_body");
    }

    fn response_headers(&self, response: &Response) {
        debug!(status = %response.status(), protocol = response.protocol().as_str(), "response_headers");
    }

    fn response_body(&self, bytes_read: u64) {
        trace!(bytes_read, "response_body");
    }

    fn call_end(&self, request: &Request, duration: Duration) {
        debug!(url = %request.url(), ms = duration.as_millis() as u64, "call_end");
    }

    fn call_failed(&self, request: &Request, error: &Error, duration: Duration) {
        warn!(url = %request.url(), %error, ms = duration.as_millis() as u64, "call_failed");
    }
}
