//! The interceptor chain capability handle (§4.1).
//!
//! Each interceptor receives a [`Chain`] representing its position in the
//! pipeline and, to continue, calls [`Chain::proceed`]. `proceed` takes
//! `self` by value: the Rust type system makes "call it at most once per
//! invocation" a compile error rather than a runtime check, which is the
//! idiomatic equivalent of the guard the base design calls for.
//!
//! The retry/follow-up interceptor is the one piece of the pipeline allowed
//! to re-enter the remainder of the chain more than once (§4.1 point 2): it
//! does so through [`Chain::rest`], a cloneable continuation rather than the
//! one-shot `Chain` itself.

use std::{
    cell::Cell,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Instant,
};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{
    coordinator::BoundConnection, config::EngineConfig, error::Error, request::Request,
    response::Response,
};

/// One stage of the pipeline. Implementations must be cheap to clone via
/// `Arc` and safe to invoke from any task.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, chain: Chain) -> Result<Response, Error>;
}

/// Per-call shared state visible to every interceptor invocation: the
/// cancellation flag, the currently bound connection (if the Connect
/// interceptor has run), and the routes already tried and failed.
pub(crate) struct CallState {
    pub(crate) config: Arc<EngineConfig>,
    cancelled: AtomicBool,
    cancel_notify: Notify,
    bound_connection: Mutex<Option<Arc<BoundConnection>>>,
    pub(crate) failed_routes: Mutex<Vec<crate::address::Route>>,
    pub(crate) started_at: Instant,
}

impl CallState {
    pub(crate) fn new(config: Arc<EngineConfig>) -> Arc<Self> {
        Arc::new(CallState {
            config,
            cancelled: AtomicBool::new(false),
            cancel_notify: Notify::new(),
            bound_connection: Mutex::new(None),
            failed_routes: Mutex::new(Vec::new()),
            started_at: Instant::now(),
        })
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_waiters();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel()` has been called; used by long-running reads
    /// (HTTP/2 streams, WebSocket frames) to race against I/O in a
    /// `tokio::select!`.
    pub(crate) async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.cancel_notify.notified().await;
    }

    pub(crate) fn bind_connection(&self, conn: Arc<BoundConnection>) {
        *self.bound_connection.lock().unwrap() = Some(conn);
    }

    pub(crate) fn connection(&self) -> Option<Arc<BoundConnection>> {
        self.bound_connection.lock().unwrap().clone()
    }
}

/// A reusable continuation pointing at a fixed position in the interceptor
/// list. Distinct from [`Chain`] in that invoking it does not consume
/// anything — the retry/follow-up interceptor calls `invoke` once per
/// attempt, each call producing a fresh one-shot `Chain` for the
/// interceptors downstream of it.
#[derive(Clone)]
pub(crate) struct Rest {
    interceptors: Arc<Vec<Arc<dyn Interceptor>>>,
    index: usize,
    state: Arc<CallState>,
}

impl Rest {
    pub(crate) fn new(interceptors: Arc<Vec<Arc<dyn Interceptor>>>, state: Arc<CallState>) -> Self {
        Rest { interceptors, index: 0, state }
    }

    pub(crate) async fn invoke(&self, request: Request) -> Result<Response, Error> {
        if self.state.is_cancelled() {
            return Err(Error::canceled());
        }
        let interceptor = self
            .interceptors
            .get(self.index)
            .ok_or_else(|| Error::programming("interceptor chain exhausted: no terminal interceptor"))?
            .clone();
        let chain = Chain {
            rest: Rest {
                interceptors: self.interceptors.clone(),
                index: self.index + 1,
                state: self.state.clone(),
            },
            request,
            calls: Cell::new(0),
        };
        interceptor.intercept(chain).await
    }
}

/// The capability handle passed to one interceptor invocation.
pub struct Chain {
    rest: Rest,
    request: Request,
    calls: Cell<u8>,
}

impl Chain {
    /// The request this interceptor invocation should handle.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Mutable access to the in-flight request, for interceptors that only
    /// need to add/rewrite headers (Bridge, Cache) without touching the
    /// body — which, being possibly a single-pass stream, cannot always be
    /// cloned into a brand new `Request`.
    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// The connection currently bound to this call, if the Connect
    /// interceptor (or an earlier attempt) has already acquired one.
    pub fn connection(&self) -> Option<Arc<BoundConnection>> {
        self.rest.state.connection()
    }

    pub fn timeouts(&self) -> crate::config::Timeouts {
        self.rest.state.config.timeouts
    }

    pub(crate) fn state(&self) -> &Arc<CallState> {
        &self.rest.state
    }

    /// Continue to the next interceptor with the request as currently held
    /// by this chain (possibly header-modified via [`Chain::request_mut`]).
    /// Consumes `self`: a second call would not compile, which is how this
    /// crate enforces "at most once per invocation".
    pub async fn proceed(self) -> Result<Response, Error> {
        self.calls.set(self.calls.get() + 1);
        self.rest.invoke(self.request).await
    }

    /// Exposed only to the retry/follow-up interceptor: a continuation it
    /// may invoke multiple times, once per attempt, each with a freshly
    /// built follow-up `Request`.
    pub(crate) fn rest(&self) -> Rest {
        self.rest.clone()
    }

    /// Consumes the chain and hands back its request without invoking
    /// anything downstream. Used only by the retry/follow-up interceptor,
    /// which drives [`Chain::rest`] directly across possibly many attempts
    /// instead of a single `proceed`.
    pub(crate) fn into_request(self) -> Request {
        self.request
    }
}

pub(crate) async fn run_chain(
    interceptors: Arc<Vec<Arc<dyn Interceptor>>>,
    state: Arc<CallState>,
    request: Request,
) -> Result<Response, Error> {
    Rest::new(interceptors, state).invoke(request).await
}
