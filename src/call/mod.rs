//! The call pipeline (§4.1): assembles the fixed interceptor chain around
//! any user-supplied application/network interceptors and exposes the
//! public, cancellable [`Call`] handle.

pub(crate) mod interceptor;

mod bridge;
mod cache;
mod connect;
mod network;
mod retry;

use std::{sync::Arc, time::Instant};

use crate::{
    config::EngineConfig,
    coordinator::Coordinator,
    dispatcher::Dispatcher,
    error::Error,
    request::Request,
    response::Response,
};

use interceptor::{run_chain, CallState, Interceptor};

/// Builds the fixed pipeline (§4.1 point 1): user interceptors, then retry
/// and follow-up, bridge, cache, connect; user network interceptors; then
/// the terminal network interceptor that actually talks to the wire.
pub(crate) fn build_chain(config: &Arc<EngineConfig>, coordinator: Arc<Coordinator>) -> Arc<Vec<Arc<dyn Interceptor>>> {
    let mut chain: Vec<Arc<dyn Interceptor>> = Vec::with_capacity(
        config.interceptors.len() + config.network_interceptors.len() + 5,
    );
    chain.extend(config.interceptors.iter().cloned());
    chain.push(Arc::new(retry::RetryAndFollowupInterceptor));
    chain.push(Arc::new(bridge::BridgeInterceptor));
    chain.push(Arc::new(cache::CacheInterceptor));
    chain.push(Arc::new(connect::ConnectInterceptor { coordinator }));
    chain.extend(config.network_interceptors.iter().cloned());
    chain.push(Arc::new(network::NetworkInterceptor));
    Arc::new(chain)
}

/// A single, in-flight (or already-executed) HTTP exchange (§3 "Call").
/// Created by [`crate::client::Engine::call`]; not reusable once executed
/// (matches the Request/Response ownership model: executing a call
/// consumes its request).
pub struct Call {
    interceptors: Arc<Vec<Arc<dyn Interceptor>>>,
    dispatcher: Arc<Dispatcher>,
    state: Arc<CallState>,
    request: Option<Request>,
}

impl Call {
    pub(crate) fn new(
        interceptors: Arc<Vec<Arc<dyn Interceptor>>>,
        dispatcher: Arc<Dispatcher>,
        config: Arc<EngineConfig>,
        request: Request,
    ) -> Self {
        Call {
            interceptors,
            dispatcher,
            state: CallState::new(config),
            request: Some(request),
        }
    }

    /// Cancel this call. Safe to call from another task; in-flight reads
    /// and the connect attempt observe it at their next await point.
    pub fn cancel(&self) {
        self.state.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Execute the call, running it through the full interceptor chain.
    /// Consumes `self`: a `Call` is single-shot, same as its `Request`.
    pub async fn execute(mut self) -> Result<Response, Error> {
        let request = self.request.take().ok_or_else(|| Error::programming("call already executed"))?;
        let listener = self.state.config.event_listener.clone();
        let started_at = Instant::now();
        listener.call_start(&request);

        // `call_failed` needs a `Request` to report on, but the chain
        // consumes its own; a method+url placeholder (no body, no other
        // headers) is enough for a diagnostic callback.
        let method = request.method().clone();
        let url = request.url().clone();
        let host = url.host_str().unwrap_or_default().to_string();

        let _permit = self.dispatcher.acquire(&host).await;
        let result = run_chain(self.interceptors.clone(), self.state.clone(), request).await;

        match &result {
            Ok(response) => listener.call_end(response.request(), started_at.elapsed()),
            Err(e) => {
                if let Ok(placeholder) = crate::request::RequestBuilder::new(method, url.as_str()).build() {
                    listener.call_failed(&placeholder, e, started_at.elapsed());
                }
            }
        }
        result
    }
}
