//! The top-level public API (§2, §6): [`Engine`] ties the connection pool,
//! coordinator, dispatcher and interceptor chain together behind a handle
//! cheap to clone and share across tasks.

use std::sync::Arc;

use http::Method;

use crate::{
    address::{Address, Protocol as AddressProtocol},
    call::{self, interceptor::Interceptor, Call},
    config::{EngineBuilder, EngineConfig},
    coordinator::Coordinator,
    dispatcher::Dispatcher,
    error::Error,
    pool::{ConnectionKind, ConnectionPool},
    request::{Request, RequestBuilder},
    ws::{self, WebSocket},
};

/// A configured HTTP engine (§2 "Engine"). Cheap to clone: everything it
/// owns is already behind an `Arc`, matching the shared-immutable-config,
/// shared-mutable-pool split the rest of the crate is built around.
#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    coordinator: Arc<Coordinator>,
    interceptors: Arc<Vec<Arc<dyn Interceptor>>>,
    dispatcher: Arc<Dispatcher>,
}

impl Engine {
    /// Start building an engine with defaults (§9: no implicit global
    /// instance — every caller builds and owns its own).
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Build an engine from an already-assembled configuration.
    pub fn new(config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let pool = ConnectionPool::new(config.pool);
        let coordinator = Arc::new(Coordinator::new(pool, config.clone()));
        let interceptors = call::build_chain(&config, coordinator.clone());
        let dispatcher = Arc::new(Dispatcher::new(config.dispatcher));
        Engine { config, coordinator, interceptors, dispatcher }
    }

    /// Prepare a [`Call`] for `request`. Nothing happens on the wire until
    /// [`Call::execute`] is awaited.
    pub fn call(&self, request: Request) -> Call {
        Call::new(self.interceptors.clone(), self.dispatcher.clone(), self.config.clone(), request)
    }

    /// Convenience: build and issue a `GET` in one step.
    pub fn get(&self, url: &str) -> Result<Call, crate::error::Error> {
        let request = RequestBuilder::new(Method::GET, url).build()?;
        Ok(self.call(request))
    }

    /// Opens a WebSocket (§4.5): acquires a fresh HTTP/1.1 connection for
    /// `request`'s `ws://`/`wss://` URL, performs the Upgrade handshake, and
    /// hands the raw stream to the frame reader/writer. The connection this
    /// uses is never returned to the pool, even if the upgrade fails.
    pub async fn websocket(&self, request: Request) -> Result<Arc<WebSocket>, Error> {
        let url = request.url().clone();
        let https = match url.scheme() {
            "wss" => true,
            "ws" => false,
            other => return Err(Error::builder(format!("unsupported websocket scheme {other}"))),
        };
        let address = Address::new(
            url.host_str().ok_or_else(|| Error::builder("websocket url has no host"))?.to_string(),
            url.port_or_known_default().ok_or_else(|| Error::builder("websocket url has no resolvable port"))?,
            https,
            self.config.dns.clone(),
            if https { self.config.tls.clone() } else { None },
            std::sync::Arc::from([AddressProtocol::Http1_1]),
            self.config.proxy_selector.clone(),
            Some(self.config.authenticator.clone()),
        );

        let event_listener = self.config.event_listener.clone();
        let failed_routes = std::sync::Mutex::new(Vec::new());
        let bound = self.coordinator.acquire(&address, &url, &event_listener, &failed_routes).await?;

        let io = match bound.kind() {
            ConnectionKind::Http1(slot) => slot.lock().unwrap().take().ok_or_else(Error::connection_shutdown)?,
            ConnectionKind::Http2(_) => return Err(Error::protocol("websocket upgrade requires an http/1.1 connection")),
        };

        let result = ws::connect(io, &request, self.config.ws).await;
        bound.entry.close();
        result
    }

    pub(crate) fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }
}

impl Default for Engine {
    /// Builds an engine with every default (§9): system DNS, no proxy, no
    /// cookie jar, no cache, no authenticator, a no-op event listener, and
    /// (when the `rustls-tls` feature is on) webpki's bundled roots.
    fn default() -> Self {
        Engine::new(EngineBuilder::new().build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_engine_builds_without_panicking() {
        let _engine = Engine::default();
    }

    #[test]
    fn get_rejects_an_invalid_url() {
        let engine = Engine::default();
        assert!(engine.get("not a url").is_err());
    }
}
