//! Ambient configuration layer (§2, §9): every tunable the core needs lives
//! on one immutable [`EngineConfig`] built via [`EngineBuilder`], rather than
//! behind mutable process-wide globals.

use std::{sync::Arc, time::Duration};

use crate::{
    address::Protocol,
    auth::{Authenticator, NoAuthenticator},
    cache::Cache,
    call::interceptor::Interceptor,
    cookie::{CookieJar, NoCookieJar},
    dns::{Dns, SystemDns},
    listener::{EventListener, NoopEventListener},
    proxy::{NoProxySelector, ProxySelector},
    tls::TlsConfig,
};

/// Connection pool caps (§4.3).
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_idle_per_address: usize,
    pub max_idle_total: usize,
    pub keep_alive: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_idle_per_address: 5,
            max_idle_total: 32,
            keep_alive: Duration::from_secs(300),
        }
    }
}

/// Async dispatcher caps (§5): total in-flight async calls and per-host
/// in-flight async calls.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub max_in_flight: usize,
    pub max_in_flight_per_host: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            max_in_flight: 64,
            max_in_flight_per_host: 5,
        }
    }
}

/// HTTP/2 tunables (§4.4).
#[derive(Debug, Clone, Copy)]
pub struct Http2Config {
    pub initial_window_size: u32,
    pub max_concurrent_streams_hint: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
    pub ping_interval: Duration,
}

impl Default for Http2Config {
    fn default() -> Self {
        Http2Config {
            initial_window_size: 65_535,
            max_concurrent_streams_hint: 100,
            max_frame_size: 16_384,
            max_header_list_size: 16 * 1024,
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// WebSocket tunables (§4.5).
#[derive(Debug, Clone, Copy)]
pub struct WebSocketConfig {
    pub ping_interval: Duration,
    pub max_frame_payload: usize,
    pub permessage_deflate: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            ping_interval: Duration::from_secs(20),
            max_frame_payload: 1 << 20,
            permessage_deflate: false,
        }
    }
}

/// Every timeout named in §4.1.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub call: Option<Duration>,
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            call: None,
            connect: Duration::from_secs(10),
            read: Duration::from_secs(30),
            write: Duration::from_secs(30),
        }
    }
}

/// The fully-resolved, immutable engine configuration (§2, §9).
pub struct EngineConfig {
    pub(crate) timeouts: Timeouts,
    pub(crate) pool: PoolConfig,
    pub(crate) dispatcher: DispatcherConfig,
    pub(crate) h2: Http2Config,
    pub(crate) ws: WebSocketConfig,
    pub(crate) protocols: Arc<[Protocol]>,
    pub(crate) dns: Arc<dyn Dns>,
    pub(crate) proxy_selector: Arc<dyn ProxySelector>,
    pub(crate) cookie_jar: Arc<dyn CookieJar>,
    pub(crate) cache: Option<Arc<dyn Cache>>,
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) event_listener: Arc<dyn EventListener>,
    pub(crate) interceptors: Vec<Arc<dyn Interceptor>>,
    pub(crate) network_interceptors: Vec<Arc<dyn Interceptor>>,
    pub(crate) follow_redirects: bool,
    pub(crate) redirect_limit: usize,
    pub(crate) tls: Option<TlsConfig>,
}

/// Builds an [`EngineConfig`] (§6 builder surface, §9 redesign note: no
/// process-wide default — callers construct and own their configuration).
pub struct EngineBuilder {
    timeouts: Timeouts,
    pool: PoolConfig,
    dispatcher: DispatcherConfig,
    h2: Http2Config,
    ws: WebSocketConfig,
    protocols: Arc<[Protocol]>,
    dns: Arc<dyn Dns>,
    proxy_selector: Arc<dyn ProxySelector>,
    cookie_jar: Arc<dyn CookieJar>,
    cache: Option<Arc<dyn Cache>>,
    authenticator: Arc<dyn Authenticator>,
    event_listener: Arc<dyn EventListener>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    network_interceptors: Vec<Arc<dyn Interceptor>>,
    follow_redirects: bool,
    redirect_limit: usize,
    tls: Option<TlsConfig>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        EngineBuilder {
            timeouts: Timeouts::default(),
            pool: PoolConfig::default(),
            dispatcher: DispatcherConfig::default(),
            h2: Http2Config::default(),
            ws: WebSocketConfig::default(),
            protocols: Arc::new([Protocol::H2, Protocol::Http1_1]),
            dns: Arc::new(SystemDns),
            proxy_selector: Arc::new(NoProxySelector),
            cookie_jar: Arc::new(NoCookieJar),
            cache: None,
            authenticator: Arc::new(NoAuthenticator),
            event_listener: Arc::new(NoopEventListener),
            interceptors: Vec::new(),
            network_interceptors: Vec::new(),
            follow_redirects: true,
            redirect_limit: 20,
            tls: default_tls_config(),
        }
    }
}

#[cfg(feature = "rustls-tls")]
fn default_tls_config() -> Option<TlsConfig> {
    Some(TlsConfig::webpki_roots())
}

#[cfg(not(feature = "rustls-tls"))]
fn default_tls_config() -> Option<TlsConfig> {
    None
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_timeout(mut self, d: Duration) -> Self {
        self.timeouts.call = Some(d);
        self
    }

    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.timeouts.connect = d;
        self
    }

    pub fn read_timeout(mut self, d: Duration) -> Self {
        self.timeouts.read = d;
        self
    }

    pub fn write_timeout(mut self, d: Duration) -> Self {
        self.timeouts.write = d;
        self
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn dispatcher(mut self, dispatcher: DispatcherConfig) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn http2(mut self, h2: Http2Config) -> Self {
        self.h2 = h2;
        self
    }

    pub fn websocket(mut self, ws: WebSocketConfig) -> Self {
        self.ws = ws;
        self
    }

    pub fn protocols(mut self, protocols: impl Into<Arc<[Protocol]>>) -> Self {
        self.protocols = protocols.into();
        self
    }

    pub fn dns(mut self, dns: Arc<dyn Dns>) -> Self {
        self.dns = dns;
        self
    }

    pub fn proxy_selector(mut self, selector: Arc<dyn ProxySelector>) -> Self {
        self.proxy_selector = selector;
        self
    }

    pub fn cookie_jar(mut self, jar: Arc<dyn CookieJar>) -> Self {
        self.cookie_jar = jar;
        self
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.authenticator = auth;
        self
    }

    pub fn event_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.event_listener = listener;
        self
    }

    pub fn add_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn add_network_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.network_interceptors.push(interceptor);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Hard cap on follow-up requests per call (§4.1: default 20).
    pub fn redirect_limit(mut self, limit: usize) -> Self {
        self.redirect_limit = limit;
        self
    }

    /// Override the default TLS configuration (trusted roots, cipher/version
    /// policy). Required before any `https://` call can succeed when the
    /// `rustls-tls` feature is disabled.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn build(self) -> EngineConfig {
        EngineConfig {
            timeouts: self.timeouts,
            pool: self.pool,
            dispatcher: self.dispatcher,
            h2: self.h2,
            ws: self.ws,
            protocols: self.protocols,
            dns: self.dns,
            proxy_selector: self.proxy_selector,
            cookie_jar: self.cookie_jar,
            cache: self.cache,
            authenticator: self.authenticator,
            event_listener: self.event_listener,
            interceptors: self.interceptors,
            network_interceptors: self.network_interceptors,
            follow_redirects: self.follow_redirects,
            redirect_limit: self.redirect_limit,
            tls: self.tls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_redirect_limit() {
        let cfg = EngineBuilder::new().build();
        assert_eq!(cfg.redirect_limit, 20);
        assert!(cfg.follow_redirects);
    }
}
