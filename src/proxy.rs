//! Proxy selection (§4.2 point 3: `proxySelector(url)` is one axis of route
//! planning).

use std::{fmt, net::SocketAddr};

use url::Url;

/// A concrete proxy endpoint a route may tunnel or relay through.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Proxy {
    Http(SocketAddr),
    Https(SocketAddr),
}

/// Chooses zero or more proxy candidates for a given target URL. Returning
/// an empty vec means "connect directly". Multiple entries let the
/// coordinator fail over (§4.2).
pub trait ProxySelector: Send + Sync {
    fn select(&self, url: &Url) -> Vec<Option<Proxy>>;
}

impl fmt::Debug for dyn ProxySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn ProxySelector")
    }
}

/// Always connects directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProxySelector;

impl ProxySelector for NoProxySelector {
    fn select(&self, _url: &Url) -> Vec<Option<Proxy>> {
        vec![None]
    }
}

/// Always routes through one fixed proxy, falling back to a direct
/// connection if the proxy route fails.
#[derive(Debug, Clone)]
pub struct FixedProxySelector {
    proxy: Proxy,
    fallback_direct: bool,
}

impl FixedProxySelector {
    pub fn new(proxy: Proxy, fallback_direct: bool) -> Self {
        Self { proxy, fallback_direct }
    }
}

impl ProxySelector for FixedProxySelector {
    fn select(&self, _url: &Url) -> Vec<Option<Proxy>> {
        if self.fallback_direct {
            vec![Some(self.proxy.clone()), None]
        } else {
            vec![Some(self.proxy.clone())]
        }
    }
}
