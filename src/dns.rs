//! §6 `Dns` collaborator: `lookup(host) -> ordered list of IPs`; an empty
//! list is classified as `UnknownHost`.

use std::{
    collections::HashMap,
    fmt,
    net::IpAddr,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Resolves a hostname to an ordered list of candidate IP addresses.
///
/// Implementations must be safe for concurrent invocation (§6).
#[async_trait]
pub trait Dns: Send + Sync {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>>;
}

impl fmt::Debug for dyn Dns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Dns")
    }
}

/// The default resolver: the platform's `getaddrinfo` via
/// `tokio::net::lookup_host`, run on Tokio's blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDns;

#[async_trait]
impl Dns for SystemDns {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(Error::io)?
            .map(|addr| addr.ip())
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(Error::unknown_host(host));
        }
        Ok(addrs)
    }
}

/// A fixed host->IPs map, useful for tests that need deterministic routing
/// without touching the real resolver.
#[derive(Debug, Default, Clone)]
pub struct StaticDns {
    entries: Arc<RwLock<HashMap<String, Vec<IpAddr>>>>,
}

impl StaticDns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, host: impl Into<String>, addrs: Vec<IpAddr>) {
        self.entries.write().unwrap().insert(host.into(), addrs);
    }
}

#[async_trait]
impl Dns for StaticDns {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>> {
        match self.entries.read().unwrap().get(host) {
            Some(addrs) if !addrs.is_empty() => Ok(addrs.clone()),
            _ => Err(Error::unknown_host(host)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_dns_round_trips() {
        let dns = StaticDns::new();
        dns.insert("a.test", vec!["127.0.0.1".parse().unwrap()]);
        let addrs = dns.lookup("a.test").await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn unknown_host_is_unknown_host_error() {
        let dns = StaticDns::new();
        let err = dns.lookup("missing.test").await.unwrap_err();
        assert!(err.is_unknown_host());
    }
}
