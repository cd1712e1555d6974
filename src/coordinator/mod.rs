//! The Connection Coordinator (§4.2): resolves a route (proxy selection,
//! DNS, peer IP fallback), acquires a pooled connection or opens a new one,
//! and hands the caller a bound exchange slot.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use url::Url;

use crate::{
    address::{Address, Route},
    config::EngineConfig,
    error::Error,
    h2::connection::H2Connection,
    listener::EventListener,
    pool::{BoxedIo, ConnectionKind, ConnectionPool, PoolEntry},
    proxy::Proxy,
    trace::debug,
};

/// A connection handed to an exchange: the pool entry plus the resolved
/// route it was acquired over.
pub struct BoundConnection {
    pub(crate) entry: Arc<PoolEntry>,
    pool: Arc<ConnectionPool>,
}

impl BoundConnection {
    pub fn route(&self) -> &Route {
        &self.entry.route
    }

    pub(crate) fn kind(&self) -> &ConnectionKind {
        &self.entry.kind
    }

    pub(crate) fn release(&self) {
        self.pool.release(&self.entry);
    }
}

/// Resolves routes and opens connections on the pool's behalf.
pub struct Coordinator {
    pool: Arc<ConnectionPool>,
    config: Arc<EngineConfig>,
}

impl Coordinator {
    pub fn new(pool: Arc<ConnectionPool>, config: Arc<EngineConfig>) -> Self {
        Coordinator { pool, config }
    }

    /// §4.2: reuse without route -> coalescing candidate -> route planning
    /// (proxy-major, IP-minor) -> reuse with route -> connect.
    pub(crate) async fn acquire(
        &self,
        address: &Address,
        url: &Url,
        event_listener: &Arc<dyn EventListener>,
        failed_routes: &std::sync::Mutex<Vec<Route>>,
    ) -> Result<Arc<BoundConnection>, Error> {
        if let Some(entry) = self.pool.acquire_for_address(address) {
            entry.mark_allocated();
            return Ok(self.bind(entry));
        }
        if let Some(entry) = self.pool.candidate_for_coalescing(address) {
            entry.mark_allocated();
            return Ok(self.bind(entry));
        }

        let mut last_err: Option<Error> = None;
        for proxy in address.proxy_selector.select(url) {
            let candidate_peers: Vec<std::net::IpAddr> = match &proxy {
                Some(Proxy::Http(socket)) | Some(Proxy::Https(socket)) => vec![socket.ip()],
                None => {
                    event_listener.dns_start(address.host());
                    match address.dns.lookup(address.host()).await {
                        Ok(ips) => {
                            event_listener.dns_end(address.host(), Ok(()));
                            ips
                        }
                        Err(e) => {
                            event_listener.dns_end(address.host(), Err(&e));
                            last_err = Some(e);
                            continue;
                        }
                    }
                }
            };

            for peer in candidate_peers {
                let route = Route::new(address.clone(), proxy.clone(), peer);
                if failed_routes.lock().unwrap().iter().any(|r| routes_eq(r, &route)) {
                    continue;
                }
                if let Some(entry) = self.pool.acquire_for_route(&route) {
                    entry.mark_allocated();
                    return Ok(self.bind(entry));
                }
                event_listener.connect_start(&route);
                match self.connect(&route).await {
                    Ok(entry) => {
                        event_listener.connect_end(&route, Ok(()));
                        entry.mark_allocated();
                        self.pool.insert(entry.clone());
                        return Ok(self.bind(entry));
                    }
                    Err(e) => {
                        event_listener.connect_end(&route, Err(&e));
                        failed_routes.lock().unwrap().push(route);
                        last_err = Some(e);
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::connect("no candidate routes")))
    }

    fn bind(&self, entry: Arc<PoolEntry>) -> Arc<BoundConnection> {
        Arc::new(BoundConnection { entry, pool: self.pool.clone() })
    }

    async fn connect(&self, route: &Route) -> Result<Arc<PoolEntry>, Error> {
        let timeouts = self.config.timeouts;
        let peer_addr = match route.proxy() {
            Some(Proxy::Http(socket)) | Some(Proxy::Https(socket)) => *socket,
            None => SocketAddr::new(route.peer(), route.address().port()),
        };
        let tcp = tokio::time::timeout(timeouts.connect, TcpStream::connect(peer_addr))
            .await
            .map_err(Error::timeout)?
            .map_err(Error::connect)?;
        let _ = tcp.set_nodelay(true);

        let io: BoxedIo = if let Some(proxy) = route.proxy() {
            let tunneled = tunnel_connect(tcp, proxy, route.address(), timeouts.connect).await?;
            BoxedIo::new(tunneled)
        } else {
            BoxedIo::new(tcp)
        };

        if route.address().is_https() {
            self.tls_connect(io, route).await
        } else {
            Ok(PoolEntry::new(route.clone(), ConnectionKind::Http1(std::sync::Mutex::new(Some(io))), 1))
        }
    }

    #[cfg(feature = "rustls-tls")]
    async fn tls_connect(&self, io: BoxedIo, route: &Route) -> Result<Arc<PoolEntry>, Error> {
        use rustls::ServerName;

        let tls_config = route
            .address()
            .tls
            .as_ref()
            .ok_or_else(|| Error::tls_handshake("https address missing TlsConfig"))?;
        let alpn: Vec<Vec<u8>> = route.address().protocols.iter().map(|p| p.alpn_id().to_vec()).collect();
        let client_config = tls_config.rustls_config_for(&alpn);
        let connector = tokio_rustls::TlsConnector::from(client_config);
        let server_name = ServerName::try_from(route.address().host())
            .map_err(|e| Error::tls_handshake(format!("invalid server name: {e}")))?;

        let timeouts = self.config.timeouts;
        let tls_stream = tokio::time::timeout(timeouts.connect, connector.connect(server_name, io))
            .await
            .map_err(Error::timeout)?
            .map_err(Error::tls_handshake)?;

        let negotiated_h2 = tls_stream.get_ref().1.alpn_protocol() == Some(b"h2".as_slice());
        let boxed = BoxedIo::new(tls_stream);

        if negotiated_h2 {
            let h2_conn = H2Connection::connect(boxed, self.config.h2).await?;
            debug!(host = route.address().host(), "negotiated h2");
            Ok(PoolEntry::new(route.clone(), ConnectionKind::Http2(h2_conn), self.config.h2.max_concurrent_streams_hint as usize))
        } else {
            Ok(PoolEntry::new(route.clone(), ConnectionKind::Http1(std::sync::Mutex::new(Some(boxed))), 1))
        }
    }

    #[cfg(not(feature = "rustls-tls"))]
    async fn tls_connect(&self, _io: BoxedIo, _route: &Route) -> Result<Arc<PoolEntry>, Error> {
        Err(Error::tls_handshake("no TLS provider compiled in (enable the rustls-tls feature)"))
    }
}

fn routes_eq(a: &Route, b: &Route) -> bool {
    a.address() == b.address() && a.peer() == b.peer() && a.proxy() == b.proxy()
}

async fn tunnel_connect(mut tcp: TcpStream, _proxy: &Proxy, target: &Address, timeout: Duration) -> Result<TcpStream, Error> {
    let request = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n",
        host = target.host(),
        port = target.port()
    );
    tokio::time::timeout(timeout, async {
        tcp.write_all(request.as_bytes()).await.map_err(Error::connect)?;
        let mut buf = Vec::with_capacity(256);
        let mut byte = [0u8; 1];
        loop {
            let n = tcp.read(&mut byte).await.map_err(Error::connect)?;
            if n == 0 {
                return Err(Error::connect("proxy closed connection during CONNECT"));
            }
            buf.push(byte[0]);
            if buf.ends_with(b"\r\n\r\n") {
                break;
            }
            if buf.len() > 8192 {
                return Err(Error::connect("proxy CONNECT response too large"));
            }
        }
        let status_line = String::from_utf8_lossy(&buf);
        if !status_line.starts_with("HTTP/1.1 200") && !status_line.starts_with("HTTP/1.0 200") {
            return Err(Error::connect(format!("proxy CONNECT failed: {}", status_line.lines().next().unwrap_or(""))));
        }
        Ok(tcp)
    })
    .await
    .map_err(Error::timeout)?
}
