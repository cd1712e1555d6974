//! A client-side HTTP engine: a layered interceptor chain sitting in front
//! of a connection pool/coordinator, a framed HTTP/2 multiplexer, and a
//! WebSocket frame reader/writer, wired together behind [`Engine`].
//!
//! There is no implicit global instance — build one with [`Engine::builder`]
//! and share the resulting handle (it is cheap to clone).

#[macro_use]
mod trace;

mod address;
mod auth;
mod body;
mod cache;
mod call;
mod client;
mod config;
mod coordinator;
mod cookie;
mod dispatcher;
mod dns;
mod error;
mod h2;
mod listener;
mod pool;
mod proxy;
mod request;
mod response;
mod tls;
mod ws;

pub use crate::{
    address::{Address, Protocol, Route},
    auth::{Authenticator, NoAuthenticator},
    body::{Body, ResponseBody},
    cache::{Cache, CacheEntry, MemoryCache},
    call::{
        interceptor::{Chain, Interceptor},
        Call,
    },
    client::Engine,
    config::{
        DispatcherConfig, EngineBuilder, EngineConfig, Http2Config, PoolConfig, Timeouts, WebSocketConfig,
    },
    cookie::{CookieJar, NoCookieJar},
    dns::{Dns, StaticDns, SystemDns},
    error::{Error, Kind as ErrorKind, Result},
    listener::{EventListener, NoopEventListener, TracingEventListener},
    proxy::{FixedProxySelector, NoProxySelector, Proxy, ProxySelector},
    request::{CacheControl, Request, RequestBuilder},
    response::{Protocol as ResponseProtocol, Response, ResponseMeta},
    tls::{HandshakeInfo, TlsConfig, TlsVersion},
    ws::{Message, WebSocket},
};

#[cfg(feature = "cookies")]
pub use crate::cookie::Jar;
