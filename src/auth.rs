//! §6 `Authenticator`: given a route and a challenging response, returns a
//! new request with credentials or `None` to give up.

use std::fmt;

use async_trait::async_trait;

use crate::{address::Route, request::Request, response::Response};

/// Supplies credentials in response to a 401 (server) or 407 (proxy)
/// challenge. Implementations must detect their own prior failure to avoid
/// retrying the same credentials forever (§6).
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, route: &Route, response: &Response) -> Option<Request>;
}

impl fmt::Debug for dyn Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Authenticator")
    }
}

/// The zero-config default: never supplies credentials, so a 401/407 is
/// simply returned to the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuthenticator;

#[async_trait]
impl Authenticator for NoAuthenticator {
    async fn authenticate(&self, _route: &Route, _response: &Response) -> Option<Request> {
        None
    }
}
