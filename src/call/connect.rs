//! The Connect interceptor (§4.1 point 5): turns the request's URL into an
//! [`Address`](crate::address::Address) and asks the Coordinator for a
//! bound connection before handing off to the Network interceptor.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    address::Address,
    call::interceptor::{Chain, Interceptor},
    coordinator::Coordinator,
    error::Error,
    response::Response,
};

pub(crate) struct ConnectInterceptor {
    pub(crate) coordinator: Arc<Coordinator>,
}

#[async_trait]
impl Interceptor for ConnectInterceptor {
    async fn intercept(&self, chain: Chain) -> Result<Response, Error> {
        if chain.connection().is_some() {
            // A previous attempt within the same call already bound one
            // (e.g. the retry interceptor re-entered the chain downstream
            // of a connection it wants to keep using).
            return chain.proceed().await;
        }

        let config = chain.state().config.clone();
        let url = chain.request().url().clone();
        let address = Address::new(
            url.host_str().ok_or_else(|| Error::builder("request url has no host"))?.to_string(),
            url.port_or_known_default().ok_or_else(|| Error::builder("request url has no resolvable port"))?,
            url.scheme() == "https",
            config.dns.clone(),
            if url.scheme() == "https" { config.tls.clone() } else { None },
            config.protocols.clone(),
            config.proxy_selector.clone(),
            Some(config.authenticator.clone()),
        );

        let state = chain.state().clone();
        let event_listener = config.event_listener.clone();
        let bound = self
            .coordinator
            .acquire(&address, &url, &event_listener, &state.failed_routes)
            .await?;
        event_listener.connection_acquired(bound.route());
        state.bind_connection(bound.clone());

        let response = chain.proceed().await;
        event_listener.connection_released(bound.route());
        bound.release();
        response
    }
}
