//! The Retry & Follow-up interceptor (§4.1 point 2): the one stage allowed
//! to re-enter the remainder of the chain more than once per call, driving
//! redirects (3xx + `Location`) and authentication challenges (401/407).

use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, StatusCode};

use crate::{
    body::Body,
    call::interceptor::{CallState, Chain, Interceptor},
    error::Error,
    request::Request,
    response::Response,
};

pub(crate) struct RetryAndFollowupInterceptor;

#[async_trait]
impl Interceptor for RetryAndFollowupInterceptor {
    async fn intercept(&self, chain: Chain) -> Result<Response, Error> {
        let state = chain.state().clone();
        let config = state.config.clone();
        let rest = chain.rest();
        let replayable_body = chain.request().body().and_then(|b| b.try_clone());
        let mut request = chain.into_request();

        let mut follow_ups = 0usize;
        loop {
            if state.is_cancelled() {
                return Err(Error::canceled());
            }

            let uri: http::Uri = request.url().as_str().parse().unwrap_or_default();
            let response = rest.invoke(request).await?;

            match plan_follow_up(&response, &config, &replayable_body, &state).await {
                FollowUp::Done => return Ok(response),
                FollowUp::Next(next_request) => {
                    follow_ups += 1;
                    if follow_ups > config.redirect_limit {
                        return Err(Error::protocol("too many follow-up requests").with_uri(uri));
                    }
                    request = next_request;
                }
                FollowUp::GiveUp => return Ok(response),
            }
        }
    }
}

enum FollowUp {
    Done,
    Next(Request),
    GiveUp,
}

async fn plan_follow_up(
    response: &Response,
    config: &crate::config::EngineConfig,
    replayable_body: &Option<Body>,
    state: &Arc<CallState>,
) -> FollowUp {
    if response.status().is_redirection() {
        if !config.follow_redirects {
            return FollowUp::Done;
        }
        return match build_redirect(response, replayable_body) {
            Some(next) => FollowUp::Next(next),
            None => FollowUp::Done,
        };
    }

    if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::PROXY_AUTHENTICATION_REQUIRED) {
        // The connection bound for the just-finished attempt is still the
        // one named in `state` (the Connect interceptor only replaces it on
        // its next invocation), so it names the route that issued the
        // challenge.
        let route = match state.connection() {
            Some(bound) => bound.route().clone(),
            None => return FollowUp::Done,
        };
        let snapshot = snapshot_response(response);
        return match config.authenticator.authenticate(&route, &snapshot).await {
            Some(next) => FollowUp::Next(next),
            None => FollowUp::GiveUp,
        };
    }

    FollowUp::Done
}

fn snapshot_response(response: &Response) -> Response {
    Response::new(
        std::sync::Arc::new(response.request().try_clone().unwrap_or_else(|| {
            crate::request::RequestBuilder::new(response.request().method().clone(), response.request().url().as_str())
                .build()
                .expect("request url was already valid once")
        })),
        response.status(),
        response.protocol(),
        response.headers().clone(),
        crate::body::ResponseBody::empty(),
    )
}

fn build_redirect(response: &Response, replayable_body: &Option<Body>) -> Option<Request> {
    let location = response.headers().get(http::header::LOCATION)?.to_str().ok()?;
    let base = response.request().url();
    let target = base.join(location).ok()?;
    if target.scheme() != "http" && target.scheme() != "https" {
        return None;
    }
    // §7 rule (b): same-scheme redirects and http->https upgrades are
    // allowed; an https->http downgrade is not.
    if base.scheme() == "https" && target.scheme() == "http" {
        return None;
    }

    let cross_origin = (base.scheme(), base.host_str(), base.port_or_known_default())
        != (target.scheme(), target.host_str(), target.port_or_known_default());

    let original_method = response.request().method().clone();
    let (method, keep_body) = match response.status() {
        StatusCode::SEE_OTHER => (Method::GET, false),
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => {
            if original_method == Method::POST {
                (Method::GET, false)
            } else {
                (original_method, true)
            }
        }
        StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => (original_method, true),
        _ => return None,
    };

    let mut builder = crate::request::RequestBuilder::new(method.clone(), target.as_str());
    for (name, value) in response.request().headers() {
        if name == http::header::HOST || name == http::header::CONTENT_LENGTH || name == http::header::TRANSFER_ENCODING {
            continue;
        }
        // §7 rule (d): authorization and cookie headers don't follow a
        // redirect across origins.
        if cross_origin && (name == http::header::AUTHORIZATION || name == http::header::COOKIE) {
            continue;
        }
        builder = builder.add_header(name.clone(), value.clone());
    }
    if keep_body && !matches!(method, Method::GET | Method::HEAD) {
        if let Some(body) = replayable_body.as_ref().and_then(|b| b.try_clone()) {
            builder = builder.body(body);
        }
    }
    builder.build().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{body::ResponseBody, request::RequestBuilder, response::Protocol};
    use http::HeaderValue;

    fn response_with(base_url: &str, location: &str, extra_headers: &[(http::HeaderName, &str)]) -> Response {
        let mut builder = RequestBuilder::new(Method::GET, base_url);
        for (name, value) in extra_headers {
            builder = builder.add_header(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        let request = Arc::new(builder.build().unwrap());
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::LOCATION, HeaderValue::from_str(location).unwrap());
        Response::new(request, StatusCode::FOUND, Protocol::Http11, headers, ResponseBody::empty())
    }

    #[test]
    fn cross_origin_redirect_strips_authorization_and_cookie() {
        let response = response_with(
            "https://a.test/start",
            "https://b.test/elsewhere",
            &[(http::header::AUTHORIZATION, "Bearer secret"), (http::header::COOKIE, "session=abc")],
        );
        let redirected = build_redirect(&response, &None).expect("redirect should be built");
        assert!(redirected.headers().get(http::header::AUTHORIZATION).is_none());
        assert!(redirected.headers().get(http::header::COOKIE).is_none());
    }

    #[test]
    fn same_origin_redirect_keeps_authorization_and_cookie() {
        let response = response_with(
            "https://a.test/start",
            "https://a.test/elsewhere",
            &[(http::header::AUTHORIZATION, "Bearer secret"), (http::header::COOKIE, "session=abc")],
        );
        let redirected = build_redirect(&response, &None).expect("redirect should be built");
        assert_eq!(redirected.headers().get(http::header::AUTHORIZATION).unwrap().to_str().unwrap(), "Bearer secret");
        assert_eq!(redirected.headers().get(http::header::COOKIE).unwrap().to_str().unwrap(), "session=abc");
    }

    #[test]
    fn https_to_http_downgrade_is_rejected() {
        let response = response_with("https://a.test/start", "http://a.test/elsewhere", &[]);
        assert!(build_redirect(&response, &None).is_none());
    }

    #[test]
    fn http_to_https_upgrade_is_allowed() {
        let response = response_with("http://a.test/start", "https://a.test/elsewhere", &[]);
        assert!(build_redirect(&response, &None).is_some());
    }

    #[test]
    fn different_port_same_host_counts_as_cross_origin() {
        let response = response_with(
            "https://a.test/start",
            "https://a.test:8443/elsewhere",
            &[(http::header::AUTHORIZATION, "Bearer secret")],
        );
        let redirected = build_redirect(&response, &None).expect("redirect should be built");
        assert!(redirected.headers().get(http::header::AUTHORIZATION).is_none());
    }
}
