//! Tower layers applied by the hyper transport.

use crate::error::FetchError;
use http::header::USER_AGENT;
use http::{HeaderMap, HeaderValue, Request};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Layer that fills in headers the request does not already carry.
#[derive(Debug, Clone, Default)]
pub struct DefaultHeadersLayer {
    headers: HeaderMap,
}

impl DefaultHeadersLayer {
    /// Layer that only supplies `User-Agent`.
    ///
    /// # Errors
    /// Returns `FetchError::InvalidHeaderValue` if `user_agent` is not a valid header value.
    pub fn user_agent(user_agent: &str) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
        Ok(Self { headers })
    }
}

impl<S> Layer<S> for DefaultHeadersLayer {
    type Service = DefaultHeaders<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DefaultHeaders {
            inner,
            headers: self.headers.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DefaultHeaders<S> {
    inner: S,
    headers: HeaderMap,
}

impl<S, B> Service<Request<B>> for DefaultHeaders<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        for (name, value) in &self.headers {
            if !req.headers().contains_key(name) {
                req.headers_mut().insert(name.clone(), value.clone());
            }
        }
        self.inner.call(req)
    }
}
