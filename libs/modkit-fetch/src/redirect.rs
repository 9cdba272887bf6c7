//! Redirect following.
//!
//! Each hop is a bare `GET` to the resolved `Location`: the method, configured
//! headers and body of the original request are not replayed. Only the
//! transport options travel along.

use crate::config::TransportOptions;
use crate::dispatch::{Dispatcher, ResolvedRequest};
use crate::error::{FetchError, InvalidUriKind};
use crate::response::ResponseBody;
use crate::telemetry::{Telemetry, TelemetryEvent};
use http::Response;
use http::header::LOCATION;
use std::sync::Arc;
use url::Url;

/// Redirects followed per fetch call before giving up.
pub const MAX_REDIRECTS: usize = 20;

/// Target of `response` if it is a redirect the pipeline should follow:
/// a 3xx status with a `Location` header, resolved against `current`.
///
/// # Errors
/// Returns `FetchError::InvalidUri` if `Location` does not resolve to a URL.
pub fn redirect_target<B>(current: &Url, response: &Response<B>) -> Result<Option<Url>, FetchError> {
    if !response.status().is_redirection() {
        return Ok(None);
    }
    let Some(location) = response.headers().get(LOCATION) else {
        return Ok(None);
    };
    let location = location.to_str().map_err(|e| {
        FetchError::invalid_uri(current.as_str(), InvalidUriKind::BadLocation, e)
    })?;
    current
        .join(location)
        .map(Some)
        .map_err(|e| FetchError::invalid_uri(location, InvalidUriKind::BadLocation, e))
}

/// Follows redirect chains up to a fixed bound.
#[derive(Debug, Clone, Copy)]
pub struct RedirectFollower {
    max: usize,
}

impl Default for RedirectFollower {
    fn default() -> Self {
        Self { max: MAX_REDIRECTS }
    }
}

impl RedirectFollower {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max(&self) -> usize {
        self.max
    }

    /// Follow `response` until a non-redirect arrives.
    ///
    /// Every hop pushes its target to the `redirects` fact and emits
    /// `redirect` before the request goes out. Returns the final URL with its
    /// response.
    ///
    /// # Errors
    /// Returns `FetchError::RedirectLimitExceeded` when a redirect arrives
    /// after `max` hops, or any dispatch error of a hop.
    pub async fn follow(
        &self,
        dispatcher: &Dispatcher<'_>,
        mut url: Url,
        transport: &Arc<TransportOptions>,
        mut response: Response<ResponseBody>,
        telemetry: &Telemetry,
    ) -> Result<(Url, Response<ResponseBody>), FetchError> {
        let mut count = 0;
        while let Some(target) = redirect_target(&url, &response)? {
            if count >= self.max {
                tracing::warn!(max = self.max, url = %url, "redirect limit exceeded");
                return Err(FetchError::RedirectLimitExceeded { max: self.max });
            }
            count += 1;

            tracing::debug!(
                hop = count,
                status = response.status().as_u16(),
                from = %url,
                to = %target,
                "following redirect"
            );
            telemetry.push("redirects", target.as_str());
            telemetry.emit(TelemetryEvent::Redirect);

            drop(response);
            response = dispatcher
                .send(ResolvedRequest::redirect_hop(
                    target.clone(),
                    Arc::clone(transport),
                ))
                .await?;
            url = target;
        }
        Ok((url, response))
    }
}
