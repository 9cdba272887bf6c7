//! Request dispatch: turns a resolved request into one transport call.

use crate::config::{Body, BoxError, Configuration, RequestBody, TransportOptions};
use crate::error::FetchError;
use crate::response::ResponseBody;
use crate::telemetry::{Telemetry, TelemetryEvent};
use crate::transport::Transport;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response};
use http_body::{Body as HttpBody, Frame, SizeHint};
use http_body_util::BodyExt;
use pin_project_lite::pin_project;
use secrecy::ExposeSecret;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use url::Url;

/// Headers whose values never reach telemetry in clear text.
fn is_credential(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "authorization" | "proxy-authorization" | "cookie"
    )
}

/// Immutable input to a single dispatch attempt.
#[derive(Debug)]
pub struct ResolvedRequest {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Body,
    pub transport: Arc<TransportOptions>,
}

impl ResolvedRequest {
    /// Request for `url` carrying the configured method, headers and body.
    ///
    /// # Errors
    /// Returns `InvalidHeaderName` / `InvalidHeaderValue` for a bad
    /// configured header or `auth` value.
    pub fn from_config(url: Url, config: &Configuration) -> Result<Self, FetchError> {
        let mut headers = config.headers().to_header_map()?;
        for (name, value) in &mut headers {
            if is_credential(name) {
                value.set_sensitive(true);
            }
        }

        if let Some(content_type) = config.body().default_content_type()
            && !headers.contains_key(CONTENT_TYPE)
        {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }

        if let Some(auth) = &config.transport().auth
            && !headers.contains_key(AUTHORIZATION)
        {
            let encoded = STANDARD.encode(auth.expose_secret().as_bytes());
            let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Ok(Self {
            url,
            method: config.method().clone(),
            headers,
            body: config.body().clone(),
            transport: Arc::new(config.transport().clone()),
        })
    }

    /// Bare `GET` used for a redirect hop; only transport options carry over.
    #[must_use]
    pub fn redirect_hop(url: Url, transport: Arc<TransportOptions>) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: Body::Empty,
            transport,
        }
    }

    fn into_http(self) -> Result<(Request<RequestBody>, Arc<TransportOptions>), FetchError> {
        check_protocol(&self.url)?;
        let mut request = Request::builder()
            .method(self.method)
            .uri(self.url.as_str())
            .body(self.body.into_request_body()?)?;
        *request.headers_mut() = self.headers;
        Ok((request, self.transport))
    }
}

fn check_protocol(url: &Url) -> Result<(), FetchError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(FetchError::InvalidProtocol {
            protocol: format!("{other}:"),
        }),
    }
}

pin_project! {
    /// Request body that signals once its last frame has been handed to the
    /// connection.
    struct FlushSignalBody {
        #[pin]
        inner: RequestBody,
        done: Option<oneshot::Sender<()>>,
    }
}

impl FlushSignalBody {
    fn new(inner: RequestBody) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        if inner.is_end_stream() {
            _ = tx.send(());
            return (Self { inner, done: None }, rx);
        }
        (
            Self {
                inner,
                done: Some(tx),
            },
            rx,
        )
    }
}

impl HttpBody for FlushSignalBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        let polled = this.inner.as_mut().poll_frame(cx);
        let finished = match &polled {
            Poll::Ready(None) => true,
            Poll::Ready(Some(Ok(_))) => this.inner.is_end_stream(),
            _ => false,
        };
        if finished && let Some(tx) = this.done.take() {
            _ = tx.send(());
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Sends resolved requests through a [`Transport`].
#[derive(Clone, Copy)]
pub struct Dispatcher<'a> {
    transport: &'a dyn Transport,
}

impl<'a> Dispatcher<'a> {
    #[must_use]
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self { transport }
    }

    /// Send `request`, emitting `sent` once the body is flushed (or the
    /// response arrived first).
    ///
    /// # Errors
    /// Returns `FetchError::InvalidProtocol` for non-HTTP schemes,
    /// `BodyAlreadyConsumed` for a reused stream body, or the transport error.
    pub async fn dispatch(
        &self,
        request: ResolvedRequest,
        telemetry: &Telemetry,
    ) -> Result<Response<ResponseBody>, FetchError> {
        let (request, transport) = request.into_http()?;
        let (parts, body) = request.into_parts();
        let (body, flushed) = FlushSignalBody::new(body);
        let request = Request::from_parts(parts, body.boxed_unsync());

        tracing::debug!(method = %request.method(), uri = %request.uri(), "dispatching request");

        let send = self.transport.send(request, &transport);
        tokio::pin!(send);
        let mut flushed = flushed;
        let mut watching = true;
        let mut sent = false;

        let result = loop {
            tokio::select! {
                biased;
                res = &mut flushed, if watching => {
                    watching = false;
                    // Err: the body was dropped unfinished
                    if res.is_ok() {
                        telemetry.emit(TelemetryEvent::Sent);
                        sent = true;
                    }
                }
                res = &mut send => break res,
            }
        };

        if !sent && result.is_ok() {
            telemetry.emit(TelemetryEvent::Sent);
        }
        result
    }

    /// Send `request` without telemetry. Used for redirect hops.
    ///
    /// # Errors
    /// As [`dispatch`](Self::dispatch).
    pub async fn send(&self, request: ResolvedRequest) -> Result<Response<ResponseBody>, FetchError> {
        let (request, transport) = request.into_http()?;
        tracing::debug!(method = %request.method(), uri = %request.uri(), "dispatching request");
        self.transport.send(request, &transport).await
    }
}
