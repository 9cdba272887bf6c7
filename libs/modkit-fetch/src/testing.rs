//! In-memory transport for unit tests.

use crate::config::{RequestBody, TransportOptions};
use crate::error::FetchError;
use crate::response::ResponseBody;
use crate::transport::Transport;
use bytes::Bytes;
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use parking_lot::Mutex;

/// Request as seen by [`MockTransport`], body already collected.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

type Handler = Box<dyn Fn(&RecordedRequest) -> Response<ResponseBody> + Send + Sync>;

pub struct MockTransport {
    handler: Handler,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    #[must_use]
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> Response<ResponseBody> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every request with an empty 200.
    #[must_use]
    pub fn ok() -> Self {
        Self::new(|_| empty_response(StatusCode::OK))
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    #[must_use]
    pub fn bodies(&self) -> Vec<Bytes> {
        self.requests.lock().iter().map(|r| r.body.clone()).collect()
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        request: Request<RequestBody>,
        _options: &TransportOptions,
    ) -> Result<Response<ResponseBody>, FetchError> {
        let (parts, body) = request.into_parts();
        let body = body
            .collect()
            .await
            .map_err(FetchError::Transport)?
            .to_bytes();
        let recorded = RecordedRequest {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        };
        let response = (self.handler)(&recorded);
        self.requests.lock().push(recorded);
        Ok(response)
    }
}

#[must_use]
pub fn response(status: StatusCode, body: &'static str) -> Response<ResponseBody> {
    let body: ResponseBody = Full::new(Bytes::from_static(body.as_bytes()))
        .map_err(|never| match never {})
        .boxed();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

#[must_use]
pub fn empty_response(status: StatusCode) -> Response<ResponseBody> {
    response(status, "")
}
