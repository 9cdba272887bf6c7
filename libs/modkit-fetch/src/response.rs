use crate::charset;
use crate::config::{As, BoxError};
use crate::error::FetchError;
use crate::telemetry::{Telemetry, TelemetryEvent};
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Type-erased response body as produced by a [`Transport`](crate::Transport).
pub type ResponseBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// Response of a fetch call whose body has not been materialized yet.
///
/// The body can be read exactly once, by any of [`buffer`](Self::buffer),
/// [`text`](Self::text), [`json`](Self::json), [`json_as`](Self::json_as) or
/// [`take_body`](Self::take_body). Later reads fail with
/// `FetchError::BodyAlreadyConsumed`.
pub struct FetchResponse {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    body: Mutex<Option<ResponseBody>>,
    telemetry: Arc<Telemetry>,
}

impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("consumed", &self.is_consumed())
            .finish_non_exhaustive()
    }
}

impl FetchResponse {
    pub(crate) fn new(
        response: http::Response<ResponseBody>,
        url: Url,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            status: parts.status,
            headers: parts.headers,
            url,
            body: Mutex::new(Some(body)),
            telemetry,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Final URL after redirects.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Charset of the body, `utf-8` unless `Content-Type` names another.
    #[must_use]
    pub fn charset(&self) -> String {
        charset::response_charset(&self.headers).into_owned()
    }

    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.body.lock().is_none()
    }

    /// Telemetry record of the call that produced this response.
    #[must_use]
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    fn take(&self) -> Result<ResponseBody, FetchError> {
        self.body.lock().take().ok_or(FetchError::BodyAlreadyConsumed)
    }

    /// Raw body stream for incremental processing. Emits `done`.
    ///
    /// # Errors
    /// Returns `FetchError::BodyAlreadyConsumed` if the body was already read.
    pub fn take_body(&self) -> Result<ResponseBody, FetchError> {
        let body = self.take()?;
        self.telemetry.emit(TelemetryEvent::Done);
        Ok(body)
    }

    async fn collect(&self) -> Result<Bytes, FetchError> {
        let body = self.take()?;
        let bytes = read_body(body).await?;
        tracing::debug!(
            url = %self.url,
            bytes = bytes.len(),
            "response body buffered"
        );
        Ok(bytes)
    }

    /// Record `responseBody`, then emit `buffered` and `done`.
    fn finish(&self, recorded: Value) {
        self.telemetry.set("responseBody", recorded);
        self.telemetry.emit(TelemetryEvent::Buffered);
        self.telemetry.emit(TelemetryEvent::Done);
    }

    /// Collect the whole body. Records `responseBody`, emits `buffered`
    /// then `done`.
    ///
    /// # Errors
    /// Returns `FetchError::BodyAlreadyConsumed` on a second read, or
    /// `FetchError::Transport` if the body stream fails.
    pub async fn buffer(&self) -> Result<Bytes, FetchError> {
        let bytes = self.collect().await?;
        self.finish(Value::from(String::from_utf8_lossy(&bytes).into_owned()));
        Ok(bytes)
    }

    async fn read_text(&self) -> Result<String, FetchError> {
        let encoding = charset::encoding_for(&self.charset())?;
        let bytes = self.collect().await?;
        Ok(charset::decode(&bytes, encoding))
    }

    /// Body decoded with the response charset.
    ///
    /// # Errors
    /// Returns `FetchError::UnsupportedCharset` before reading the body if the
    /// charset has no decoder, otherwise the errors of [`buffer`](Self::buffer).
    pub async fn text(&self) -> Result<String, FetchError> {
        let text = self.read_text().await?;
        self.finish(Value::from(text.clone()));
        Ok(text)
    }

    /// Body parsed as a JSON value.
    ///
    /// # Errors
    /// Returns `FetchError::BodyParseError` if the text is not valid JSON.
    pub async fn json(&self) -> Result<Value, FetchError> {
        self.json_as().await
    }

    /// Body deserialized into `T`. The parsed document is recorded as
    /// `responseBody`; unparsable text is recorded as is.
    ///
    /// # Errors
    /// Returns `FetchError::BodyParseError` if the text is not JSON or does
    /// not fit `T`.
    pub async fn json_as<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        let text = self.read_text().await?;
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => {
                self.finish(value.clone());
                Ok(serde_json::from_value(value)?)
            }
            Err(e) => {
                self.finish(Value::from(text));
                Err(e.into())
            }
        }
    }

    /// Produce the representation selected by `as_`.
    pub(crate) async fn materialize(self, as_: As) -> Result<Fetched, FetchError> {
        match as_ {
            As::Stream => Ok(Fetched::Response(self)),
            As::Text => self.text().await.map(Fetched::Text),
            As::Json => self.json().await.map(Fetched::Json),
            As::Buffer => self.buffer().await.map(Fetched::Buffer),
        }
    }
}

async fn read_body(body: ResponseBody) -> Result<Bytes, FetchError> {
    let mut collected = BytesMut::new();
    let mut body = std::pin::pin!(body);
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(FetchError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            collected.extend_from_slice(chunk);
        }
    }
    Ok(collected.freeze())
}

/// Outcome of a fetch call, shaped by the `as` option.
#[derive(Debug)]
pub enum Fetched {
    /// `as = stream`: the unread response
    Response(FetchResponse),
    Text(String),
    Json(Value),
    Buffer(Bytes),
}

impl Fetched {
    #[must_use]
    pub fn into_response(self) -> Option<FetchResponse> {
        match self {
            Fetched::Response(r) => Some(r),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_text(self) -> Option<String> {
        match self {
            Fetched::Text(t) => Some(t),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_json(self) -> Option<Value> {
        match self {
            Fetched::Json(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_buffer(self) -> Option<Bytes> {
        match self {
            Fetched::Buffer(b) => Some(b),
            _ => None,
        }
    }
}
