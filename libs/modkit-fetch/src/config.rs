//! Request options and their hierarchical merge.
//!
//! [`FetchOptions`] is the override value a caller hands to `extend` or
//! `fetch`: every scalar is optional and every map is additive.
//! [`Configuration`] is the frozen result of merging a chain of overrides on
//! top of the defaults.

use crate::error::FetchError;
use crate::telemetry::TelemetrySink;
use bytes::Bytes;
use futures_core::Stream;
use futures_util::TryStreamExt;
use http::Method;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Frame;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use url::{Url, form_urlencoded};

/// Boxed error used by streamed bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Byte stream accepted as a streamed request body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

/// Request body as handed to the transport.
pub type RequestBody = UnsyncBoxBody<Bytes, BoxError>;

/// Representation a fetch call resolves to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum As {
    /// Unread response with its body stream
    #[default]
    Stream,
    Text,
    Json,
    Buffer,
}

impl FromStr for As {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stream" => Ok(As::Stream),
            "text" => Ok(As::Text),
            "json" => Ok(As::Json),
            "buffer" => Ok(As::Buffer),
            other => Err(FetchError::InvalidAsOption(other.to_owned())),
        }
    }
}

impl<'de> Deserialize<'de> for As {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Single-use streamed body.
///
/// Clones share the underlying stream; whichever dispatch takes it first
/// wins and every later attempt fails with `BodyAlreadyConsumed`.
#[derive(Clone)]
pub struct BodyStream(Arc<Mutex<Option<ByteStream>>>);

impl BodyStream {
    #[must_use]
    pub fn new<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let boxed: ByteStream = Box::pin(stream.map_err(|e| -> BoxError { e.into() }));
        Self(Arc::new(Mutex::new(Some(boxed))))
    }

    fn take(&self) -> Result<ByteStream, FetchError> {
        self.0.lock().take().ok_or(FetchError::BodyAlreadyConsumed)
    }

    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.0.lock().is_none()
    }
}

/// Request body.
#[derive(Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    /// UTF-8 text, sent verbatim
    Text(String),
    Bytes(Bytes),
    /// Serialized as JSON; sets `content-type: application/json` unless given
    Json(Value),
    /// Piped through as produced
    Stream(BodyStream),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Text(s) => f.debug_tuple("Text").field(&s.len()).finish(),
            Body::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Body::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Body::Stream(s) => f
                .debug_struct("Stream")
                .field("consumed", &s.is_consumed())
                .finish(),
        }
    }
}

impl Body {
    /// JSON body from any serializable value.
    ///
    /// # Errors
    /// Returns `FetchError::UnsupportedBodyType` if `value` has no JSON form.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, FetchError> {
        serde_json::to_value(value)
            .map(Body::Json)
            .map_err(|e| FetchError::UnsupportedBodyType(e.to_string()))
    }

    #[must_use]
    pub fn stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Body::Stream(BodyStream::new(stream))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    /// Content type implied by the body kind, if any.
    pub(crate) fn default_content_type(&self) -> Option<&'static str> {
        match self {
            Body::Json(_) => Some("application/json"),
            _ => None,
        }
    }

    /// Encode into a transport body. Takes the stream out of a stream body.
    pub(crate) fn into_request_body(self) -> Result<RequestBody, FetchError> {
        let body = match self {
            Body::Empty => Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync(),
            Body::Text(s) => full(Bytes::from(s)),
            Body::Bytes(b) => full(b),
            Body::Json(v) => full(Bytes::from(serde_json::to_vec(&v).map_err(|e| {
                FetchError::UnsupportedBodyType(e.to_string())
            })?)),
            Body::Stream(s) => {
                let stream = s.take()?;
                http_body_util::StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync()
            }
        };
        Ok(body)
    }
}

fn full(bytes: Bytes) -> RequestBody {
    Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Text(s)
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Text(s.to_owned())
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::Bytes(b)
    }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(b))
    }
}

impl From<Value> for Body {
    fn from(v: Value) -> Self {
        Body::Json(v)
    }
}

/// Header map keyed by lowercased name.
///
/// Names and values are validated when a request is built, so a bad header
/// fails the fetch that uses it rather than the `extend` that declared it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "BTreeMap<String, String>")]
pub struct Headers(BTreeMap<String, String>);

impl From<BTreeMap<String, String>> for Headers {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::default();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// New map with `child` entries layered over `self`.
    #[must_use]
    pub fn merge(&self, child: &Headers) -> Headers {
        let mut merged = self.clone();
        merged
            .0
            .extend(child.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Validated `http::HeaderMap`.
    ///
    /// # Errors
    /// Returns `InvalidHeaderName` / `InvalidHeaderValue` on the first bad entry.
    pub fn to_header_map(&self) -> Result<http::HeaderMap, FetchError> {
        let mut map = http::HeaderMap::with_capacity(self.0.len());
        for (name, value) in &self.0 {
            map.insert(
                http::HeaderName::from_bytes(name.as_bytes())?,
                http::HeaderValue::from_str(value)?,
            );
        }
        Ok(map)
    }
}

/// Ordered query parameters. `None` values serialize as `name=`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query(Vec<(String, Option<String>)>);

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name`, replacing an existing value in place.
    pub fn set(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == name) {
            slot.1 = value;
        } else {
            self.0.push((name, value));
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_deref())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    #[must_use]
    pub fn merge(&self, child: &Query) -> Query {
        let mut merged = self.clone();
        for (k, v) in &child.0 {
            merged.set(k.clone(), v.clone());
        }
        merged
    }

    /// Merge into the query string of `url`.
    ///
    /// Existing segments are kept byte for byte unless their name is
    /// configured here; configured pairs are appended after them.
    pub fn apply_to(&self, url: &mut Url) {
        if self.is_empty() {
            return;
        }
        let mut segments: Vec<String> = url
            .query()
            .unwrap_or_default()
            .split('&')
            .filter(|segment| !segment.is_empty())
            .filter(|segment| {
                form_urlencoded::parse(segment.as_bytes())
                    .next()
                    .is_none_or(|(name, _)| self.get(&name).is_none())
            })
            .map(str::to_owned)
            .collect();

        let mut configured = form_urlencoded::Serializer::new(String::new());
        for (k, v) in self.iter() {
            configured.append_pair(k, v.unwrap_or(""));
        }
        segments.push(configured.finish());
        url.set_query(Some(&segments.join("&")));
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Query {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut query = Query::new();
        for (k, v) in iter {
            query.set(k, Some(v.into()));
        }
        query
    }
}

impl<'de> Deserialize<'de> for Query {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct QueryVisitor;

        impl<'de> Visitor<'de> for QueryVisitor {
            type Value = Query;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of query parameters")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Query, A::Error> {
                let mut query = Query::new();
                while let Some((k, v)) = access.next_entry::<String, Option<String>>()? {
                    query.set(k, v);
                }
                Ok(query)
            }
        }

        deserializer.deserialize_map(QueryVisitor)
    }
}

/// Local address family used for outgoing connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    #[default]
    Any,
    V4,
    V6,
}

/// Minimum TLS protocol version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
pub enum TlsVersion {
    #[default]
    #[serde(rename = "TLSv1.2")]
    Tls12,
    #[serde(rename = "TLSv1.3")]
    Tls13,
}

/// Options passed through to the transport untouched by the pipeline.
///
/// Redirect hops keep these even though they drop headers and body.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransportOptions {
    /// Whole-request timeout, e.g. `"30s"`
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Option<Duration>,
    pub family: Option<IpFamily>,
    /// `user:password`, sent as Basic `Authorization` unless one is set
    pub auth: Option<SecretString>,
    /// `false` disables server certificate verification
    pub reject_unauthorized: Option<bool>,
    /// Extra trusted CA certificates (PEM)
    pub ca: Option<String>,
    /// Client certificate chain (PEM)
    pub cert: Option<String>,
    /// Client private key (PEM)
    pub key: Option<SecretString>,
    pub min_tls_version: Option<TlsVersion>,
    /// SNI / verification name override
    pub server_name: Option<String>,
}

fn deserialize_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    Option::<String>::deserialize(d)?
        .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

fn clone_secret(secret: Option<&SecretString>) -> Option<SecretString> {
    secret.map(|s| SecretString::from(s.expose_secret().to_owned()))
}

impl Clone for TransportOptions {
    fn clone(&self) -> Self {
        Self {
            timeout: self.timeout,
            family: self.family,
            auth: clone_secret(self.auth.as_ref()),
            reject_unauthorized: self.reject_unauthorized,
            ca: self.ca.clone(),
            cert: self.cert.clone(),
            key: clone_secret(self.key.as_ref()),
            min_tls_version: self.min_tls_version,
            server_name: self.server_name.clone(),
        }
    }
}

impl TransportOptions {
    /// Field-wise merge, `child` wins where set.
    #[must_use]
    pub fn merge(&self, child: &TransportOptions) -> TransportOptions {
        TransportOptions {
            timeout: child.timeout.or(self.timeout),
            family: child.family.or(self.family),
            auth: clone_secret(child.auth.as_ref().or(self.auth.as_ref())),
            reject_unauthorized: child.reject_unauthorized.or(self.reject_unauthorized),
            ca: child.ca.clone().or_else(|| self.ca.clone()),
            cert: child.cert.clone().or_else(|| self.cert.clone()),
            key: clone_secret(child.key.as_ref().or(self.key.as_ref())),
            min_tls_version: child.min_tls_version.or(self.min_tls_version),
            server_name: child.server_name.clone().or_else(|| self.server_name.clone()),
        }
    }

    /// Whether TLS settings differ from the defaults.
    #[must_use]
    pub fn has_tls_overrides(&self) -> bool {
        self.reject_unauthorized == Some(false)
            || self.ca.is_some()
            || self.cert.is_some()
            || self.min_tls_version.is_some()
            || self.server_name.is_some()
    }
}

/// Per-call or per-client option overrides.
#[derive(Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FetchOptions {
    #[serde(with = "method_serde")]
    pub method: Option<Method>,
    #[serde(skip)]
    pub body: Option<Body>,
    pub headers: Headers,
    pub query: Query,
    #[serde(rename = "as")]
    pub as_: Option<As>,
    pub follow_redirects: Option<bool>,
    pub success_only: Option<bool>,
    pub require_expanded_params: Option<bool>,
    #[serde(skip)]
    pub telemetry: Option<Arc<dyn TelemetrySink>>,
    #[serde(flatten)]
    pub transport: TransportOptions,
}

mod method_serde {
    use http::Method;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Method>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("method", &self.method)
            .field("body", &self.body)
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("as", &self.as_)
            .field("follow_redirects", &self.follow_redirects)
            .field("success_only", &self.success_only)
            .field("require_expanded_params", &self.require_expanded_params)
            .field("telemetry", &self.telemetry.is_some())
            .field("transport", &self.transport)
            .finish()
    }
}

impl FetchOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.set(name, Some(value.into()));
        self
    }

    /// Query parameter rendered with an empty value (`name=`).
    #[must_use]
    pub fn query_null(mut self, name: impl Into<String>) -> Self {
        self.query.set(name, None);
        self
    }

    #[must_use]
    pub fn as_(mut self, as_: As) -> Self {
        self.as_ = Some(as_);
        self
    }

    #[must_use]
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = Some(follow);
        self
    }

    #[must_use]
    pub fn success_only(mut self, success_only: bool) -> Self {
        self.success_only = Some(success_only);
        self
    }

    #[must_use]
    pub fn require_expanded_params(mut self, require: bool) -> Self {
        self.require_expanded_params = Some(require);
        self
    }

    #[must_use]
    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.transport.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn auth(mut self, user_pass: &str) -> Self {
        self.transport.auth = Some(SecretString::from(user_pass.to_owned()));
        self
    }

    #[must_use]
    pub fn reject_unauthorized(mut self, reject: bool) -> Self {
        self.transport.reject_unauthorized = Some(reject);
        self
    }
}

/// Fully merged, immutable options of a client.
#[derive(Clone)]
pub struct Configuration {
    method: Method,
    body: Body,
    headers: Arc<Headers>,
    query: Arc<Query>,
    follow_redirects: bool,
    success_only: bool,
    as_: As,
    require_expanded_params: bool,
    transport: Arc<TransportOptions>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            method: Method::GET,
            body: Body::Empty,
            headers: Arc::default(),
            query: Arc::default(),
            follow_redirects: true,
            success_only: true,
            as_: As::Stream,
            require_expanded_params: false,
            transport: Arc::default(),
            telemetry: None,
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("method", &self.method)
            .field("body", &self.body)
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("follow_redirects", &self.follow_redirects)
            .field("success_only", &self.success_only)
            .field("as", &self.as_)
            .field("require_expanded_params", &self.require_expanded_params)
            .field("transport", &self.transport)
            .field("telemetry", &self.telemetry.is_some())
            .finish()
    }
}

impl Configuration {
    /// Layer `opts` over `self`. Never mutates `self`; maps are copied only
    /// when `opts` contributes entries.
    #[must_use]
    pub fn merge(&self, opts: &FetchOptions) -> Configuration {
        let headers = if opts.headers.is_empty() {
            Arc::clone(&self.headers)
        } else {
            Arc::new(self.headers.merge(&opts.headers))
        };
        let query = if opts.query.is_empty() {
            Arc::clone(&self.query)
        } else {
            Arc::new(self.query.merge(&opts.query))
        };

        Configuration {
            method: opts.method.clone().unwrap_or_else(|| self.method.clone()),
            body: opts.body.clone().unwrap_or_else(|| self.body.clone()),
            headers,
            query,
            follow_redirects: opts.follow_redirects.unwrap_or(self.follow_redirects),
            success_only: opts.success_only.unwrap_or(self.success_only),
            as_: opts.as_.unwrap_or(self.as_),
            require_expanded_params: opts
                .require_expanded_params
                .unwrap_or(self.require_expanded_params),
            transport: Arc::new(self.transport.merge(&opts.transport)),
            telemetry: opts
                .telemetry
                .clone()
                .or_else(|| self.telemetry.clone()),
        }
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    #[must_use]
    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    #[must_use]
    pub fn success_only(&self) -> bool {
        self.success_only
    }

    #[must_use]
    pub fn as_(&self) -> As {
        self.as_
    }

    #[must_use]
    pub fn require_expanded_params(&self) -> bool {
        self.require_expanded_params
    }

    #[must_use]
    pub fn transport(&self) -> &TransportOptions {
        &self.transport
    }

    #[must_use]
    pub fn telemetry(&self) -> Option<&Arc<dyn TelemetrySink>> {
        self.telemetry.as_ref()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Configuration::default();
        assert_eq!(config.method(), Method::GET);
        assert!(config.follow_redirects());
        assert!(config.success_only());
        assert_eq!(config.as_(), As::Stream);
        assert!(!config.require_expanded_params());
        assert!(config.body().is_empty());
    }

    #[test]
    fn test_as_from_str() {
        assert_eq!("text".parse::<As>().unwrap(), As::Text);
        assert_eq!("buffer".parse::<As>().unwrap(), As::Buffer);
        let err = "foo".parse::<As>().unwrap_err();
        assert!(matches!(err, FetchError::InvalidAsOption(ref v) if v == "foo"));
    }

    #[test]
    fn test_merge_child_scalars_win() {
        let parent = Configuration::default().merge(&FetchOptions::new().as_(As::Json));
        let child = parent.merge(
            &FetchOptions::new()
                .method(Method::POST)
                .success_only(false),
        );

        assert_eq!(child.method(), Method::POST);
        assert!(!child.success_only());
        assert_eq!(child.as_(), As::Json);
        assert_eq!(parent.method(), Method::GET);
        assert!(parent.success_only());
    }

    #[test]
    fn test_merge_headers_is_shallow_and_isolated() {
        let parent = Configuration::default().merge(
            &FetchOptions::new()
                .header("X-Foo", "foo")
                .header("X-Bar", "bar"),
        );
        let child = parent.merge(&FetchOptions::new().header("x-bar", "baz"));

        assert_eq!(child.headers().get("x-foo"), Some("foo"));
        assert_eq!(child.headers().get("X-Bar"), Some("baz"));
        assert_eq!(parent.headers().get("x-bar"), Some("bar"));
    }

    #[test]
    fn test_merge_without_headers_shares_map() {
        let parent = Configuration::default().merge(&FetchOptions::new().header("a", "1"));
        let child = parent.merge(&FetchOptions::new());
        assert!(Arc::ptr_eq(&parent.headers, &child.headers));
    }

    #[test]
    fn test_query_apply_appends_after_existing() {
        let mut url = Url::parse("http://localhost/?baz=qux").unwrap();
        let query: Query = [("foo", "bar")].into_iter().collect();
        query.apply_to(&mut url);
        assert_eq!(url.as_str(), "http://localhost/?baz=qux&foo=bar");
    }

    #[test]
    fn test_query_apply_keeps_raw_url_segments() {
        let mut url = Url::parse("http://localhost/?tag=a&tag=b&flag&id=:id&page=1").unwrap();
        let query: Query = [("page", "2")].into_iter().collect();
        query.apply_to(&mut url);
        assert_eq!(
            url.as_str(),
            "http://localhost/?tag=a&tag=b&flag&id=:id&page=2"
        );
    }

    #[test]
    fn test_query_null_renders_empty_value() {
        let mut url = Url::parse("http://localhost/").unwrap();
        let mut query = Query::new();
        query.set("foo", None);
        query.apply_to(&mut url);
        assert_eq!(url.as_str(), "http://localhost/?foo=");
    }

    #[test]
    fn test_query_override_keeps_position() {
        let parent: Query = [("foo", "bar"), ("baz", "1")].into_iter().collect();
        let child: Query = [("foo", "qux")].into_iter().collect();
        let merged = parent.merge(&child);
        let pairs: Vec<_> = merged.iter().collect();
        assert_eq!(pairs, vec![("foo", Some("qux")), ("baz", Some("1"))]);
    }

    #[test]
    fn test_empty_query_leaves_url_untouched() {
        let mut url = Url::parse("http://localhost/a?x=%3A").unwrap();
        Query::new().apply_to(&mut url);
        assert_eq!(url.as_str(), "http://localhost/a?x=%3A");
    }

    #[test]
    fn test_headers_reject_invalid_value() {
        let headers: Headers = [("x-bad", "line\nbreak")].into_iter().collect();
        assert!(matches!(
            headers.to_header_map(),
            Err(FetchError::InvalidHeaderValue(_))
        ));
    }

    #[test]
    fn test_transport_merge_field_wise() {
        let parent = TransportOptions {
            timeout: Some(Duration::from_secs(5)),
            reject_unauthorized: Some(false),
            ..Default::default()
        };
        let child = TransportOptions {
            timeout: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        let merged = parent.merge(&child);
        assert_eq!(merged.timeout, Some(Duration::from_secs(1)));
        assert_eq!(merged.reject_unauthorized, Some(false));
    }

    #[test]
    fn test_options_deserialize() {
        let opts: FetchOptions = serde_json::from_value(serde_json::json!({
            "method": "post",
            "as": "json",
            "followRedirects": false,
            "headers": { "X-Foo": "bar" },
            "query": { "a": "1", "b": null },
            "timeout": "250ms",
            "auth": "user:pass",
        }))
        .unwrap();

        assert_eq!(opts.method, Some(Method::POST));
        assert_eq!(opts.as_, Some(As::Json));
        assert_eq!(opts.follow_redirects, Some(false));
        assert_eq!(opts.headers.get("x-foo"), Some("bar"));
        assert_eq!(opts.query.get("b"), Some(None));
        assert_eq!(opts.transport.timeout, Some(Duration::from_millis(250)));
        assert_eq!(
            opts.transport.auth.as_ref().map(ExposeSecret::expose_secret),
            Some("user:pass")
        );
    }

    #[test]
    fn test_options_deserialize_rejects_unknown_as() {
        let err = serde_json::from_value::<FetchOptions>(serde_json::json!({ "as": "foo" }))
            .unwrap_err();
        assert!(err.to_string().contains("foo"));
    }

    #[test]
    fn test_json_body_default_content_type() {
        let body = Body::json(&serde_json::json!({ "foo": "bar" })).unwrap();
        assert_eq!(body.default_content_type(), Some("application/json"));
        assert_eq!(Body::from("x").default_content_type(), None);
    }

    #[tokio::test]
    async fn test_stream_body_single_use() {
        let body = Body::stream(futures_util::stream::iter(vec![Ok::<_, BoxError>(
            Bytes::from_static(b"chunk"),
        )]));
        let copy = body.clone();

        let encoded = body.into_request_body().unwrap();
        let collected = encoded.collect().await.unwrap().to_bytes();
        assert_eq!(collected, Bytes::from_static(b"chunk"));

        assert!(matches!(
            copy.into_request_body(),
            Err(FetchError::BodyAlreadyConsumed)
        ));
    }
}
