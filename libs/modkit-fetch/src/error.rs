use std::time::Duration;
use thiserror::Error;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// A redirect `Location` header could not be resolved
    BadLocation,
}

/// Fetch pipeline error types
///
/// Every stage of a fetch fails the in-flight call with one of these; nothing
/// is retried. Status-driven failures carry the numeric status, see
/// [`FetchError::status`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FetchError {
    /// URL scheme is neither `http:` nor `https:`
    #[error("Missing or invalid protocol: {protocol:?}")]
    InvalidProtocol { protocol: String },

    /// Request body could not be encoded
    #[error("Unsupported body type: {0}")]
    UnsupportedBodyType(String),

    /// Redirect chain longer than the fixed bound
    #[error("Maximum of {max} redirects exceeded")]
    RedirectLimitExceeded { max: usize },

    /// Non-2xx status while `success_only` is enabled
    #[error("{message}")]
    UnsuccessfulStatus {
        status: http::StatusCode,
        message: String,
    },

    /// `as` option names no known representation
    #[error("Invalid \"as\" option: {0:?}")]
    InvalidAsOption(String),

    /// Placeholders left after expansion with `require_expanded_params`
    #[error("There were unexpanded params: {residual}")]
    UnexpandedParameters { residual: String },

    /// Response body is not valid JSON
    #[error("Response body parsing failed: {0}")]
    BodyParseError(#[from] serde_json::Error),

    /// Response (or request) body stream was already taken
    #[error("Body already consumed")]
    BodyAlreadyConsumed,

    /// `Content-Type` names a charset with no known decoder
    #[error("Unsupported response charset: {0:?}")]
    UnsupportedCharset(String),

    /// Invalid URL (failed to parse)
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field
    /// is a diagnostic message; its format is unstable.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        url: String,
        kind: InvalidUriKind,
        reason: String,
    },

    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Transport-level timeout configured through `TransportOptions::timeout`
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Transport error (network, connection refused, DNS, ...)
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS configuration or handshake error
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl FetchError {
    /// Numeric status carried by status-driven failures.
    #[must_use]
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            FetchError::UnsuccessfulStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn invalid_uri(url: &str, kind: InvalidUriKind, reason: impl ToString) -> Self {
        FetchError::InvalidUri {
            url: url.to_owned(),
            kind,
            reason: reason.to_string(),
        }
    }
}

impl From<hyper_util::client::legacy::Error> for FetchError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        FetchError::Transport(Box::new(err))
    }
}
