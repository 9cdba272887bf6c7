//! Status classification and the success check.

use crate::error::FetchError;
use http::StatusCode;

/// Numeric status classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 1xx
    Provisional,
    /// 2xx
    Success,
    /// 3xx
    Redirect,
    /// 4xx
    Client,
    /// 5xx
    Server,
    Unknown,
}

impl StatusClass {
    #[must_use]
    pub fn of(status: StatusCode) -> Self {
        match status.as_u16() {
            100..=199 => StatusClass::Provisional,
            200..=299 => StatusClass::Success,
            300..=399 => StatusClass::Redirect,
            400..=499 => StatusClass::Client,
            500..=599 => StatusClass::Server,
            _ => StatusClass::Unknown,
        }
    }

    fn label(self) -> &'static str {
        match self {
            StatusClass::Provisional => "Provisional error",
            StatusClass::Success => "Success",
            StatusClass::Redirect => "Redirect error",
            StatusClass::Client => "Client error",
            StatusClass::Server => "Server error",
            StatusClass::Unknown => "Unknown status",
        }
    }
}

/// `"<Class> error <code>: <reason phrase>"` for a failed status.
#[must_use]
pub fn failure_message(status: StatusCode) -> String {
    format!(
        "{} {}: {}",
        StatusClass::of(status).label(),
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    )
}

/// Reject anything outside 2xx.
///
/// # Errors
/// Returns `FetchError::UnsuccessfulStatus` carrying the status.
pub fn check_success(status: StatusCode) -> Result<(), FetchError> {
    if StatusClass::of(status) == StatusClass::Success {
        return Ok(());
    }
    Err(FetchError::UnsuccessfulStatus {
        status,
        message: failure_message(status),
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn status(code: u16) -> StatusCode {
        StatusCode::from_u16(code).unwrap()
    }

    #[test]
    fn test_accepts_2xx() {
        for code in [200, 201, 204, 299] {
            assert!(check_success(status(code)).is_ok(), "{code} should pass");
        }
    }

    #[test]
    fn test_rejects_everything_else() {
        for code in [100, 301, 404, 500] {
            let err = check_success(status(code)).unwrap_err();
            assert_eq!(err.status(), Some(status(code)));
        }
    }

    #[test]
    fn test_messages_by_class() {
        assert_eq!(
            failure_message(status(500)),
            "Server error 500: Internal Server Error"
        );
        assert_eq!(failure_message(status(404)), "Client error 404: Not Found");
        assert_eq!(
            failure_message(status(301)),
            "Redirect error 301: Moved Permanently"
        );
        assert_eq!(
            failure_message(status(100)),
            "Provisional error 100: Continue"
        );
        assert_eq!(failure_message(status(600)), "Unknown status 600: Unknown");
    }

    #[test]
    fn test_classification_boundaries() {
        assert_eq!(StatusClass::of(status(199)), StatusClass::Provisional);
        assert_eq!(StatusClass::of(status(300)), StatusClass::Redirect);
        assert_eq!(StatusClass::of(status(499)), StatusClass::Client);
        assert_eq!(StatusClass::of(status(599)), StatusClass::Server);
    }
}
