//! Response charset detection and decoding.

use crate::error::FetchError;
use encoding_rs::Encoding;
use http::HeaderMap;
use http::header::CONTENT_TYPE;
use std::borrow::Cow;

/// Canonical name of the UTF-8 decode path.
pub const UTF_8: &str = "utf-8";

/// Charset named by the response `Content-Type`, case-folded.
///
/// An absent header, an unparsable header, a header without `charset`, and
/// any spelling of UTF-8 all yield [`UTF_8`].
#[must_use]
pub fn response_charset(headers: &HeaderMap) -> Cow<'static, str> {
    let charset = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<mime::Mime>().ok())
        .and_then(|m| {
            m.params()
                .find(|(name, _)| name.as_str().eq_ignore_ascii_case("charset"))
                .map(|(_, value)| value.as_str().trim_matches('"').to_ascii_lowercase())
        });

    match charset {
        Some(cs) if cs.is_empty() || cs == "utf-8" || cs == "utf8" => Cow::Borrowed(UTF_8),
        Some(cs) => Cow::Owned(cs),
        None => Cow::Borrowed(UTF_8),
    }
}

/// Look up the decoder for a charset label.
///
/// # Errors
/// Returns `FetchError::UnsupportedCharset` if the label is unknown.
pub fn encoding_for(label: &str) -> Result<&'static Encoding, FetchError> {
    if label == UTF_8 {
        return Ok(encoding_rs::UTF_8);
    }
    Encoding::for_label(label.as_bytes())
        .ok_or_else(|| FetchError::UnsupportedCharset(label.to_owned()))
}

/// Decode `bytes` with `encoding`; malformed sequences become U+FFFD.
#[must_use]
pub fn decode(bytes: &[u8], encoding: &'static Encoding) -> String {
    if encoding == encoding_rs::UTF_8 {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(
            encoding = encoding.name(),
            "response body contained malformed sequences"
        );
    }
    text.into_owned()
}
