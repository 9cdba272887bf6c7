#![no_main]

use http::{HeaderMap, HeaderValue, header::CONTENT_TYPE};
use libfuzzer_sys::fuzz_target;
use modkit_fetch::charset::{decode, encoding_for, response_charset};

fuzz_target!(|data: &[u8]| {
    let split = data.first().map_or(0, |n| usize::from(*n)).min(data.len());
    let (header, body) = data.split_at(split);

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_bytes(header) {
        headers.insert(CONTENT_TYPE, value);
    }

    if let Ok(encoding) = encoding_for(&response_charset(&headers)) {
        let _ = decode(body, encoding);
    }
});
