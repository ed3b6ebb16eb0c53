//! Header policy
//! Decides which inbound headers reach the backend and which backend
//! headers reach the client

use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_LENGTH, HOST,
    TRANSFER_ENCODING, USER_AGENT,
};

/// Inbound headers forwarded to the backend. Everything else is dropped,
/// conditional headers included, so every mirrored fetch returns a full body.
pub const FORWARDED_HEADERS: [HeaderName; 4] = [HOST, ACCEPT, USER_AGENT, ACCEPT_LANGUAGE];

/// Value of the marker header identifying mirrored traffic
pub const MARKER_VALUE: &str = "TRUE";

/// Build the outbound header set from the inbound headers.
///
/// The inbound `Host` is never copied. The client sets it from the URL of
/// every hop, so the backend, and any host it redirects to, sees the name it
/// is actually addressed by.
pub fn forward_request_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for name in FORWARDED_HEADERS.iter().filter(|name| **name != HOST) {
        for value in inbound.get_all(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    headers
}

/// Add the marker header to an outbound header set
pub fn add_marker(headers: &mut HeaderMap, marker: &HeaderName) {
    headers.insert(marker.clone(), HeaderValue::from_static(MARKER_VALUE));
}

/// Copy backend response headers to the client response.
///
/// Nothing is filtered except the framing headers, which no longer describe
/// the rewritten body. Backend cookies pass through unchanged.
pub fn copy_response_headers(upstream: &HeaderMap, out: &mut HeaderMap) {
    for (name, value) in upstream.iter() {
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
}
