//! Response construction helpers

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};

/// Body type of every response the proxy produces
pub type MirrorBody = BoxBody<Bytes, hyper::Error>;

/// Create full body
pub fn full_body(bytes: Bytes) -> MirrorBody {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}

/// Create text response
pub fn text_response(status: StatusCode, body: &str) -> Response<MirrorBody> {
    let mut response = Response::new(full_body(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// Response whose body is just the canonical status text
pub fn status_response(status: StatusCode) -> Response<MirrorBody> {
    text_response(status, status.canonical_reason().unwrap_or(""))
}
