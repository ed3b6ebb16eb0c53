//! Mirror engine
//! Builds the outbound request, retries transport failures and 5xx
//! responses, then rewrites the final body

use crate::config::TargetConfig;
use crate::error::MirrorError;
use crate::headers::{add_marker, copy_response_headers, forward_request_headers};
use crate::response::{full_body, status_response, MirrorBody};
use crate::rewrite::{BodyRewriter, EXTERNAL_URL_PARAM};
use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderName};
use hyper::http::request::Parts;
use hyper::{Method, Response, StatusCode, Uri};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use url::Url;

/// Total attempts made for one mirrored request
pub const MAX_ATTEMPTS: u32 = 3;

/// Inbound request captured for mirroring
#[derive(Debug, Clone)]
pub struct MirrorRequest {
    pub method: Method,
    pub path: String,
    /// Query pairs in order, without `EXTERNAL_URL`
    pub query: Vec<(String, String)>,
    /// Decoded `EXTERNAL_URL` value, if the request carried one
    pub external_url: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl MirrorRequest {
    pub fn new(method: Method, uri: &Uri, headers: HeaderMap, body: Bytes) -> Self {
        let mut query = Vec::new();
        let mut external_url = None;

        if let Some(raw) = uri.query() {
            for (key, value) in url::form_urlencoded::parse(raw.as_bytes()).into_owned() {
                if key == EXTERNAL_URL_PARAM {
                    external_url = Some(value);
                } else {
                    query.push((key, value));
                }
            }
        }

        Self {
            method,
            path: uri.path().to_string(),
            query,
            external_url,
            headers,
            body,
        }
    }

    pub fn from_parts(parts: &Parts, body: Bytes) -> Self {
        Self::new(parts.method.clone(), &parts.uri, parts.headers.clone(), body)
    }
}

/// Request as it is sent to the backend
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Backend response with its body fully read
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Sends outbound requests. Failures to reach the backend are
/// `MirrorError::Transport`; failures reading its body are `MirrorError::BodyRead`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, MirrorError>;
}

/// Transport backed by a shared reqwest client
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, MirrorError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);

        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| MirrorError::Transport(Box::new(e)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| MirrorError::BodyRead(Box::new(e)))?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Mirrors one request at a time against a backend URL
pub struct MirrorEngine {
    transport: Arc<dyn Transport>,
    rewriter: BodyRewriter,
    marker_header: HeaderName,
}

impl MirrorEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        rewriter: BodyRewriter,
        marker_header: HeaderName,
    ) -> Self {
        Self {
            transport,
            rewriter,
            marker_header,
        }
    }

    /// Mirror `request` against `url`, rewriting the body for `target`.
    ///
    /// Never fails: errors become a 500 and are logged. A backend that keeps
    /// answering 5xx has its last response passed through.
    pub async fn mirror(
        &self,
        url: &str,
        request: &MirrorRequest,
        target: &TargetConfig,
    ) -> Response<MirrorBody> {
        info!("mirroring {}", url);

        let outbound = match self.build_request(url, request) {
            Ok(outbound) => outbound,
            Err(e) => {
                error!("Error creating new request: {}", e);
                return status_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        match self.execute(outbound).await {
            Ok(upstream) => self.finish(upstream, target),
            // Logged by execute
            Err(_) => status_response(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// Outbound request for `url`: allow-listed headers, marker header and
    /// the inbound query appended to whatever query `url` already has
    pub fn build_request(
        &self,
        url: &str,
        request: &MirrorRequest,
    ) -> Result<OutboundRequest, MirrorError> {
        let mut destination = Url::parse(url).map_err(|source| MirrorError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        if !request.query.is_empty() {
            let mut pairs = destination.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }

        let mut headers = forward_request_headers(&request.headers);
        add_marker(&mut headers, &self.marker_header);

        Ok(OutboundRequest {
            method: request.method.clone(),
            url: destination,
            headers,
            body: request.body.clone(),
        })
    }

    /// Send with bounded retry. Dropping the returned future cancels the
    /// in-flight call and any remaining attempts.
    async fn execute(&self, outbound: OutboundRequest) -> Result<UpstreamResponse, MirrorError> {
        let mut attempt = 1;

        loop {
            match self.transport.send(outbound.clone()).await {
                Ok(response) if response.status.is_server_error() && attempt < MAX_ATTEMPTS => {
                    warn!(
                        url = %outbound.url,
                        attempt,
                        "Status code {}, retrying",
                        response.status.as_u16()
                    );
                }
                Ok(response) => {
                    if response.status.is_server_error() {
                        warn!(
                            url = %outbound.url,
                            attempt,
                            "Max attempts reached, returning {}",
                            response.status.as_u16()
                        );
                    }
                    return Ok(response);
                }
                Err(e) if e.is_retryable() => {
                    error!(url = %outbound.url, attempt, "Mirror attempt failed: {}", e);
                    if attempt >= MAX_ATTEMPTS {
                        error!(url = %outbound.url, "Failed after {} attempts, returning error", attempt);
                        return Err(e);
                    }
                }
                Err(e) => {
                    error!(url = %outbound.url, attempt, "{}", e);
                    return Err(e);
                }
            }

            attempt += 1;
        }
    }

    fn finish(&self, upstream: UpstreamResponse, target: &TargetConfig) -> Response<MirrorBody> {
        let body = self.rewriter.rewrite(upstream.body, target);

        let mut response = Response::new(full_body(body));
        *response.status_mut() = upstream.status;
        copy_response_headers(&upstream.headers, response.headers_mut());
        response
    }
}
