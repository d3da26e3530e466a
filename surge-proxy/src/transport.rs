//! Backend transport.
//!
//! Forwards an admitted request to the backend the scheduler picked and hands
//! back the raw response. The request is replayed with its original method
//! and headers; the body is re-serialized as JSON, so the inbound framing
//! headers (`content-length`, `transfer-encoding`) and `host`, which names
//! this proxy, are not forwarded, and `content-type` is rewritten.

use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use reqwest::Client;
use serde_json::Value;
use surge_core::Backend;
use tracing::{debug, instrument};

use crate::error::ProxyError;

/// Everything needed to replay an inbound request against a backend
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Path and query string, starting with `/`
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl ForwardRequest {
    pub fn new(
        method: Method,
        path_and_query: impl Into<String>,
        mut headers: HeaderMap,
        body: Option<Value>,
    ) -> Self {
        headers.remove(header::CONTENT_LENGTH);
        headers.remove(header::TRANSFER_ENCODING);
        headers.remove(header::HOST);
        if body.is_some() {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        Self { method, path_and_query: path_and_query.into(), headers, body }
    }
}

/// Backend response headers relayed to the caller
const RELAYED_HEADERS: [HeaderName; 2] = [header::CONTENT_TYPE, header::CONTENT_ENCODING];

/// Raw backend response
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: StatusCode,
    /// Only the headers that describe `body`
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// HTTP client shared by every dispatch
#[derive(Clone)]
pub struct BackendTransport {
    client: Client,
    scheme: &'static str,
}

impl BackendTransport {
    /// Create a transport using `scheme` (`http` or `https`) for every backend
    pub fn new(scheme: &'static str, timeout: Duration) -> Result<Self, ProxyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, scheme })
    }

    /// Full URL of `path_and_query` on `backend`
    pub fn url(&self, backend: &Backend, path_and_query: &str) -> String {
        format!("{}://{}{}", self.scheme, backend.address, path_and_query)
    }

    /// Send `request` to `backend`.
    ///
    /// Any response, whatever its status, is returned as-is; only a failure to
    /// obtain one is an error.
    #[instrument(skip(self, request), fields(backend = %backend.id, method = %request.method))]
    pub async fn forward(
        &self,
        backend: &Backend,
        request: &ForwardRequest,
    ) -> Result<BackendResponse, ProxyError> {
        let url = self.url(backend, &request.path_and_query);
        debug!(url = %url, "Forwarding request");

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let mut headers = HeaderMap::new();
        for name in RELAYED_HEADERS {
            if let Some(value) = response.headers().get(&name) {
                headers.insert(name, value.clone());
            }
        }
        let body = response.bytes().await?;

        debug!(status = %status, bytes = body.len(), "Backend responded");
        Ok(BackendResponse { status, headers, body })
    }
}
