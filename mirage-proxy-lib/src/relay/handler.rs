use bytes::Bytes;
use http::header::{
    ACCEPT_ENCODING, CACHE_CONTROL, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST,
    PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
};
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Body;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::engine::headers::{
    headers_from_json, rewrite_response_headers, RELAY_HEADERS_HEADER, RELAY_URL_HEADER,
};
use crate::engine::request::method_carries_body;
use crate::error::{ProxyError, Result};
use crate::telemetry::Metrics;

type RespBody = BoxBody<Bytes, hyper::Error>;

/// Headers that only describe one hop and are never relayed
static HOP_BY_HOP: [HeaderName; 8] = [
    CONNECTION,
    HeaderName::from_static("keep-alive"),
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    TE,
    TRAILER,
    TRANSFER_ENCODING,
    UPGRADE,
];

/// Failures of the relay endpoint, all answered with `500`
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Missing x-url header")]
    MissingTarget,

    #[error("Invalid x-url header: {0}")]
    InvalidTarget(String),

    #[error("Invalid x-headers header: {0}")]
    InvalidHeaders(String),

    #[error("Failed to read request body: {0}")]
    Body(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),
}

impl RelayError {
    pub fn error_type(&self) -> &'static str {
        match self {
            RelayError::MissingTarget => "missing_target",
            RelayError::InvalidTarget(_) => "invalid_target",
            RelayError::InvalidHeaders(_) => "invalid_headers",
            RelayError::Body(_) => "body",
            RelayError::Fetch(_) => "fetch",
        }
    }
}

/// Fetch relay behind `relay_api_path`
///
/// Performs the request named by `x-url` with the headers carried in
/// `x-headers`, and answers with the origin's status and bytes under a
/// no-cache policy.
#[derive(Clone)]
pub struct RelayBackend {
    client: reqwest::Client,
    metrics: Option<Arc<Metrics>>,
}

impl RelayBackend {
    pub fn new(timeout: Duration, metrics: Option<Arc<Metrics>>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProxyError::Http(format!("Failed to build relay client: {e}")))?;
        Ok(Self { client, metrics })
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<RespBody>
    where
        B: Body<Data = Bytes>,
        B::Error: std::fmt::Display,
    {
        let start = Instant::now();
        match self.fetch(req).await {
            Ok(resp) => {
                if let Some(ref m) = self.metrics {
                    m.record_relay(resp.status().as_u16(), start.elapsed().as_secs_f64());
                }
                resp
            }
            Err(e) => {
                debug!(error = %e, "Relay request failed");
                if let Some(ref m) = self.metrics {
                    m.record_relay_error(e.error_type());
                }
                error_response(&e)
            }
        }
    }

    async fn fetch<B>(
        &self,
        req: Request<B>,
    ) -> std::result::Result<Response<RespBody>, RelayError>
    where
        B: Body<Data = Bytes>,
        B::Error: std::fmt::Display,
    {
        let (parts, body) = req.into_parts();

        let raw_target = parts
            .headers
            .get(RELAY_URL_HEADER)
            .ok_or(RelayError::MissingTarget)?
            .to_str()
            .map_err(|e| RelayError::InvalidTarget(e.to_string()))?;
        let target = Url::parse(raw_target)
            .map_err(|e| RelayError::InvalidTarget(format!("{raw_target}: {e}")))?;
        if !matches!(target.scheme(), "http" | "https") {
            let scheme = target.scheme();
            return Err(RelayError::InvalidTarget(format!("unsupported scheme {scheme}")));
        }

        let forwarded = match parts.headers.get(RELAY_HEADERS_HEADER) {
            Some(raw) => {
                let raw = raw.to_str().map_err(|e| RelayError::InvalidHeaders(e.to_string()))?;
                headers_from_json(raw).map_err(RelayError::InvalidHeaders)?
            }
            None => HeaderMap::new(),
        };

        let mut request = self
            .client
            .request(parts.method.clone(), target.clone())
            .headers(outbound_headers(&forwarded));

        if method_carries_body(&parts.method) {
            let body = body
                .collect()
                .await
                .map_err(|e| RelayError::Body(e.to_string()))?
                .to_bytes();
            request = request.body(body);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| RelayError::Fetch(format!("{target}: {e}")))?;
        let status = resp.status();
        let headers = inbound_headers(resp.headers());
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RelayError::Fetch(format!("{target}: reading body: {e}")))?;

        debug!(url = %target, status = status.as_u16(), bytes = bytes.len(), "Relayed");

        let mut out = Response::new(full_body(bytes));
        *out.status_mut() = status;
        *out.headers_mut() = headers;
        Ok(out)
    }
}

/// Headers sent to the origin: hop-by-hop fields, `host`, `content-length`
/// and `accept-encoding` are left to the client
pub fn outbound_headers(forwarded: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(forwarded.len());
    for (name, value) in forwarded {
        let dropped = HOP_BY_HOP.contains(name)
            || *name == HOST
            || *name == CONTENT_LENGTH
            || *name == ACCEPT_ENCODING;
        if !dropped {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Headers returned to the engine: hop-by-hop fields and `content-length`
/// dropped, caching purged and replaced with `no-cache`
pub fn inbound_headers(origin: &HeaderMap) -> HeaderMap {
    let mut out = rewrite_response_headers(origin);
    for name in HOP_BY_HOP.iter() {
        out.remove(name);
    }
    out.remove(CONTENT_LENGTH);
    out
}

fn error_response(error: &RelayError) -> Response<RespBody> {
    let mut resp = Response::new(full_body(Bytes::from(error.to_string())));
    *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    let headers = resp.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    resp
}

fn full_body(bytes: Bytes) -> RespBody {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}
