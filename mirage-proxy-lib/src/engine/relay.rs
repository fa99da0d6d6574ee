use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::headers::{headers_to_json, RELAY_HEADERS_HEADER, RELAY_URL_HEADER};
use crate::engine::request::method_carries_body;
use crate::error::{ProxyError, Result};

type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Fully rewritten request for the relay
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub target: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Relay answer with its body already read
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// `None` when the relay did not report a status
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Outbound capability used by the engine
#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn send(&self, request: RelayRequest) -> EngineResult<RawResponse>;
}

#[async_trait]
impl<T: RelayClient + ?Sized> RelayClient for Arc<T> {
    async fn send(&self, request: RelayRequest) -> EngineResult<RawResponse> {
        (**self).send(request).await
    }
}

/// Relay client speaking the `x-url` / `x-headers` protocol over hyper
#[derive(Clone)]
pub struct HyperRelayClient {
    client: HttpClient,
    endpoint: http::Uri,
    timeout: Duration,
}

impl HyperRelayClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint: http::Uri = endpoint.parse()?;
        if endpoint.scheme_str() != Some("http") {
            return Err(ProxyError::Config(format!("Relay endpoint must use http: {endpoint}")));
        }
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self { client, endpoint, timeout })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.relay_endpoint(), Duration::from_millis(config.timeout.relay_ms))
    }

    pub fn endpoint(&self) -> &http::Uri {
        &self.endpoint
    }

    fn build_request(&self, request: RelayRequest) -> EngineResult<Request<Full<Bytes>>> {
        let url_value = HeaderValue::from_str(request.target.as_str())
            .map_err(|e| EngineError::RelayTransport(format!("invalid target URL header: {e}")))?;
        let headers_value = HeaderValue::from_str(&headers_to_json(&request.headers))
            .map_err(|e| EngineError::RelayTransport(format!("invalid header side channel: {e}")))?;

        let body = match request.body {
            Some(body) if method_carries_body(&request.method) => body,
            _ => Bytes::new(),
        };

        Request::builder()
            .method(request.method)
            .uri(self.endpoint.clone())
            .header(RELAY_URL_HEADER, url_value)
            .header(RELAY_HEADERS_HEADER, headers_value)
            .body(Full::new(body))
            .map_err(|e| EngineError::RelayTransport(format!("failed to build relay request: {e}")))
    }
}

#[async_trait]
impl RelayClient for HyperRelayClient {
    async fn send(&self, request: RelayRequest) -> EngineResult<RawResponse> {
        let target = request.target.clone();
        let out_req = self.build_request(request)?;

        let round_trip = async {
            let resp = self
                .client
                .request(out_req)
                .await
                .map_err(|e| EngineError::RelayTransport(format!("{target}: {e}")))?;
            let (parts, body) = resp.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| EngineError::RelayTransport(format!("{target}: reading body: {e}")))?
                .to_bytes();
            Ok::<_, EngineError>(RawResponse { status: Some(parts.status), headers: parts.headers, body })
        };

        match tokio::time::timeout(self.timeout, round_trip).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::RelayTransport(format!(
                "{target}: timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}
