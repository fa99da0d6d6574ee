use http::header::CONTENT_LENGTH;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{Config, ConfigStore};
use crate::engine::cors::CorsGate;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::headers::{rewrite_request_headers, rewrite_response_headers};
use crate::engine::relay::{RelayClient, RelayRequest};
use crate::engine::request::InterceptedRequest;
use crate::engine::resolver::{real_caller_url, resolve};
use crate::engine::response::{RewrittenResponse, DEFAULT_STATUS};
use crate::engine::transform::{self, ContentCategory, PageConfig, TransformContext};
use crate::telemetry::Metrics;

/// Result of handling one intercepted request
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The path belongs to the proxy's own assets; serve it as is
    Asset(String),
    Response(RewrittenResponse),
}

/// The rewriting proxy engine
///
/// Stateless between requests apart from what the relay and gate keep. The
/// configuration snapshot is taken once per request and used for its whole
/// lifetime, so a reload never affects a request in flight.
pub struct RewritingEngine<R, G> {
    store: ConfigStore,
    relay: R,
    gate: G,
    metrics: Option<Arc<Metrics>>,
}

impl<R: RelayClient, G: CorsGate> RewritingEngine<R, G> {
    pub fn new(store: ConfigStore, relay: R, gate: G, metrics: Option<Arc<Metrics>>) -> Self {
        Self { store, relay, gate, metrics }
    }

    /// Handle one intercepted request
    ///
    /// Never fails: stage errors become a text response (503 when blocked by
    /// the cross-origin gate, 500 otherwise).
    pub async fn handle(&self, request: InterceptedRequest) -> Outcome {
        let config = self.store.snapshot();

        if is_own_asset(request.path(), &config) {
            if let Some(ref m) = self.metrics {
                m.record_asset_passthrough();
            }
            return Outcome::Asset(request.path().to_string());
        }

        let start = Instant::now();
        let response = match self.try_handle(&request, &config).await {
            Ok(response) => response,
            Err(e) => {
                debug!(path = %request.path(), error = %e, "Engine stage failed");
                if let Some(ref m) = self.metrics {
                    m.record_engine_error(e.error_type());
                }
                RewrittenResponse::from_error(&e)
            }
        };

        if let Some(ref m) = self.metrics {
            m.record_request(
                request.method().as_str(),
                request.kind().as_str(),
                response.status.as_u16(),
                start.elapsed().as_secs_f64(),
            );
        }

        Outcome::Response(response)
    }

    async fn try_handle(
        &self,
        request: &InterceptedRequest,
        config: &Config,
    ) -> EngineResult<RewrittenResponse> {
        let proxy = &config.proxy;
        let kind = request.kind();

        let target = resolve(
            request.caller(),
            request.path(),
            kind.is_navigation_or_iframe(),
            &proxy.control_prefix,
        )?;

        if self.gate.is_blocked(&target, &config.cors).await {
            return Err(EngineError::BlockedByPolicy(target.to_string()));
        }

        if proxy.debug.url {
            match kind.as_str() {
                "" => info!("{} {}", request.method(), target),
                destination => info!("{} {} ({})", request.method(), target, destination),
            }
        }

        let real_caller = request.caller().and_then(|c| real_caller_url(c, &proxy.control_prefix));
        let headers = rewrite_request_headers(
            request.headers(),
            &target,
            real_caller.as_ref(),
            &proxy.control_prefix,
        );

        let raw = self
            .relay
            .send(RelayRequest {
                target: target.clone(),
                method: request.method().clone(),
                headers,
                body: request.body().cloned(),
            })
            .await?;

        let status = raw.status.unwrap_or(DEFAULT_STATUS);
        let mut headers = rewrite_response_headers(&raw.headers);

        let category = ContentCategory::from_headers(&raw.headers);
        let selected = transform::select(kind, category, proxy.flags.nested_workers);
        let page = PageConfig::from_config(proxy);
        let ctx = TransformContext { target: &target, page: &page, asset_prefix: &proxy.asset_prefix };
        let body = transform::apply(selected, &raw.headers, raw.body, &ctx)?;

        if selected.is_textual() {
            headers.remove(CONTENT_LENGTH);
            if let Some(ref m) = self.metrics {
                m.record_transform(selected.as_str());
            }
        }

        Ok(RewrittenResponse { status, headers, body })
    }
}

/// Paths served from the proxy's own origin instead of being resolved
fn is_own_asset(path: &str, config: &Config) -> bool {
    let path_only = path.split('?').next().unwrap_or_default();
    path_only.starts_with(&config.proxy.asset_prefix)
        || path_only == config.proxy.service_worker_path
}
