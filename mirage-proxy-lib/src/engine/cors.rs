use ahash::AHashMap;
use async_trait::async_trait;
use http::header::{ACCESS_CONTROL_REQUEST_METHOD, ORIGIN};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::config::CorsConfig;
use crate::engine::relay::{RelayClient, RelayRequest};

/// Decides whether a target must be refused instead of relayed
///
/// Implementations approximate what the target's cross-origin policy would
/// do to the relay's declared origin.
#[async_trait]
pub trait CorsGate: Send + Sync {
    async fn is_blocked(&self, target: &Url, policy: &CorsConfig) -> bool;
}

/// Static policy: only `http`/`https` targets outside `blocked_hosts` pass
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyGate;

#[async_trait]
impl CorsGate for PolicyGate {
    async fn is_blocked(&self, target: &Url, policy: &CorsConfig) -> bool {
        blocked_by_policy(target, policy)
    }
}

/// Check `target` against the static policy
pub fn blocked_by_policy(target: &Url, policy: &CorsConfig) -> bool {
    if !matches!(target.scheme(), "http" | "https") {
        return true;
    }
    let Some(host) = target.host_str() else {
        return true;
    };
    policy.blocked_hosts.iter().any(|blocked| host_matches(host, blocked))
}

fn host_matches(host: &str, blocked: &str) -> bool {
    let blocked = blocked.trim().trim_start_matches('.').to_ascii_lowercase();
    if blocked.is_empty() {
        return false;
    }
    host == blocked
        || host.strip_suffix(blocked.as_str()).is_some_and(|rest| rest.ends_with('.'))
}

/// Static policy plus one preflight per origin through the relay
///
/// When `probe` is enabled, an origin answering the preflight with `403`
/// is treated as refusing the declared origin. Answers are cached per
/// origin; probe transport failures are not cached and count as allowed.
pub struct ProbeGate<R> {
    relay: R,
    declared_origin: String,
    cache: RwLock<AHashMap<String, bool>>,
}

impl<R: RelayClient> ProbeGate<R> {
    pub fn new(relay: R, declared_origin: impl Into<String>) -> Self {
        Self { relay, declared_origin: declared_origin.into(), cache: RwLock::new(AHashMap::new()) }
    }

    fn cached(&self, origin: &str) -> Option<bool> {
        match self.cache.read() {
            Ok(guard) => guard.get(origin).copied(),
            Err(_) => {
                tracing::warn!("CORS probe cache lock poisoned");
                None
            }
        }
    }

    fn remember(&self, origin: String, blocked: bool) {
        if let Ok(mut guard) = self.cache.write() {
            guard.insert(origin, blocked);
        }
    }

    async fn probe(&self, target: &Url) -> Option<bool> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_CONTROL_REQUEST_METHOD, HeaderValue::from_static("GET"));
        if let Ok(hv) = HeaderValue::from_str(&self.declared_origin) {
            headers.insert(ORIGIN, hv);
        }

        let request =
            RelayRequest { target: target.clone(), method: Method::OPTIONS, headers, body: None };

        match self.relay.send(request).await {
            Ok(resp) => Some(resp.status == Some(StatusCode::FORBIDDEN)),
            Err(e) => {
                debug!(url = %target, error = %e, "CORS probe failed, allowing");
                None
            }
        }
    }
}

#[async_trait]
impl<R: RelayClient> CorsGate for ProbeGate<R> {
    async fn is_blocked(&self, target: &Url, policy: &CorsConfig) -> bool {
        if blocked_by_policy(target, policy) {
            return true;
        }
        if !policy.probe {
            return false;
        }

        let origin = target.origin().ascii_serialization();
        if let Some(blocked) = self.cached(&origin) {
            return blocked;
        }

        match self.probe(target).await {
            Some(blocked) => {
                debug!(origin = %origin, blocked, "CORS probe result cached");
                self.remember(origin, blocked);
                blocked
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_matches_subdomains_only_on_label_boundary() {
        assert!(host_matches("example.com", "example.com"));
        assert!(host_matches("cdn.example.com", "example.com"));
        assert!(host_matches("cdn.example.com", ".Example.com"));
        assert!(!host_matches("badexample.com", "example.com"));
        assert!(!host_matches("example.com", ""));
    }
}
