//! Header policy for both directions of a relayed request, plus the JSON
//! side channel used to carry request headers to the relay.

use http::header::{AGE, CACHE_CONTROL, EXPIRES, HOST, ORIGIN, REFERER};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use url::{Position, Url};

use crate::engine::resolver::decode_target;

/// Relay request header carrying the real target URL
pub const RELAY_URL_HEADER: &str = "x-url";
/// Relay request header carrying the target's request headers as JSON
pub const RELAY_HEADERS_HEADER: &str = "x-headers";

/// Set by the service worker: URL of the page that issued the request
pub const CLIENT_URL_HEADER: HeaderName = HeaderName::from_static("x-mirage-client");
/// Set by the service worker: `Request.destination` of the original request
pub const DESTINATION_HEADER: HeaderName = HeaderName::from_static("x-mirage-destination");

/// Value forced on every relayed response
pub const NO_CACHE: &str = "no-cache";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestRule {
    /// Replace with the target's authority
    TargetHost,
    /// Replace with the real caller's origin
    CallerOrigin,
    /// Strip the controlling origin and control prefix
    StripControlPrefix,
    /// Proxy-internal, never sent to the target
    Drop,
}

/// Request policy table; unlisted headers pass through unchanged
static REQUEST_RULES: [(HeaderName, RequestRule); 5] = [
    (HOST, RequestRule::TargetHost),
    (ORIGIN, RequestRule::CallerOrigin),
    (REFERER, RequestRule::StripControlPrefix),
    (CLIENT_URL_HEADER, RequestRule::Drop),
    (DESTINATION_HEADER, RequestRule::Drop),
];

/// Response headers dropped unconditionally
static CACHE_HEADERS: [HeaderName; 3] = [AGE, CACHE_CONTROL, EXPIRES];

fn request_rule(name: &HeaderName) -> Option<RequestRule> {
    REQUEST_RULES
        .iter()
        .find(|(rule_name, _)| rule_name == name)
        .map(|(_, rule)| *rule)
}

/// Rewrite outbound request headers so the target sees its own origin
///
/// # Arguments
/// * `headers` - headers of the intercepted request
/// * `target` - resolved target URL
/// * `real_caller` - URL the caller believes it is on, if known
/// * `control_prefix` - configured control prefix
///
/// `host` always names the target; `origin` (when sent) names the real
/// caller, or the target without a caller; `referer` loses the controlling
/// origin and is dropped when it does not point at a proxied URL; the
/// service worker's own headers are dropped.
pub fn rewrite_request_headers(
    headers: &HeaderMap,
    target: &Url,
    real_caller: Option<&Url>,
    control_prefix: &str,
) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len().saturating_add(1));

    for (name, value) in headers {
        match request_rule(name) {
            None => {
                out.append(name.clone(), value.clone());
            }
            Some(RequestRule::TargetHost | RequestRule::Drop) => {}
            Some(RequestRule::CallerOrigin) => {
                let origin = real_caller.map_or_else(|| origin_of(target), origin_of);
                match HeaderValue::from_str(&origin) {
                    Ok(hv) => {
                        out.insert(ORIGIN, hv);
                    }
                    Err(e) => tracing::warn!(origin = %origin, error = %e, "Failed to build origin header"),
                }
            }
            Some(RequestRule::StripControlPrefix) => {
                if let Some(hv) = rewrite_referer(value, control_prefix) {
                    out.insert(REFERER, hv);
                } else {
                    tracing::trace!("Dropped referer without proxied target");
                }
            }
        }
    }

    match HeaderValue::from_str(&target[Position::BeforeHost..Position::AfterPort]) {
        Ok(hv) => {
            out.insert(HOST, hv);
        }
        Err(e) => tracing::warn!(url = %target, error = %e, "Failed to build host header"),
    }

    out
}

/// Rewrite inbound response headers: purge caching fields, force `no-cache`
pub fn rewrite_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len().saturating_add(1));
    for (name, value) in headers {
        if !CACHE_HEADERS.contains(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out.insert(CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    out
}

fn rewrite_referer(value: &HeaderValue, control_prefix: &str) -> Option<HeaderValue> {
    let referer = Url::parse(value.to_str().ok()?).ok()?;
    let real = decode_target(&referer[Position::BeforePath..Position::AfterQuery], control_prefix)?;
    HeaderValue::from_str(real.as_str()).ok()
}

fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Serialize headers as a JSON object for the relay side channel
///
/// Repeated names are joined with `", "`; non-text values are skipped.
pub fn headers_to_json(headers: &HeaderMap) -> String {
    let mut map = Map::new();
    for name in headers.keys() {
        let values: Vec<&str> =
            headers.get_all(name).iter().filter_map(|v| v.to_str().ok()).collect();
        if !values.is_empty() {
            map.insert(name.as_str().to_string(), Value::String(values.join(", ")));
        }
    }
    Value::Object(map).to_string()
}

/// Parse the relay side channel back into a header map
pub fn headers_from_json(raw: &str) -> Result<HeaderMap, String> {
    let value: Value = serde_json::from_str(raw).map_err(|e| format!("invalid header JSON: {e}"))?;
    let Value::Object(map) = value else {
        return Err("header JSON must be an object".to_string());
    };

    let mut headers = HeaderMap::with_capacity(map.len());
    for (name, value) in map {
        let Value::String(text) = value else {
            return Err(format!("header {name:?} must be a string"));
        };
        let name = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
            .map_err(|e| format!("invalid header name {name:?}: {e}"))?;
        let value =
            HeaderValue::from_str(&text).map_err(|e| format!("invalid value for {name}: {e}"))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
