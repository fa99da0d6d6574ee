//! Turning an incoming request on the controlling origin into an
//! [`InterceptedRequest`].
//!
//! Requests re-issued by the service worker carry the page URL and the
//! original destination in their own headers; those win over the Fetch
//! Metadata headers and the `Referer`, which a page's referrer policy may
//! have trimmed. A caller is kept only when it points at a proxied page.

use bytes::Bytes;
use http::header::REFERER;
use http::request::Parts;
use http::{HeaderMap, HeaderValue};
use url::{Position, Url};

use crate::engine::headers::{CLIENT_URL_HEADER, DESTINATION_HEADER};
use crate::engine::{InterceptedRequest, ResourceKind};

pub const SEC_FETCH_DEST: &str = "sec-fetch-dest";
pub const SEC_FETCH_MODE: &str = "sec-fetch-mode";

/// Destination of the request; `Other` when the client sent no metadata
pub fn resource_kind(headers: &HeaderMap) -> ResourceKind {
    let destination = headers
        .get(DESTINATION_HEADER)
        .or_else(|| headers.get(SEC_FETCH_DEST))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let navigate = headers
        .get(SEC_FETCH_MODE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|mode| mode.eq_ignore_ascii_case("navigate"));
    ResourceKind::from_destination(destination, navigate)
}

/// Page the request was made from, if it is a proxied one
pub fn caller_context(headers: &HeaderMap, control_prefix: &str) -> Option<Url> {
    [&CLIENT_URL_HEADER, &REFERER]
        .into_iter()
        .find_map(|name| proxied_page(headers.get(name)?, control_prefix))
}

fn proxied_page(value: &HeaderValue, control_prefix: &str) -> Option<Url> {
    let url = Url::parse(value.to_str().ok()?).ok()?;
    url[Position::BeforePath..].starts_with(control_prefix).then_some(url)
}

/// Build the engine's view of a request
pub fn intercepted_request(parts: &Parts, body: Bytes, control_prefix: &str) -> InterceptedRequest {
    let path = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let mut request =
        InterceptedRequest::new(parts.method.clone(), path, resource_kind(&parts.headers))
            .with_headers(&parts.headers)
            .with_body(body);
    if let Some(caller) = caller_context(&parts.headers, control_prefix) {
        request = request.with_caller(caller);
    }
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigation_needs_navigate_mode() {
        let mut headers = HeaderMap::new();
        headers.insert(SEC_FETCH_DEST, HeaderValue::from_static("document"));
        assert_eq!(resource_kind(&headers), ResourceKind::Other);
        headers.insert(SEC_FETCH_MODE, HeaderValue::from_static("navigate"));
        assert_eq!(resource_kind(&headers), ResourceKind::Navigation);
    }

    #[test]
    fn test_referer_outside_prefix_is_not_a_caller() {
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_static("http://localhost:8080/index.html"));
        assert!(caller_context(&headers, "/go/").is_none());
        headers.insert(
            REFERER,
            HeaderValue::from_static("http://localhost:8080/go/https://example.com/"),
        );
        assert!(caller_context(&headers, "/go/").is_some());
    }

    #[test]
    fn test_service_worker_headers_win() {
        let mut headers = HeaderMap::new();
        headers.insert(SEC_FETCH_DEST, HeaderValue::from_static("empty"));
        headers.insert(DESTINATION_HEADER, HeaderValue::from_static("script"));
        assert_eq!(resource_kind(&headers), ResourceKind::Script);

        headers.insert(REFERER, HeaderValue::from_static("http://localhost:8080/"));
        headers.insert(
            CLIENT_URL_HEADER,
            HeaderValue::from_static("http://localhost:8080/go/https://example.com/a/"),
        );
        let caller = caller_context(&headers, "/go/").map(|u| u.to_string());
        assert_eq!(caller.as_deref(), Some("http://localhost:8080/go/https://example.com/a/"));
    }
}
