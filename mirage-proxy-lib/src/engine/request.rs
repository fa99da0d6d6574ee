use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;

/// What the intercepted request is fetching
///
/// Derived from the declared destination and the navigate flag, never from
/// the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Navigation,
    Iframe,
    Script,
    Manifest,
    Worker,
    SharedWorker,
    ServiceWorker,
    Other,
}

impl ResourceKind {
    /// Map a Fetch destination (`Sec-Fetch-Dest` / `Request.destination`)
    /// plus the navigate mode flag to a kind
    pub fn from_destination(destination: &str, navigate: bool) -> Self {
        match destination.trim().to_ascii_lowercase().as_str() {
            "document" if navigate => ResourceKind::Navigation,
            "iframe" | "frame" => ResourceKind::Iframe,
            "script" => ResourceKind::Script,
            "manifest" => ResourceKind::Manifest,
            "worker" => ResourceKind::Worker,
            "sharedworker" => ResourceKind::SharedWorker,
            "serviceworker" => ResourceKind::ServiceWorker,
            _ => ResourceKind::Other,
        }
    }

    pub fn is_navigation_or_iframe(self) -> bool {
        matches!(self, ResourceKind::Navigation | ResourceKind::Iframe)
    }

    pub fn is_worker(self) -> bool {
        matches!(
            self,
            ResourceKind::Worker | ResourceKind::SharedWorker | ResourceKind::ServiceWorker
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Navigation => "document",
            ResourceKind::Iframe => "iframe",
            ResourceKind::Script => "script",
            ResourceKind::Manifest => "manifest",
            ResourceKind::Worker => "worker",
            ResourceKind::SharedWorker => "sharedworker",
            ResourceKind::ServiceWorker => "serviceworker",
            ResourceKind::Other => "",
        }
    }
}

/// Whether a request body is forwarded for this method
pub fn method_carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// One intercepted fetch, immutable once built
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    method: Method,
    path: String,
    caller: Option<Url>,
    kind: ResourceKind,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl InterceptedRequest {
    /// `path` is the path and query on the controlling origin
    pub fn new(method: Method, path: impl Into<String>, kind: ResourceKind) -> Self {
        Self { method, path: path.into(), caller: None, kind, headers: HeaderMap::new(), body: None }
    }

    /// URL the calling client currently shows (on the controlling origin, or
    /// already real)
    pub fn with_caller(mut self, caller: Url) -> Self {
        self.caller = Some(caller);
        self
    }

    /// Replace the headers; a repeated name keeps its last value
    pub fn with_headers<'a, I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a HeaderName, &'a HeaderValue)>,
    {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(name.clone(), value.clone());
        }
        self.headers = map;
        self
    }

    /// Attach a body; ignored for methods that do not carry one
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = method_carries_body(&self.method).then_some(body);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn caller(&self) -> Option<&Url> {
        self.caller.as_ref()
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_mapping() {
        assert_eq!(ResourceKind::from_destination("document", true), ResourceKind::Navigation);
        assert_eq!(ResourceKind::from_destination("document", false), ResourceKind::Other);
        assert_eq!(ResourceKind::from_destination("iframe", false), ResourceKind::Iframe);
        assert_eq!(ResourceKind::from_destination("Script", false), ResourceKind::Script);
        assert_eq!(ResourceKind::from_destination("sharedworker", false), ResourceKind::SharedWorker);
        assert_eq!(ResourceKind::from_destination("", false), ResourceKind::Other);
        assert_eq!(ResourceKind::from_destination("image", false), ResourceKind::Other);
    }

    #[test]
    fn test_duplicate_headers_last_value_wins() {
        let mut raw = HeaderMap::new();
        raw.append("x-dup", HeaderValue::from_static("first"));
        raw.append("x-dup", HeaderValue::from_static("second"));

        let req = InterceptedRequest::new(Method::GET, "/", ResourceKind::Other).with_headers(&raw);

        assert_eq!(req.headers().get_all("x-dup").iter().count(), 1);
        assert_eq!(req.headers().get("x-dup").map(|v| v.as_bytes()), Some(b"second".as_ref()));
    }

    #[test]
    fn test_body_only_for_body_methods() {
        let get = InterceptedRequest::new(Method::GET, "/", ResourceKind::Other)
            .with_body(Bytes::from_static(b"ignored"));
        assert!(get.body().is_none());

        let post = InterceptedRequest::new(Method::POST, "/", ResourceKind::Other)
            .with_body(Bytes::from_static(b"kept"));
        assert_eq!(post.body().map(|b| b.as_ref()), Some(b"kept".as_ref()));
    }
}
