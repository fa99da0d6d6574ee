use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};

use crate::engine::error::EngineError;
use crate::engine::headers::NO_CACHE;

/// Status used when the relay answer carries none
///
/// Kept as an explicit default: backends that omit a status have always been
/// served as 200.
pub const DEFAULT_STATUS: StatusCode = StatusCode::OK;

/// Body of a rewritten response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Upstream bytes, untouched
    Bytes(Bytes),
    /// Output of a text transform
    Text(String),
}

impl ResponseBody {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ResponseBody::Bytes(b) => b,
            ResponseBody::Text(s) => s.as_bytes(),
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            ResponseBody::Bytes(b) => b,
            ResponseBody::Text(s) => Bytes::from(s),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Response handed back to the intercepting context
#[derive(Debug, Clone)]
pub struct RewrittenResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl RewrittenResponse {
    /// Text response describing an engine failure
    pub fn from_error(error: &EngineError) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
        Self {
            status: StatusCode::from(error),
            headers,
            body: ResponseBody::Text(error.to_string()),
        }
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(self.body.as_bytes()).into_owned()
    }
}
