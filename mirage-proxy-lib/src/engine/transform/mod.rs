//! Content transform pipeline.
//!
//! The transform applied to a relayed body is chosen by a closed dispatch on
//! the requested [`ResourceKind`] and the [`ContentCategory`] of the answer.
//! A `content-type`, when present, is authoritative; untyped answers are
//! judged by the resource kind alone.

pub mod html;
pub mod manifest;
pub mod scope;
pub mod worker;

use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use http::HeaderMap;
use url::Url;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::request::ResourceKind;
use crate::engine::response::ResponseBody;

pub use html::{wrap_document, PageConfig};
pub use manifest::rewrite_manifest;
pub use scope::{scope, NAMESPACE};
pub use worker::{prepend_shim, WorkerShim};

/// Broad family of a response `content-type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCategory {
    Html,
    Script,
    Json,
    Other,
    /// No `content-type` at all
    Untyped,
}

impl ContentCategory {
    pub fn from_content_type(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return ContentCategory::Untyped;
        };
        let essence = value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        match essence.as_str() {
            "" => ContentCategory::Untyped,
            "text/html" | "application/xhtml+xml" => ContentCategory::Html,
            "text/javascript"
            | "application/javascript"
            | "application/x-javascript"
            | "application/ecmascript"
            | "text/ecmascript"
            | "module" => ContentCategory::Script,
            "application/json" | "application/manifest+json" | "text/json" => {
                ContentCategory::Json
            }
            other if other.ends_with("+json") => ContentCategory::Json,
            _ => ContentCategory::Other,
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::from_content_type(headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()))
    }
}

/// Transform selected for one response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Html,
    Scope,
    Manifest,
    WorkerShim(WorkerShim),
    Passthrough,
}

impl Transform {
    /// Label used for metrics and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Transform::Html => "html",
            Transform::Scope => "scope",
            Transform::Manifest => "manifest",
            Transform::WorkerShim(_) => "worker_shim",
            Transform::Passthrough => "passthrough",
        }
    }

    /// Whether the transform rewrites the body as text
    pub fn is_textual(self) -> bool {
        !matches!(self, Transform::Passthrough)
    }
}

/// Choose the transform for a response
pub fn select(kind: ResourceKind, category: ContentCategory, nested_workers: bool) -> Transform {
    use ContentCategory as C;
    use ResourceKind as K;

    match (kind, category) {
        (K::Navigation | K::Iframe, C::Html | C::Untyped) => Transform::Html,
        (K::Script, C::Script | C::Untyped) => Transform::Scope,
        (K::Manifest, C::Json | C::Untyped) => Transform::Manifest,
        (K::Worker, C::Script | C::Untyped) if nested_workers => {
            Transform::WorkerShim(WorkerShim::Dedicated)
        }
        (K::SharedWorker, C::Script | C::Untyped) if nested_workers => {
            Transform::WorkerShim(WorkerShim::Shared)
        }
        (K::ServiceWorker, C::Script | C::Untyped) if nested_workers => {
            Transform::WorkerShim(WorkerShim::Service)
        }
        (
            K::Navigation
            | K::Iframe
            | K::Script
            | K::Manifest
            | K::Worker
            | K::SharedWorker
            | K::ServiceWorker
            | K::Other,
            C::Html | C::Script | C::Json | C::Other | C::Untyped,
        ) => Transform::Passthrough,
    }
}

/// Inputs a transform may need besides the body
pub struct TransformContext<'a> {
    /// Real URL of the fetched resource
    pub target: &'a Url,
    pub page: &'a PageConfig,
    pub asset_prefix: &'a str,
}

/// Apply `transform` to a relayed body
///
/// Passthrough returns the bytes untouched. Text transforms decode the body
/// as UTF-8 (lossily) and refuse bodies that still carry a content encoding.
pub fn apply(
    transform: Transform,
    headers: &HeaderMap,
    body: Bytes,
    ctx: &TransformContext<'_>,
) -> EngineResult<ResponseBody> {
    if !transform.is_textual() {
        return Ok(ResponseBody::Bytes(body));
    }
    ensure_identity_encoding(headers)?;

    let text = String::from_utf8_lossy(&body);
    let out = match transform {
        Transform::Html => match wrap_document(&text, ctx.target, ctx.page) {
            Some(doc) => doc,
            None => return Ok(ResponseBody::Bytes(body)),
        },
        Transform::Scope => scope(&text),
        Transform::Manifest => rewrite_manifest(&text, ctx.target, &ctx.page.prefix)?,
        Transform::WorkerShim(shim) => {
            prepend_shim(shim, ctx.asset_prefix, &ctx.page.prefix, &text)
        }
        Transform::Passthrough => return Ok(ResponseBody::Bytes(body)),
    };
    Ok(ResponseBody::Text(out))
}

fn ensure_identity_encoding(headers: &HeaderMap) -> EngineResult<()> {
    for value in headers.get_all(CONTENT_ENCODING) {
        let encoding = value.to_str().unwrap_or_default().trim();
        if !encoding.is_empty() && !encoding.eq_ignore_ascii_case("identity") {
            return Err(EngineError::Transform(format!(
                "cannot rewrite a body with content-encoding {encoding}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_category() {
        assert_eq!(ContentCategory::from_content_type(None), ContentCategory::Untyped);
        assert_eq!(
            ContentCategory::from_content_type(Some("text/html; charset=UTF-8")),
            ContentCategory::Html
        );
        assert_eq!(
            ContentCategory::from_content_type(Some("application/javascript")),
            ContentCategory::Script
        );
        assert_eq!(
            ContentCategory::from_content_type(Some("application/manifest+json")),
            ContentCategory::Json
        );
        assert_eq!(ContentCategory::from_content_type(Some("image/png")), ContentCategory::Other);
    }

    #[test]
    fn test_content_type_is_authoritative() {
        assert_eq!(
            select(ResourceKind::Navigation, ContentCategory::Json, true),
            Transform::Passthrough
        );
        assert_eq!(select(ResourceKind::Script, ContentCategory::Html, true), Transform::Passthrough);
        assert_eq!(select(ResourceKind::Other, ContentCategory::Html, true), Transform::Passthrough);
        assert_eq!(select(ResourceKind::Iframe, ContentCategory::Untyped, true), Transform::Html);
    }

    #[test]
    fn test_worker_shim_gated_by_flag() {
        assert_eq!(
            select(ResourceKind::SharedWorker, ContentCategory::Script, true),
            Transform::WorkerShim(WorkerShim::Shared)
        );
        assert_eq!(
            select(ResourceKind::SharedWorker, ContentCategory::Script, false),
            Transform::Passthrough
        );
    }
}
