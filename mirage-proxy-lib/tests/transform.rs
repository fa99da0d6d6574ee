use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};
use mirage_proxy_lib::config::{ProxyConfig, SharedModule};
use mirage_proxy_lib::engine::transform::{
    apply, rewrite_manifest, scope, select, wrap_document, ContentCategory, PageConfig, Transform,
    TransformContext, WorkerShim,
};
use mirage_proxy_lib::engine::{EngineError, ResourceKind, ResponseBody};
use url::Url;

fn page() -> PageConfig {
    PageConfig::from_config(&ProxyConfig::default())
}

fn typed(content_type: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers
}

#[test]
fn passthrough_keeps_bytes_identical() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let target = Url::parse("https://example.com/logo.png")?;
    let page = page();
    let ctx = TransformContext { target: &target, page: &page, asset_prefix: "/mirage/" };
    let body = Bytes::from_static(&[0x89, 0x50, 0x4e, 0x47, 0xff, 0x00]);

    let out = apply(Transform::Passthrough, &typed("image/png"), body.clone(), &ctx)?;
    assert_eq!(out, ResponseBody::Bytes(body));
    Ok(())
}

#[test]
fn html_document_is_wrapped_with_bootstrap() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let target = Url::parse("https://example.com/a/")?;
    let doc = wrap_document("<p>hello</p>", &target, &page()).ok_or("document not wrapped")?;

    assert!(doc.starts_with("<!DOCTYPE html>"));
    assert!(doc.ends_with("<p>hello</p>"));
    assert!(doc.contains(r#"<meta charset="utf-8">"#));
    assert!(doc.contains("/go/https://example.com/favicon.ico"));
    assert!(doc.contains(r#"navigator.serviceWorker"#));
    assert!(doc.contains(r#".register("/sw.js""#));
    assert!(doc.contains(r#"scope: "/go/""#));
    assert!(doc.contains("Object.freeze("));
    assert!(doc.contains(r#""nestedWorkers":true"#));
    assert!(doc.contains("$mirage.imports"));
    Ok(())
}

#[test]
fn empty_document_is_served_unchanged() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let target = Url::parse("https://example.com/")?;
    let page = page();
    assert!(wrap_document("", &target, &page).is_none());

    let ctx = TransformContext { target: &target, page: &page, asset_prefix: "/mirage/" };
    let out = apply(Transform::Html, &typed("text/html"), Bytes::new(), &ctx)?;
    assert!(out.is_empty());
    Ok(())
}

#[test]
fn shared_modules_are_inlined_and_listed() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let target = Url::parse("https://example.com/")?;
    let mut page = page();
    page.shared_modules = vec![SharedModule {
        name: "/mirage/bootstrap.js".to_string(),
        source: "var s = '</script>';".to_string(),
    }];

    let doc = wrap_document("<body></body>", &target, &page).ok_or("document not wrapped")?;
    assert!(doc.contains(r#"<script data-module="/mirage/bootstrap.js">"#));
    assert!(doc.contains(r"var s = '<\/script>';"));
    Ok(())
}

#[test]
fn scripts_get_scoped() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let target = Url::parse("https://example.com/app.js")?;
    let page = page();
    let ctx = TransformContext { target: &target, page: &page, asset_prefix: "/mirage/" };

    let body = Bytes::from_static(b"if (location.pathname === '/') window.location.href = '/home';");
    let out = apply(Transform::Scope, &typed("application/javascript"), body, &ctx)?;
    let ResponseBody::Text(text) = out else {
        return Err("expected text output".into());
    };
    assert_eq!(
        text,
        "if ($mirage.location.pathname === '/') $mirage.location.href = '/home';"
    );
    assert_eq!(scope(&text), text);
    Ok(())
}

#[test]
fn manifest_urls_route_through_prefix() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let manifest_url = Url::parse("https://example.com/manifest.json")?;
    let source = r#"{
        "name": "Example",
        "start_url": "/?source=pwa",
        "scope": "/",
        "icons": [{"src": "/icon.png", "sizes": "192x192"}],
        "screenshots": [{"src": "shots/1.png"}],
        "shortcuts": [{"name": "Inbox", "url": "/inbox", "icons": [{"src": "https://cdn.example.net/i.png"}]}]
    }"#;

    let out = rewrite_manifest(source, &manifest_url, "/go/")?;
    let value: serde_json::Value = serde_json::from_str(&out)?;
    assert_eq!(value["name"], "Example");
    assert_eq!(value["start_url"], "/go/https://example.com/?source=pwa");
    assert_eq!(value["scope"], "/go/https://example.com/");
    assert_eq!(value["icons"][0]["src"], "/go/https://example.com/icon.png");
    assert_eq!(value["icons"][0]["sizes"], "192x192");
    assert_eq!(value["screenshots"][0]["src"], "/go/https://example.com/shots/1.png");
    assert_eq!(value["shortcuts"][0]["url"], "/go/https://example.com/inbox");
    assert_eq!(value["shortcuts"][0]["icons"][0]["src"], "/go/https://cdn.example.net/i.png");
    Ok(())
}

#[test]
fn malformed_manifest_is_a_transform_error() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let target = Url::parse("https://example.com/manifest.json")?;
    let page = page();
    let ctx = TransformContext { target: &target, page: &page, asset_prefix: "/mirage/" };

    let err = apply(
        Transform::Manifest,
        &typed("application/manifest+json"),
        Bytes::from_static(b"{ not json"),
        &ctx,
    )
    .err();
    assert!(matches!(err, Some(EngineError::Transform(_))));
    Ok(())
}

#[test]
fn worker_scripts_get_the_shim() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let target = Url::parse("https://example.com/sw.js")?;
    let page = page();
    let ctx = TransformContext { target: &target, page: &page, asset_prefix: "/mirage/" };

    let out = apply(
        Transform::WorkerShim(WorkerShim::Service),
        &typed("text/javascript"),
        Bytes::from_static(b"self.addEventListener('fetch', () => {});"),
        &ctx,
    )?;
    let ResponseBody::Text(text) = out else {
        return Err("expected text output".into());
    };
    assert!(text.starts_with("if (typeof importScripts === \"function\")"));
    assert!(text.contains("importScripts(\"/mirage/workers/worker.js\");"));
    assert!(text.contains("importScripts(\"/mirage/workers/serviceworker.js\");"));
    assert!(text.contains(r#""prefix":"/go/""#));
    assert!(text.ends_with("self.addEventListener('fetch', () => {});"));
    Ok(())
}

#[test]
fn worker_shim_follows_flag() {
    for (kind, shim) in [
        (ResourceKind::Worker, WorkerShim::Dedicated),
        (ResourceKind::SharedWorker, WorkerShim::Shared),
        (ResourceKind::ServiceWorker, WorkerShim::Service),
    ] {
        assert_eq!(select(kind, ContentCategory::Script, true), Transform::WorkerShim(shim));
        assert_eq!(select(kind, ContentCategory::Untyped, true), Transform::WorkerShim(shim));
        assert_eq!(select(kind, ContentCategory::Script, false), Transform::Passthrough);
    }
}

#[test]
fn selection_by_kind_and_type() {
    assert_eq!(select(ResourceKind::Navigation, ContentCategory::Html, true), Transform::Html);
    assert_eq!(select(ResourceKind::Iframe, ContentCategory::Html, false), Transform::Html);
    assert_eq!(select(ResourceKind::Script, ContentCategory::Script, true), Transform::Scope);
    assert_eq!(select(ResourceKind::Script, ContentCategory::Untyped, true), Transform::Scope);
    assert_eq!(select(ResourceKind::Manifest, ContentCategory::Json, true), Transform::Manifest);
    assert_eq!(select(ResourceKind::Navigation, ContentCategory::Other, true), Transform::Passthrough);
    assert_eq!(select(ResourceKind::Other, ContentCategory::Script, true), Transform::Passthrough);
    assert_eq!(select(ResourceKind::Manifest, ContentCategory::Html, true), Transform::Passthrough);
}

#[test]
fn encoded_bodies_are_not_rewritten() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let target = Url::parse("https://example.com/")?;
    let page = page();
    let ctx = TransformContext { target: &target, page: &page, asset_prefix: "/mirage/" };

    let mut headers = typed("text/html");
    headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    let err = apply(Transform::Html, &headers, Bytes::from_static(b"\x1f\x8b"), &ctx).err();
    assert!(matches!(err, Some(EngineError::Transform(_))));

    headers.insert(CONTENT_ENCODING, HeaderValue::from_static("identity"));
    assert!(apply(Transform::Html, &headers, Bytes::from_static(b"<p></p>"), &ctx).is_ok());

    headers.insert(CONTENT_ENCODING, HeaderValue::from_static("br"));
    let bytes = Bytes::from_static(b"\x0b\x02");
    let out = apply(Transform::Passthrough, &headers, bytes.clone(), &ctx)?;
    assert_eq!(out, ResponseBody::Bytes(bytes));
    Ok(())
}
