use http::header::{
    ACCEPT, AGE, CACHE_CONTROL, CONTENT_TYPE, COOKIE, EXPIRES, HOST, ORIGIN, REFERER,
};
use http::{HeaderMap, HeaderValue};
use mirage_proxy_lib::engine::headers::{
    headers_from_json, headers_to_json, rewrite_request_headers, rewrite_response_headers,
};
use url::Url;

const PREFIX: &str = "/go/";

#[test]
fn host_always_names_the_target() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let target = Url::parse("https://example.com:8443/a")?;

    let mut headers = HeaderMap::new();
    headers.insert(HOST, HeaderValue::from_static("localhost:8080"));
    let out = rewrite_request_headers(&headers, &target, None, PREFIX);
    assert_eq!(out.get(HOST).ok_or("host missing")?, "example.com:8443");

    let out = rewrite_request_headers(&HeaderMap::new(), &target, None, PREFIX);
    assert_eq!(out.get(HOST).ok_or("host missing")?, "example.com:8443");
    Ok(())
}

#[test]
fn origin_names_the_real_caller() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let target = Url::parse("https://api.example.com/data")?;
    let caller = Url::parse("https://example.com/page")?;

    let mut headers = HeaderMap::new();
    headers.insert(ORIGIN, HeaderValue::from_static("http://localhost:8080"));

    let out = rewrite_request_headers(&headers, &target, Some(&caller), PREFIX);
    assert_eq!(out.get(ORIGIN).ok_or("origin missing")?, "https://example.com");

    let out = rewrite_request_headers(&headers, &target, None, PREFIX);
    assert_eq!(out.get(ORIGIN).ok_or("origin missing")?, "https://api.example.com");
    Ok(())
}

#[test]
fn origin_is_not_invented() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let target = Url::parse("https://example.com/")?;
    let out = rewrite_request_headers(&HeaderMap::new(), &target, None, PREFIX);
    assert!(out.get(ORIGIN).is_none());
    Ok(())
}

#[test]
fn referer_loses_controlling_origin() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let target = Url::parse("https://example.com/b")?;

    let mut headers = HeaderMap::new();
    headers.insert(
        REFERER,
        HeaderValue::from_static("http://localhost:8080/go/https://example.com/a?x=1"),
    );
    let out = rewrite_request_headers(&headers, &target, None, PREFIX);
    assert_eq!(out.get(REFERER).ok_or("referer missing")?, "https://example.com/a?x=1");

    headers.insert(REFERER, HeaderValue::from_static("http://localhost:8080/index.html"));
    let out = rewrite_request_headers(&headers, &target, None, PREFIX);
    assert!(out.get(REFERER).is_none());
    Ok(())
}

#[test]
fn other_request_headers_pass_through() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let target = Url::parse("https://example.com/")?;
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("text/html"));
    headers.append(COOKIE, HeaderValue::from_static("a=1"));
    headers.append(COOKIE, HeaderValue::from_static("b=2"));

    let out = rewrite_request_headers(&headers, &target, None, PREFIX);
    assert_eq!(out.get(ACCEPT).ok_or("accept missing")?, "text/html");
    assert_eq!(out.get_all(COOKIE).iter().count(), 2);
    Ok(())
}

#[test]
fn response_caching_headers_are_purged() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut headers = HeaderMap::new();
    headers.insert(AGE, HeaderValue::from_static("120"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=3600"));
    headers.insert(EXPIRES, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/css"));

    let out = rewrite_response_headers(&headers);
    assert!(out.get(AGE).is_none());
    assert!(out.get(EXPIRES).is_none());
    assert_eq!(out.get_all(CACHE_CONTROL).iter().count(), 1);
    assert_eq!(out.get(CACHE_CONTROL).ok_or("cache-control missing")?, "no-cache");
    assert_eq!(out.get(CONTENT_TYPE).ok_or("content-type missing")?, "text/css");

    let bare = rewrite_response_headers(&HeaderMap::new());
    assert_eq!(bare.get(CACHE_CONTROL).ok_or("cache-control missing")?, "no-cache");
    Ok(())
}

#[test]
fn side_channel_carries_headers() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.append("x-multi", HeaderValue::from_static("one"));
    headers.append("x-multi", HeaderValue::from_static("two"));

    let json = headers_to_json(&headers);
    let parsed: serde_json::Value = serde_json::from_str(&json)?;
    assert_eq!(parsed["accept"], "*/*");
    assert_eq!(parsed["x-multi"], "one, two");

    let back = headers_from_json(&json)?;
    assert_eq!(back.get(ACCEPT).ok_or("accept missing")?, "*/*");
    assert_eq!(back.get("x-multi").ok_or("x-multi missing")?, "one, two");
    Ok(())
}

#[test]
fn side_channel_rejects_bad_json() {
    assert!(headers_from_json("not json").is_err());
    assert!(headers_from_json("[1, 2]").is_err());
    assert!(headers_from_json(r#"{"accept": 1}"#).is_err());
    assert!(headers_from_json(r#"{"bad name": "x"}"#).is_err());
}

#[test]
fn side_channel_lowercases_names() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let headers = headers_from_json(r#"{"User-Agent": "mirage"}"#)?;
    assert_eq!(headers.get("user-agent").ok_or("user-agent missing")?, "mirage");
    Ok(())
}
