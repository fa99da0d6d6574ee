use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderValue, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::Response;

use crate::engine::headers::NO_CACHE;
use crate::engine::RewrittenResponse;

pub(crate) type RespBody = BoxBody<Bytes, hyper::Error>;

/// Plain text response produced by the listener itself
pub(crate) fn text_response(status: StatusCode, text: impl Into<Bytes>) -> Response<RespBody> {
    let mut resp = Response::new(full_body(text));
    *resp.status_mut() = status;
    let headers = resp.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    resp
}

/// Hand an engine response to hyper
pub(crate) fn rewritten_response(rewritten: RewrittenResponse) -> Response<RespBody> {
    let mut resp = Response::new(full_body(rewritten.body.into_bytes()));
    *resp.status_mut() = rewritten.status;
    *resp.headers_mut() = rewritten.headers;
    resp
}

pub(crate) fn full_body(bytes: impl Into<Bytes>) -> RespBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed()
}
