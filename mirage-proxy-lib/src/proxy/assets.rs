use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderValue, StatusCode};
use hyper::Response;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::engine::headers::NO_CACHE;
use crate::proxy::synthetic_response::{full_body, text_response, RespBody};

const INDEX_FILE: &str = "index.html";

/// Map a request path onto a file under `root`
///
/// Returns `None` for paths escaping the root. Directories map to their
/// `index.html`.
pub fn asset_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let path = request_path.split(['?', '#']).next().unwrap_or_default();
    let relative = Path::new(path.trim_start_matches('/'));

    let mut resolved = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if path.ends_with('/') || relative.as_os_str().is_empty() {
        resolved.push(INDEX_FILE);
    }
    Some(resolved)
}

/// Serve one of the proxy's own files from `root`
pub async fn serve_asset(root: &Path, request_path: &str) -> Response<RespBody> {
    let Some(mut path) = asset_path(root, request_path) else {
        return text_response(StatusCode::FORBIDDEN, "Forbidden");
    };
    if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
        path.push(INDEX_FILE);
    }

    match tokio::fs::read(&path).await {
        Ok(contents) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            let mut resp = Response::new(full_body(contents));
            let headers = resp.headers_mut();
            if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
                headers.insert(CONTENT_TYPE, value);
            }
            headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
            resp
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Asset not found");
            text_response(StatusCode::NOT_FOUND, "Not Found")
        }
    }
}
