//! Mapping between paths on the controlling origin and real target URLs.
//!
//! A proxied target lives under the control prefix with its absolute URL
//! appended verbatim: `/go/https://example.com/index.html`.

use url::{Position, Url};

use crate::engine::error::{EngineError, EngineResult};

/// Resolve the real target of an intercepted request
///
/// # Arguments
/// * `caller` - URL of the calling client, on the controlling origin or already real
/// * `path` - request path and query on the controlling origin
/// * `is_navigation_or_iframe` - whether the request loads a document
/// * `control_prefix` - configured control prefix
///
/// Paths that carry an encoded target resolve to it directly. Everything else
/// is relative to the real URL recovered from `caller`; without a caller such
/// a request cannot be resolved.
pub fn resolve(
    caller: Option<&Url>,
    path: &str,
    is_navigation_or_iframe: bool,
    control_prefix: &str,
) -> EngineResult<Url> {
    if let Some(target) = decode_target(path, control_prefix) {
        return Ok(target);
    }

    let real_caller = caller.and_then(|c| real_caller_url(c, control_prefix));
    match real_caller {
        Some(base) => base
            .join(path)
            .map_err(|e| EngineError::Resolution(format!("{path} against {base}: {e}"))),
        None if is_navigation_or_iframe => Err(EngineError::Resolution(format!(
            "navigation to {path} does not carry a target under {control_prefix}"
        ))),
        None => Err(EngineError::Resolution(format!(
            "no caller context to resolve {path} against"
        ))),
    }
}

/// Parse the absolute URL encoded after the control prefix, if any
pub fn decode_target(path: &str, control_prefix: &str) -> Option<Url> {
    let encoded = path.strip_prefix(control_prefix)?;
    Url::parse(encoded).ok().filter(|u| u.has_host())
}

/// Recover the URL a caller believes it is on
///
/// A caller under the control prefix is stripped to the encoded target; any
/// other caller is taken as is.
pub fn real_caller_url(caller: &Url, control_prefix: &str) -> Option<Url> {
    let path_and_query = &caller[Position::BeforePath..Position::AfterQuery];
    if path_and_query.starts_with(control_prefix) {
        decode_target(path_and_query, control_prefix)
    } else {
        Some(caller.clone())
    }
}

/// Path on the controlling origin that proxies `target`
pub fn to_proxy_path(target: &Url, control_prefix: &str) -> String {
    format!("{control_prefix}{target}")
}
