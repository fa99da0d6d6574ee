use serde_json::Value;
use url::Url;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::resolver::to_proxy_path;

/// Top-level manifest members holding a URL
const URL_MEMBERS: [&str; 2] = ["start_url", "scope"];

/// Manifest members holding a list of image resources
const IMAGE_LISTS: [&str; 2] = ["icons", "screenshots"];

/// Route every URL of a web app manifest through the control prefix
///
/// URLs are resolved against the manifest's own URL first. Values that are
/// not strings, or that do not resolve, are left as they are.
pub fn rewrite_manifest(
    source: &str,
    manifest_url: &Url,
    control_prefix: &str,
) -> EngineResult<String> {
    let mut manifest: Value = serde_json::from_str(source)
        .map_err(|e| EngineError::Transform(format!("malformed manifest {manifest_url}: {e}")))?;

    let Value::Object(members) = &mut manifest else {
        return Ok(source.to_string());
    };

    let rewrite = |value: &mut Value| rewrite_url(value, manifest_url, control_prefix);

    for key in URL_MEMBERS {
        if let Some(value) = members.get_mut(key) {
            rewrite(value);
        }
    }
    for key in IMAGE_LISTS {
        if let Some(images) = members.get_mut(key) {
            rewrite_images(images, &rewrite);
        }
    }
    if let Some(Value::Array(shortcuts)) = members.get_mut("shortcuts") {
        for shortcut in shortcuts.iter_mut().filter_map(Value::as_object_mut) {
            if let Some(value) = shortcut.get_mut("url") {
                rewrite(value);
            }
            if let Some(icons) = shortcut.get_mut("icons") {
                rewrite_images(icons, &rewrite);
            }
        }
    }

    Ok(manifest.to_string())
}

fn rewrite_images(images: &mut Value, rewrite: &impl Fn(&mut Value)) {
    if let Value::Array(images) = images {
        for image in images.iter_mut().filter_map(Value::as_object_mut) {
            if let Some(src) = image.get_mut("src") {
                rewrite(src);
            }
        }
    }
}

fn rewrite_url(value: &mut Value, base: &Url, control_prefix: &str) {
    let Value::String(raw) = value else {
        return;
    };
    match base.join(raw) {
        Ok(resolved) => *raw = to_proxy_path(&resolved, control_prefix),
        Err(e) => tracing::debug!(value = %raw, error = %e, "Left unresolvable manifest URL"),
    }
}
