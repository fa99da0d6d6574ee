use serde::Serialize;
use url::Url;

use crate::config::{DebugFlags, FeatureFlags, ProxyConfig, SharedModule};

/// Transparent 16x16 icon shown until the target's own favicon loads
const PLACEHOLDER_FAVICON: &str = "data:image/x-icon;base64,iVBORw0KGgoAAAANSUhEUgAAABAAAAAQEAYAAABPYyMiAAAABmJLR0T///////8JWPfcAAAACXBIWXMAAABIAAAASABGyWs+AAAAF0lEQVRIx2NgGAWjYBSMglEwCkbBSAcACBAAAeaR9cIAAAAASUVORK5CYII=";

/// `$mirage.location`: the page's real location, seen through the control prefix
const LOCATION_SHIM: &str = r#"Object.defineProperty($mirage, "location", {
	get() {
		const real = () => new URL(location.href.slice(location.origin.length + $mirage.config.prefix.length));
		const proxied = href => $mirage.config.prefix + new URL(href, real()).href;
		return new Proxy({}, {
			get(_, prop) {
				switch (prop) {
					case "assign":
					case "replace":
						return href => location[prop](proxied(href));
					case "reload":
						return () => location.reload();
					case "toString":
						return () => real().href;
					default:
						return real()[prop];
				}
			},
			set(_, prop, value) {
				const url = real();
				url[prop] = value;
				location.href = prop === "href" ? proxied(value) : proxied(url.href);
				return true;
			},
		});
	},
	set(href) {
		location.href = $mirage.config.prefix + new URL(href, $mirage.location.href).href;
	},
});"#;

/// Configuration snapshot exported to page scripts as `$mirage.config`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageConfig {
    pub asset_prefix: String,
    pub prefix: String,
    pub relay_api_ws: String,
    pub debug: DebugFlags,
    pub flags: FeatureFlags,
    #[serde(skip)]
    pub service_worker_path: String,
    #[serde(skip)]
    pub shared_modules: Vec<SharedModule>,
}

impl PageConfig {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            asset_prefix: config.asset_prefix.clone(),
            prefix: config.control_prefix.clone(),
            relay_api_ws: config.relay_api_ws_path.clone(),
            debug: config.debug.clone(),
            flags: config.flags.clone(),
            service_worker_path: config.service_worker_path.clone(),
            shared_modules: config.shared_sources.clone(),
        }
    }

    /// JSON literal safe to embed in a `<script>` element
    fn to_script_json(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to serialize page config");
            "{}".to_string()
        });
        escape_script(&json)
    }
}

/// Wrap a document in the bootstrap shell
///
/// The shell fixes the charset, resets the favicon, registers the service
/// worker over the control prefix, exports the frozen config and inlines
/// the shared modules. Returns `None` for an empty body, which is served
/// unmodified.
pub fn wrap_document(body: &str, target: &Url, page: &PageConfig) -> Option<String> {
    if body.is_empty() {
        return None;
    }

    let origin = target.origin().ascii_serialization();
    let favicon = escape_attr(&format!("{}{origin}/favicon.ico", page.prefix));
    let sw_path = js_string(&page.service_worker_path);
    let scope = js_string(&page.prefix);
    let config = page.to_script_json();
    let modules = inline_modules(&page.shared_modules);
    let imports = js_string(&modules);

    Some(format!(
        r#"<!DOCTYPE html>
<head>
<meta charset="utf-8">
<link href="{PLACEHOLDER_FAVICON}" rel="icon" type="image/x-icon">
<link href="{favicon}" rel="icon" type="image/x-icon">
<script>
navigator.serviceWorker
	.register({sw_path}, {{ scope: {scope}, updateViaCache: "none", type: "module" }})
	.then(reg => reg.update())
	.catch(err => console.error(err.message));
var $mirage = {{ config: Object.freeze({config}) }};
{LOCATION_SHIM}
</script>
{modules}
<script>
$mirage.imports = {imports};
</script>
</head>
{body}"#
    ))
}

fn inline_modules(modules: &[SharedModule]) -> String {
    modules
        .iter()
        .map(|m| {
            format!(
                "<script data-module=\"{}\">\n{}\n</script>",
                escape_attr(&m.name),
                escape_script(&m.source)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn js_string(value: &str) -> String {
    escape_script(&serde_json::Value::String(value.to_string()).to_string())
}

/// Keep `</script>` and friends from closing the element early
fn escape_script(text: &str) -> String {
    text.replace("</", "<\\/")
}

fn escape_attr(text: &str) -> String {
    text.replace('&', "&amp;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_is_camel_case_and_escaped() {
        let mut page = PageConfig::from_config(&ProxyConfig::default());
        page.prefix = "/go/</script>".to_string();
        let json = page.to_script_json();
        assert!(json.contains("\"assetPrefix\":\"/mirage/\""));
        assert!(json.contains("\"relayApiWs\":\"/bare-ws/\""));
        assert!(!json.contains("</script>"));
        assert!(!json.contains("serviceWorkerPath"));
    }
}
