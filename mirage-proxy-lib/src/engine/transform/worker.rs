/// Shim flavour for a nested worker script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerShim {
    Dedicated,
    Shared,
    Service,
}

const UNSUPPORTED_WARNING: &str = "No nested worker support in this runtime";

impl WorkerShim {
    /// Scripts under `{asset_prefix}workers/` imported by this shim, in order
    pub fn scripts(self) -> &'static [&'static str] {
        match self {
            WorkerShim::Dedicated => &["worker.js"],
            WorkerShim::Shared => &["worker.js", "sharedworker.js"],
            WorkerShim::Service => &["worker.js", "serviceworker.js"],
        }
    }
}

/// Prefix a worker script with the bootstrap of its shim
///
/// The shims read the control prefix from `self.$mirage.config`, set here
/// first. The imports only run where `importScripts` exists; elsewhere a
/// single warning is logged and the script runs unshimmed.
pub fn prepend_shim(shim: WorkerShim, asset_prefix: &str, control_prefix: &str, body: &str) -> String {
    let imports = shim
        .scripts()
        .iter()
        .map(|script| format!("\timportScripts({});", js_string(&format!("{asset_prefix}workers/{script}"))))
        .collect::<Vec<_>>()
        .join("\n");
    let config = serde_json::json!({ "assetPrefix": asset_prefix, "prefix": control_prefix });

    format!(
        "if (typeof importScripts === \"function\") {{\n\tself.$mirage = {{ config: Object.freeze({config}) }};\n{imports}\n}} else\n\tconsole.warn(\"{UNSUPPORTED_WARNING}\");\n\n{body}"
    )
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_worker_imports_both_shims() {
        let out = prepend_shim(WorkerShim::Shared, "/mirage/", "/go/", "onconnect = () => {};");
        let base = out.find("/mirage/workers/worker.js").unwrap();
        let shared = out.find("/mirage/workers/sharedworker.js").unwrap();
        assert!(base < shared);
        assert!(out.ends_with("onconnect = () => {};"));
    }

    #[test]
    fn test_control_prefix_reaches_the_shim() {
        let out = prepend_shim(WorkerShim::Dedicated, "/assets/", "/browse/", "postMessage(1);");
        let config = out.find(r#"Object.freeze({"assetPrefix":"/assets/","prefix":"/browse/"})"#);
        let import = out.find(r#"importScripts("/assets/workers/worker.js")"#);
        assert!(config.is_some() && import.is_some());
        assert!(config < import);
    }
}
