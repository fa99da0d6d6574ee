use std::fs;
use std::path::Path;

use crate::config::{Config, SharedModule};
use crate::error::{ProxyError, Result};

/// Read, validate and complete a TOML config file
///
/// Shared module sources are read relative to `static_dir`, and `PORT`
/// (when set) replaces the configured listen port.
pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| ProxyError::Config(format!("Failed to read config file: {e}")))?;
    let mut cfg = parse_config(&txt)?;
    apply_port_override(&mut cfg, std::env::var("PORT").ok().as_deref())?;
    load_shared_modules(&mut cfg)?;
    Ok(cfg)
}

/// Parse and validate config text without touching the filesystem
pub fn parse_config(txt: &str) -> Result<Config> {
    let cfg: Config =
        toml::from_str(txt).map_err(|e| ProxyError::Config(format!("Failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

/// Replace the listen port with `port` when given
pub fn apply_port_override(cfg: &mut Config, port: Option<&str>) -> Result<()> {
    if let Some(raw) = port {
        let port: u16 = raw
            .trim()
            .parse()
            .map_err(|e| ProxyError::Config(format!("Invalid PORT value {raw:?}: {e}")))?;
        cfg.listen.set_port(port);
    }
    Ok(())
}

fn load_shared_modules(cfg: &mut Config) -> Result<()> {
    let mut sources = Vec::with_capacity(cfg.proxy.shared_modules.len());
    for name in &cfg.proxy.shared_modules {
        let path = cfg.static_dir.join(name.trim_start_matches('/'));
        let source = fs::read_to_string(&path).map_err(|e| {
            ProxyError::Config(format!("Failed to read shared module {}: {e}", path.display()))
        })?;
        sources.push(SharedModule { name: name.clone(), source });
    }
    cfg.proxy.shared_sources = sources;
    Ok(())
}

pub fn validate_config(cfg: &Config) -> Result<()> {
    let proxy = &cfg.proxy;
    let prefixes = [
        ("control_prefix", &proxy.control_prefix),
        ("asset_prefix", &proxy.asset_prefix),
        ("relay_api_path", &proxy.relay_api_path),
        ("relay_api_ws_path", &proxy.relay_api_ws_path),
        ("ws_relay_prefix", &proxy.ws_relay_prefix),
        ("service_worker_path", &proxy.service_worker_path),
    ];
    for (field, value) in prefixes {
        if !value.starts_with('/') {
            return Err(ProxyError::Config(format!("{field} must start with '/': {value:?}")));
        }
    }

    if proxy.control_prefix == "/" {
        return Err(ProxyError::Config("control_prefix cannot be the root path".to_string()));
    }

    if proxy.control_prefix.starts_with(&proxy.asset_prefix)
        || proxy.asset_prefix.starts_with(&proxy.control_prefix)
    {
        return Err(ProxyError::Config(format!(
            "control_prefix {:?} and asset_prefix {:?} overlap",
            proxy.control_prefix, proxy.asset_prefix
        )));
    }

    if proxy.ws_relay_prefix.starts_with(&proxy.relay_api_path) {
        return Err(ProxyError::Config(format!(
            "ws_relay_prefix {:?} is shadowed by relay_api_path {:?}",
            proxy.ws_relay_prefix, proxy.relay_api_path
        )));
    }

    if let Some(endpoint) = &proxy.relay_endpoint {
        let parsed = url::Url::parse(endpoint)
            .map_err(|e| ProxyError::Config(format!("Invalid relay_endpoint {endpoint:?}: {e}")))?;
        if parsed.scheme() != "http" {
            return Err(ProxyError::Config(format!(
                "relay_endpoint must use http, got {:?}",
                parsed.scheme()
            )));
        }
    }

    if let Some(origin) = &cfg.cors.declared_origin {
        url::Url::parse(origin)
            .map_err(|e| ProxyError::Config(format!("Invalid cors.declared_origin: {e}")))?;
    }

    if cfg.timeout.relay_ms == 0 {
        return Err(ProxyError::Config("relay_ms must be > 0".to_string()));
    }

    Ok(())
}
