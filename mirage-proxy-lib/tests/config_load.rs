use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mirage_proxy_lib::config::{
    apply_port_override, load_from_path, parse_config, Config, ConfigStore,
};
use serial_test::serial;
use tempfile::NamedTempFile;

fn tmp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_nanos();
    std::env::temp_dir().join(format!("mirage-{nanos}-{name}"))
}

#[test]
fn defaults_for_empty_config() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cfg = parse_config("")?;
    assert_eq!(cfg.listen.to_string(), "0.0.0.0:8080");
    assert_eq!(cfg.static_dir, PathBuf::from("public"));
    assert_eq!(cfg.proxy.control_prefix, "/go/");
    assert_eq!(cfg.proxy.asset_prefix, "/mirage/");
    assert_eq!(cfg.proxy.relay_api_path, "/bare/");
    assert_eq!(cfg.proxy.relay_api_ws_path, "/bare-ws/");
    assert_eq!(cfg.proxy.ws_relay_prefix, "/bare-ws/");
    assert_eq!(cfg.proxy.service_worker_path, "/sw.js");
    assert!(cfg.proxy.flags.nested_workers);
    assert!(!cfg.proxy.debug.url);
    assert!(!cfg.cors.probe);
    assert_eq!(cfg.timeout.relay_ms, 30000);
    assert_eq!(cfg.timeout.shutdown_secs, 30);
    assert_eq!(cfg.logging.level, "info");
    assert!(cfg.telemetry.metrics_port.is_none());
    Ok(())
}

#[test]
fn derived_endpoint_and_origin_follow_listen_port() -> Result<(), Box<dyn std::error::Error + Send + Sync>>
{
    let cfg = parse_config(r#"listen = "127.0.0.1:9090""#)?;
    assert_eq!(cfg.relay_endpoint(), "http://127.0.0.1:9090/bare/");
    assert_eq!(cfg.declared_origin(), "http://localhost:9090");

    let cfg = parse_config(
        r#"
listen = "127.0.0.1:9090"

[proxy]
relay_endpoint = "http://relay.internal:8000/bare/"

[cors]
declared_origin = "https://proxy.example"
"#,
    )?;
    assert_eq!(cfg.relay_endpoint(), "http://relay.internal:8000/bare/");
    assert_eq!(cfg.declared_origin(), "https://proxy.example");
    Ok(())
}

#[test]
fn debug_and_feature_flags_keep_unknown_toggles() -> Result<(), Box<dyn std::error::Error + Send + Sync>>
{
    let cfg = parse_config(
        r#"
[proxy.debug]
url = true
rewrites = true

[proxy.flags]
nested_workers = false
experimental = true
"#,
    )?;
    assert!(cfg.proxy.debug.url);
    assert!(!cfg.proxy.debug.tunnel);
    assert_eq!(cfg.proxy.debug.extra.get("rewrites"), Some(&true));
    assert!(!cfg.proxy.flags.nested_workers);
    assert_eq!(cfg.proxy.flags.extra.get("experimental"), Some(&true));
    Ok(())
}

#[test]
fn rejects_invalid_prefixes() {
    let cases = [
        r#"[proxy]
control_prefix = "go/""#,
        r#"[proxy]
control_prefix = "/""#,
        r#"[proxy]
control_prefix = "/mirage/go/""#,
        r#"[proxy]
ws_relay_prefix = "/bare/ws/""#,
        r#"[proxy]
relay_endpoint = "https://relay.example/bare/""#,
        r#"[proxy]
relay_endpoint = "not a url""#,
        r#"[cors]
declared_origin = "nowhere""#,
        r#"[timeout]
relay_ms = 0"#,
    ];
    for case in cases {
        assert!(parse_config(case).is_err(), "accepted invalid config: {case}");
    }
}

#[test]
fn rejects_malformed_toml() {
    assert!(parse_config("listen = ").is_err());
    assert!(parse_config(r#"listen = "not-an-address""#).is_err());
}

#[test]
fn port_override_replaces_listen_port() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut cfg = Config::default();
    apply_port_override(&mut cfg, Some("3000"))?;
    assert_eq!(cfg.listen.port(), 3000);
    assert_eq!(cfg.relay_endpoint(), "http://127.0.0.1:3000/bare/");

    apply_port_override(&mut cfg, None)?;
    assert_eq!(cfg.listen.port(), 3000);

    assert!(apply_port_override(&mut cfg, Some("eighty")).is_err());
    assert!(apply_port_override(&mut cfg, Some("70000")).is_err());
    Ok(())
}

#[test]
#[serial]
fn loads_file_and_shared_modules() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let static_dir = tmp_path("static");
    fs::create_dir_all(static_dir.join("mirage"))?;
    fs::write(static_dir.join("mirage/bootstrap.js"), "console.log('boot');")?;

    let mut file = NamedTempFile::new()?;
    writeln!(
        file,
        r#"
listen = "127.0.0.1:0"
static_dir = "{}"

[proxy]
shared_modules = ["/mirage/bootstrap.js"]
"#,
        static_dir.display()
    )?;

    let cfg = load_from_path(file.path())?;
    assert_eq!(cfg.proxy.shared_sources.len(), 1);
    assert_eq!(cfg.proxy.shared_sources[0].name, "/mirage/bootstrap.js");
    assert_eq!(cfg.proxy.shared_sources[0].source, "console.log('boot');");

    fs::remove_dir_all(&static_dir)?;
    Ok(())
}

#[test]
#[serial]
fn missing_shared_module_is_an_error() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = tmp_path("missing-module.toml");
    fs::write(
        &path,
        r#"
static_dir = "/nonexistent-mirage-dir"

[proxy]
shared_modules = ["bootstrap.js"]
"#,
    )?;

    let err = load_from_path(&path).err().ok_or("expected an error")?;
    assert!(err.to_string().contains("shared module"));
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
#[serial]
fn missing_file_is_an_error() {
    assert!(load_from_path(tmp_path("does-not-exist.toml")).is_err());
}

#[test]
#[serial]
fn port_env_overrides_file() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = tmp_path("port.toml");
    fs::write(&path, r#"listen = "127.0.0.1:8080""#)?;

    std::env::set_var("PORT", "4567");
    let loaded = load_from_path(&path);
    std::env::remove_var("PORT");

    assert_eq!(loaded?.listen.to_string(), "127.0.0.1:4567");
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn store_replace_keeps_listen_address() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let store = ConfigStore::new(parse_config(r#"listen = "127.0.0.1:8080""#)?);
    let before = store.snapshot();

    store.replace(parse_config(
        r#"
listen = "127.0.0.1:9999"

[proxy.debug]
url = true
"#,
    )?)?;

    let after = store.snapshot();
    assert_eq!(after.listen.to_string(), "127.0.0.1:8080");
    assert!(after.proxy.debug.url);
    assert!(!before.proxy.debug.url);
    Ok(())
}

#[test]
fn store_replace_keeps_relay_binding() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let store = ConfigStore::new(parse_config(r#"listen = "127.0.0.1:8080""#)?);

    store.replace(parse_config(
        r#"
listen = "127.0.0.1:8080"

[proxy]
relay_api_path = "/relay/"
relay_endpoint = "http://relay.internal:8000/relay/"
control_prefix = "/browse/"

[cors]
declared_origin = "https://other.example"

[timeout]
relay_ms = 10
"#,
    )?)?;

    let after = store.snapshot();
    assert_eq!(after.proxy.relay_api_path, "/bare/");
    assert_eq!(after.relay_endpoint(), "http://127.0.0.1:8080/bare/");
    assert_eq!(after.declared_origin(), "http://localhost:8080");
    assert_eq!(after.timeout.relay_ms, 30000);
    assert_eq!(after.proxy.control_prefix, "/browse/");
    Ok(())
}

#[test]
fn store_rejects_snapshot_invalid_after_pinning() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let store = ConfigStore::new(Config::default());

    // Valid alone, but collides with the pinned relay path
    let requested = parse_config(
        r#"
[proxy]
relay_api_path = "/relay/"
ws_relay_prefix = "/bare/ws/"
"#,
    )?;
    assert!(store.replace(requested).is_err());
    assert_eq!(store.snapshot().proxy.ws_relay_prefix, "/bare-ws/");
    Ok(())
}
