use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Port used when neither the config file nor `PORT` provide one
pub const DEFAULT_PORT: u16 = 8080;

/// Named trace toggles, also exported to page scripts
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct DebugFlags {
    /// Log every proxied request as `METHOD url (destination)`
    #[serde(default)]
    pub url: bool,
    /// Log tunnel lifecycle transitions
    #[serde(default)]
    pub tunnel: bool,
    /// Any other toggle, passed through to page scripts untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, bool>,
}

/// Feature switches, also exported to page scripts
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Prefix worker scripts with the nested worker shim
    /// Default: true
    #[serde(default = "default_true", rename(serialize = "nestedWorkers"))]
    pub nested_workers: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, bool>,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self { nested_workers: true, extra: BTreeMap::new() }
    }
}

/// A script inlined into every rewritten HTML document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedModule {
    /// Path relative to `static_dir`, as listed in the config
    pub name: String,
    pub source: String,
}

/// Settings read by the rewriting engine
#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Path prefix carrying proxied targets, e.g. `/go/https://example.com/`
    #[serde(default = "default_control_prefix")]
    pub control_prefix: String,
    /// Path prefix of the proxy's own assets; never treated as a target
    #[serde(default = "default_asset_prefix")]
    pub asset_prefix: String,
    /// Path of the fetch relay endpoint
    #[serde(default = "default_relay_api_path")]
    pub relay_api_path: String,
    /// WebSocket relay path handed to page scripts
    #[serde(default = "default_relay_api_ws_path")]
    pub relay_api_ws_path: String,
    /// Path prefix on which the listener accepts WebSocket upgrades
    #[serde(default = "default_relay_api_ws_path")]
    pub ws_relay_prefix: String,
    /// Script registered as the controlling service worker
    #[serde(default = "default_service_worker_path")]
    pub service_worker_path: String,
    /// Absolute URL of the relay endpoint
    /// Default: the listener itself (`http://127.0.0.1:<port><relay_api_path>`)
    #[serde(default)]
    pub relay_endpoint: Option<String>,
    /// Scripts (relative to `static_dir`) inlined into rewritten HTML
    #[serde(default)]
    pub shared_modules: Vec<String>,
    /// Sources of `shared_modules`, filled by the loader
    #[serde(skip)]
    pub shared_sources: Vec<SharedModule>,
    #[serde(default)]
    pub debug: DebugFlags,
    #[serde(default)]
    pub flags: FeatureFlags,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            control_prefix: default_control_prefix(),
            asset_prefix: default_asset_prefix(),
            relay_api_path: default_relay_api_path(),
            relay_api_ws_path: default_relay_api_ws_path(),
            ws_relay_prefix: default_relay_api_ws_path(),
            service_worker_path: default_service_worker_path(),
            relay_endpoint: None,
            shared_modules: Vec::new(),
            shared_sources: Vec::new(),
            debug: DebugFlags::default(),
            flags: FeatureFlags::default(),
        }
    }
}

/// Cross-origin emulation policy
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CorsConfig {
    /// Probe each origin once through the relay before relaying to it
    /// Default: false
    #[serde(default)]
    pub probe: bool,
    /// Origin the probe declares; default is the listener's own origin
    #[serde(default)]
    pub declared_origin: Option<String>,
    /// Hosts (and their subdomains) that are never relayed
    #[serde(default)]
    pub blocked_hosts: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    /// Default: "info"
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Show module path (target) in log messages
    /// Default: false
    #[serde(default)]
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), show_target: false }
    }
}

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// Port of the observability server (`/metrics`, `/health`, `/live`)
    /// Default: None (disabled)
    #[serde(default)]
    pub metrics_port: Option<u16>,
    /// Log level for the opentelemetry crates
    /// Default: "warn"
    #[serde(default = "default_otel_log_level")]
    pub otel_log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { metrics_port: None, otel_log_level: default_otel_log_level() }
    }
}

/// Timeout configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    /// Relay round trip timeout in milliseconds
    /// Default: 30000 (30 seconds)
    #[serde(default = "default_relay_timeout")]
    pub relay_ms: u64,
    /// Graceful shutdown timeout in seconds
    /// Default: 30
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { relay_ms: default_relay_timeout(), shutdown_secs: default_shutdown_timeout() }
    }
}

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Address and port to listen on
    /// Default: "0.0.0.0:8080"; `PORT` overrides the port
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Directory holding the proxy's own assets (`index.html`, service worker, shims)
    /// Default: "public"
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub timeout: TimeoutConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            static_dir: default_static_dir(),
            proxy: ProxyConfig::default(),
            cors: CorsConfig::default(),
            logging: LoggingConfig::default(),
            telemetry: TelemetryConfig::default(),
            timeout: TimeoutConfig::default(),
        }
    }
}

impl Config {
    /// Relay endpoint the engine talks to
    pub fn relay_endpoint(&self) -> String {
        match &self.proxy.relay_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("http://127.0.0.1:{}{}", self.listen.port(), self.proxy.relay_api_path),
        }
    }

    /// Origin announced by the CORS probe
    pub fn declared_origin(&self) -> String {
        match &self.cors.declared_origin {
            Some(origin) => origin.clone(),
            None => format!("http://localhost:{}", self.listen.port()),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_control_prefix() -> String {
    "/go/".to_string()
}

fn default_asset_prefix() -> String {
    "/mirage/".to_string()
}

fn default_relay_api_path() -> String {
    "/bare/".to_string()
}

fn default_relay_api_ws_path() -> String {
    "/bare-ws/".to_string()
}

fn default_service_worker_path() -> String {
    "/sw.js".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_otel_log_level() -> String {
    "warn".to_string()
}

fn default_relay_timeout() -> u64 {
    30000
}

fn default_shutdown_timeout() -> u64 {
    30
}
